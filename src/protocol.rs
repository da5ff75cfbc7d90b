// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Wire messages exchanged with the agent service.
//!
//! Every frame is a JSON object with a `type` discriminator. Simple variants
//! carry flat fields; control and tool variants nest their fields under
//! `payload`, and chat variants under `message`. Decoding is strict: an
//! unknown or missing discriminator, or a missing required field, is a
//! protocol error rather than a partially populated message.

use crate::error::{AgentError, Result};
use crate::types::{ToolResult, Usage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_result_subtype() -> String {
    "success".to_string()
}

// =============================================================================
// Nested Types
// =============================================================================

/// Chat content carried by user and assistant messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// Plain text or an array of content blocks. Passed through unchanged.
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: Value) -> Self {
        Self {
            role: role.into(),
            content,
            model: None,
            stop_reason: None,
        }
    }

    /// Plain text of the content: the string itself, or the joined text blocks.
    pub fn text(&self) -> Option<String> {
        match &self.content {
            Value::String(s) => Some(s.clone()),
            Value::Array(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(""))
                }
            }
            _ => None,
        }
    }
}

/// Control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlAction {
    /// Server: session is ready.
    Ready,
    /// Server: session metadata, also signals readiness.
    SessionInfo,
    /// Client: closing the session.
    Close,
    /// Client: abort the current turn.
    Interrupt,
}

// =============================================================================
// Message Variants
// =============================================================================

/// Session bootstrap payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Session options, opaque at this layer.
    #[serde(default)]
    pub options: Value,
    /// Descriptors of in-process tool servers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_servers: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    pub payload: InitPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub id: String,
    pub session_id: String,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub session_id: String,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub subtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl SystemMessage {
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }

    /// Session id, preferring the one embedded in `data`.
    pub fn resolved_session_id(&self) -> Option<&str> {
        self.data
            .get("session_id")
            .and_then(Value::as_str)
            .or(self.session_id.as_deref())
    }
}

/// Final summary of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default = "default_result_subtype")]
    pub subtype: String,
    pub session_id: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
    /// Must be finite; JSON has no encoding for NaN or infinity.
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPayload {
    pub action: ControlAction,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub payload: ControlPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: ToolCallPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPayload {
    pub call_id: String,
    #[serde(flatten)]
    pub result: ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: ToolResultPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

// =============================================================================
// Message
// =============================================================================

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Init(InitMessage),
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Result(ResultMessage),
    Control(ControlMessage),
    Error(ErrorMessage),
    ToolCall(ToolCallMessage),
    ToolResult(ToolResultMessage),
    Ping(PingMessage),
}

fn parse_variant<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| AgentError::protocol(format!("Invalid {kind} message: {e}")))
}

impl Message {
    /// Decode one text frame.
    pub fn decode(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| AgentError::protocol(format!("Invalid JSON frame: {e}")))?;
        Self::from_value(value)
    }

    /// Decode an already-parsed frame.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::protocol("Missing message type"))?
            .to_string();

        match kind.as_str() {
            "init" => parse_variant(&kind, value).map(Message::Init),
            "user" => parse_variant(&kind, value).map(Message::User),
            "assistant" => parse_variant(&kind, value).map(Message::Assistant),
            "system" => parse_variant(&kind, value).map(Message::System),
            "result" => parse_variant(&kind, value).map(Message::Result),
            "control" => parse_variant(&kind, value).map(Message::Control),
            "error" => parse_variant(&kind, value).map(Message::Error),
            "tool_call" => parse_variant(&kind, value).map(Message::ToolCall),
            "tool_result" => parse_variant(&kind, value).map(Message::ToolResult),
            "ping" => parse_variant(&kind, value).map(Message::Ping),
            other => Err(AgentError::protocol(format!(
                "Unknown message type: {other}"
            ))),
        }
    }

    /// Encode as one text frame.
    ///
    /// Fails with a protocol error on a non-finite result cost.
    pub fn encode(&self) -> Result<String> {
        if let Message::Result(result) = self {
            if !result.total_cost_usd.is_finite() {
                return Err(AgentError::protocol(format!(
                    "total_cost_usd must be finite, got {}",
                    result.total_cost_usd
                )));
            }
        }
        serde_json::to_string(self).map_err(AgentError::from)
    }

    /// The wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Init(_) => "init",
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::System(_) => "system",
            Message::Result(_) => "result",
            Message::Control(_) => "control",
            Message::Error(_) => "error",
            Message::ToolCall(_) => "tool_call",
            Message::ToolResult(_) => "tool_result",
            Message::Ping(_) => "ping",
        }
    }

    /// Session id carried by the message, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::User(m) => Some(&m.session_id),
            Message::Assistant(m) => Some(&m.session_id),
            Message::Result(m) => Some(&m.session_id),
            Message::System(m) => m.resolved_session_id(),
            Message::Error(m) => m.session_id.as_deref(),
            Message::ToolCall(m) => m.session_id.as_deref(),
            Message::ToolResult(m) => m.session_id.as_deref(),
            Message::Init(_) | Message::Control(_) | Message::Ping(_) => None,
        }
    }

    /// Plain text of chat content, a turn result, or an error.
    pub fn text(&self) -> Option<String> {
        match self {
            Message::User(m) => m.message.text(),
            Message::Assistant(m) => m.message.text(),
            Message::Result(m) => m.result.clone(),
            Message::Error(m) => Some(m.message.clone()),
            _ => None,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result(_))
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Build a user message with a fresh id.
    pub fn user(session_id: impl Into<String>, content: Value) -> Self {
        Message::User(UserMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            message: ChatMessage::new("user", content),
            parent_tool_use_id: None,
        })
    }

    pub fn init(options: Value, tool_servers: Vec<Value>) -> Self {
        Message::Init(InitMessage {
            payload: InitPayload {
                options,
                tool_servers,
            },
        })
    }

    pub fn control(action: ControlAction) -> Self {
        Message::Control(ControlMessage {
            payload: ControlPayload {
                action,
                data: Value::Null,
            },
        })
    }

    pub fn tool_result(
        session_id: Option<String>,
        call_id: impl Into<String>,
        result: ToolResult,
    ) -> Self {
        Message::ToolResult(ToolResultMessage {
            session_id,
            payload: ToolResultPayload {
                call_id: call_id.into(),
                result,
            },
        })
    }

    pub fn ping(timestamp: Option<u64>) -> Self {
        Message::Ping(PingMessage { timestamp })
    }
}
