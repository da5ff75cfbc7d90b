// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Core types for the agentlink SDK.

use crate::error::{AgentError, Result};
use crate::tools::{ToolError, ToolHandler};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn is_false(value: &bool) -> bool {
    !*value
}

// =============================================================================
// Enums
// =============================================================================

/// Status of the physical connection, owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Conversation-level state, owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Initializing,
    Ready,
    Processing,
    WaitingTool,
    Completed,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Processing => write!(f, "processing"),
            SessionState::WaitingTool => write!(f, "waiting_tool"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Permission mode requested for the remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

// =============================================================================
// Usage
// =============================================================================

/// Token counters reported with a turn result. Missing counters decode as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl Usage {
    pub fn new(
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_input_tokens: u64,
        cache_read_input_tokens: u64,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens,
            cache_read_input_tokens,
        }
    }

    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_input_tokens)
            .saturating_add(self.cache_read_input_tokens)
    }
}

// =============================================================================
// Tool Result Types
// =============================================================================

/// Contents of a resource reference returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// One item of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image item from raw bytes.
    pub fn image(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    pub fn resource(uri: impl Into<String>) -> Self {
        Self::Resource {
            resource: ResourceContents {
                uri: uri.into(),
                mime_type: None,
                text: None,
                blob: None,
            },
        }
    }

    /// Decoded image bytes, if this is an image item with valid base64.
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Image { data, .. } => base64::engine::general_purpose::STANDARD
                .decode(data)
                .ok(),
            _ => None,
        }
    }
}

/// Result of a tool execution, sent back to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a success result with text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    /// Create an error-flagged text result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }

    /// Create a success result from arbitrary content items.
    pub fn with_content(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Parse a dynamic value that must already have the result shape.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(AgentError::from)
    }

    /// Concatenated text of all text items.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Tool Definition (SDK-side)
// =============================================================================

/// A tool declared to the server, optionally executed locally.
///
/// Tools without a handler are declared only; the server executes them.
///
/// ```
/// use agentlink::{Tool, ToolResult};
/// use serde_json::json;
///
/// let add = Tool::new("add")
///     .description("Add two integers")
///     .schema(json!({
///         "type": "object",
///         "properties": { "a": { "type": "integer" }, "b": { "type": "integer" } },
///         "required": ["a", "b"]
///     }))
///     .handler(|input| {
///         let a: i64 = agentlink::tools::arg(input, "a")?;
///         let b: i64 = agentlink::tools::arg(input, "b")?;
///         Ok(ToolResult::text((a + b).to_string()))
///     });
/// assert!(add.has_handler());
/// ```
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Option<ToolHandler>,
}

impl Tool {
    /// Create a new tool with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
            handler: None,
        }
    }

    /// Set the tool description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Set the input JSON schema.
    pub fn schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Attach a typed local handler.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<ToolResult, ToolError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Attach a handler producing a dynamic value.
    ///
    /// The value must have the [`ToolResult`] shape; anything else is reported
    /// to the server as a failed call.
    pub fn json_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(
            move |input: &Value| -> std::result::Result<ToolResult, ToolError> {
                let value = handler(input)?;
                ToolResult::from_value(value).map_err(|_| ToolError::InvalidResult)
            },
        ));
        self
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("local", &self.handler.is_some())
            .finish()
    }
}

// Handlers never cross the wire.
impl Serialize for Tool {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Tool", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("description", &self.description)?;
        state.serialize_field("input_schema", &self.input_schema)?;
        state.end()
    }
}

/// An in-process tool server: a named group of tools.
#[derive(Debug, Clone)]
pub struct ToolServer {
    pub name: String,
    pub version: String,
    pub tools: Vec<Tool>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }
}

impl Serialize for ToolServer {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ToolServer", 4)?;
        state.serialize_field("type", "sdk")?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("tools", &self.tools)?;
        state.end()
    }
}

// =============================================================================
// External MCP Server Configuration
// =============================================================================

/// Configuration for an MCP server the remote agent launches over stdio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpStdioServerConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

/// Configuration for a remote MCP server (HTTP or SSE).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpRemoteServerConfig {
    pub url: String,
    #[serde(default = "default_mcp_type", rename = "type")]
    pub server_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

fn default_mcp_type() -> String {
    "http".to_string()
}

/// External MCP server declaration, passed through to the server untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Stdio(McpStdioServerConfig),
    Remote(McpRemoteServerConfig),
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Connection target and credential.
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// WebSocket endpoint, e.g. `wss://agent.example.com/v1/session`.
    pub url: String,
    /// Opaque bearer credential, appended as the `token` query parameter.
    pub token: Option<String>,
}

impl ConnectOptions {
    /// Environment variable holding the endpoint URL.
    pub const URL_ENV: &'static str = "AGENTLINK_URL";
    /// Environment variable holding the bearer credential.
    pub const TOKEN_ENV: &'static str = "AGENTLINK_TOKEN";

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Load from `AGENTLINK_URL` / `AGENTLINK_TOKEN`.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(Self::URL_ENV).ok().filter(|v| !v.is_empty())?;
        let token = std::env::var(Self::TOKEN_ENV).ok().filter(|v| !v.is_empty());
        Some(Self { url, token })
    }

    /// Build the final target, with the credential embedded.
    pub fn target_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| AgentError::validation(format!("Invalid url {}: {}", self.url, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(AgentError::validation(format!(
                    "Unsupported url scheme: {other}"
                )))
            }
        }
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

// Keeps the credential out of logs.
impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Session configuration, sent verbatim in the init message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_thinking_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub mcp_servers: HashMap<String, McpServerConfig>,

    /// In-process tool servers. Serialized separately as descriptors.
    #[serde(skip)]
    pub tool_servers: Vec<ToolServer>,
}

/// Options for sending a user message.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// Plain text or an array of content blocks.
    pub content: Value,
    pub parent_tool_use_id: Option<String>,
}

impl MessageOptions {
    /// Send structured content blocks instead of plain text.
    pub fn blocks(blocks: Vec<Value>) -> Self {
        Self {
            content: Value::Array(blocks),
            parent_tool_use_id: None,
        }
    }
}

impl From<&str> for MessageOptions {
    fn from(prompt: &str) -> Self {
        Self {
            content: Value::String(prompt.to_string()),
            parent_tool_use_id: None,
        }
    }
}

impl From<String> for MessageOptions {
    fn from(prompt: String) -> Self {
        Self {
            content: Value::String(prompt),
            parent_tool_use_id: None,
        }
    }
}
