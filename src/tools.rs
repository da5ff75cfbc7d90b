// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Local tool execution.
//!
//! A [`ToolRegistry`] is built once from the session's tool servers and
//! answers every inbound tool call with exactly one [`ToolResult`]. Handler
//! failures, panics included, become error-flagged results instead of
//! propagating.

use crate::protocol::ToolCallPayload;
use crate::types::{ToolResult, ToolServer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Handler for tool invocations.
pub type ToolHandler = Arc<dyn Fn(&Value) -> Result<ToolResult, ToolError> + Send + Sync>;

/// Failure raised by a tool handler.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The handler produced something that is not a tool result.
    #[error("Tool returned an invalid result")]
    InvalidResult,
}

impl ToolError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidInput(err.to_string())
    }
}

/// Extract a typed field from a tool's input object.
pub fn arg<T: DeserializeOwned>(input: &Value, name: &str) -> Result<T, ToolError> {
    let value = input
        .get(name)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing field `{name}`")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| ToolError::InvalidInput(format!("field `{name}`: {e}")))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Name to handler mapping. Immutable once built.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    /// Collect the handlers of every locally executed tool.
    ///
    /// Each tool answers to its bare name and to `mcp__<server>__<tool>`.
    /// Tools without a handler run remotely and are skipped.
    pub fn from_servers(servers: &[ToolServer]) -> Self {
        let mut handlers = HashMap::new();
        for server in servers {
            for tool in &server.tools {
                let Some(handler) = &tool.handler else {
                    continue;
                };
                handlers.insert(
                    format!("mcp__{}__{}", server.name, tool.name),
                    handler.clone(),
                );
                handlers.insert(tool.name.clone(), handler.clone());
            }
        }
        Self { handlers }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the named handler. Never fails.
    pub fn dispatch(&self, call: &ToolCallPayload) -> ToolResult {
        let Some(handler) = self.handlers.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, call_id = %call.call_id, "Tool not found");
            return ToolResult::error(format!("Tool not found: {}", call.tool_name));
        };

        debug!(tool = %call.tool_name, call_id = %call.call_id, "Invoking tool");
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&call.input)));

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(ToolError::InvalidResult)) => {
                warn!(tool = %call.tool_name, "Tool returned an invalid result");
                ToolResult::error(format!(
                    "Tool {} failed: returned an invalid result",
                    call.tool_name
                ))
            }
            Ok(Err(err)) => {
                warn!(tool = %call.tool_name, error = %err, "Tool failed");
                ToolResult::error(format!("Tool {} failed: {}", call.tool_name, err))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!(tool = %call.tool_name, panic = %msg, "Tool panicked");
                ToolResult::error(format!("Tool {} failed: {}", call.tool_name, msg))
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}
