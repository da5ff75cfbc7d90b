// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]

//! # agentlink
//!
//! Client SDK for persistent, tool-aware conversations with a remote agent
//! service over WebSocket.
//!
//! ## Quick Start
//!
//! ```no_run
//! use agentlink::{Session, Tool, ToolResult, ToolServer};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> agentlink::Result<()> {
//!     let math = ToolServer::new("math").tool(
//!         Tool::new("add")
//!             .description("Add two integers")
//!             .schema(json!({"type": "object", "required": ["a", "b"]}))
//!             .handler(|input| {
//!                 let a: i64 = agentlink::tools::arg(input, "a")?;
//!                 let b: i64 = agentlink::tools::arg(input, "b")?;
//!                 Ok(ToolResult::text((a + b).to_string()))
//!             }),
//!     );
//!
//!     let session = Session::builder()
//!         .url("wss://agent.example.com/v1/session")
//!         .token("secret")
//!         .tool_server(math)
//!         .build()?;
//!
//!     for message in session.send_and_collect("What is 7 + 15?").await? {
//!         if let Some(text) = message.text() {
//!             println!("{text}");
//!         }
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! Tool calls from the agent are answered by local handlers and never show
//! up in [`Session::receive`]. Everything else arrives in order.

pub mod error;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

// Re-export main types at crate root for convenience
pub use error::{AgentError, ErrorKind, Result};
pub use protocol::{
    AssistantMessage, ChatMessage, ControlAction, ControlMessage, ControlPayload, ErrorMessage,
    InitMessage, InitPayload, Message, PingMessage, ResultMessage, SystemMessage,
    ToolCallMessage, ToolCallPayload, ToolResultMessage, ToolResultPayload, UserMessage,
};
pub use session::{EventHandler, EventSubscription, Session, SessionBuilder, SessionEvent};
pub use tools::{ToolError, ToolHandler, ToolRegistry};
pub use transport::{
    Connector, FrameReader, FrameWriter, Transport, TransportEvent, WebSocketConnector,
};
pub use types::{
    ConnectOptions, ConnectionStatus, McpRemoteServerConfig, McpServerConfig,
    McpStdioServerConfig, MessageOptions, PermissionMode, ResourceContents, SessionOptions,
    SessionState, Tool, ToolContent, ToolResult, ToolServer, Usage,
};
