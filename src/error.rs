// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Error types for the agentlink SDK.

use std::time::Duration;
use thiserror::Error;

/// Broad classification of an [`AgentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Failure to establish or maintain the link.
    Connection,
    /// The remote side rejected the credential.
    Authentication,
    /// Malformed or undecodable frame.
    Protocol,
    /// Failure during session bootstrap or use of a closed session.
    Session,
    /// Tool handler failure. Always contained by the dispatcher.
    ToolExecution,
    /// Caller-imposed deadline elapsed.
    Timeout,
    /// Malformed caller input or API misuse.
    Validation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Session => "session",
            ErrorKind::ToolExecution => "tool_execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
        };
        f.write_str(name)
    }
}

/// Main error type for the agentlink SDK.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Could not open or keep the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport/IO error
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential rejected by the server
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Protocol error (framing, invalid messages, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session bootstrap failed or the server reported an error before readiness
    #[error("Session error: {0}")]
    Session(String),

    /// Session was closed
    #[error("Session closed")]
    SessionClosed,

    /// Tool handler failure
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Caller-imposed deadline elapsed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration or API misuse
    #[error("Invalid usage: {0}")]
    Validation(String),
}

/// Result type alias for agentlink operations.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Connection(_) | AgentError::ConnectionClosed | AgentError::Io(_) => {
                ErrorKind::Connection
            }
            AgentError::Authentication(_) => ErrorKind::Authentication,
            AgentError::Protocol(_) | AgentError::Json(_) => ErrorKind::Protocol,
            AgentError::Session(_) | AgentError::SessionClosed => ErrorKind::Session,
            AgentError::ToolExecution(_) => ErrorKind::ToolExecution,
            AgentError::Timeout(_) => ErrorKind::Timeout,
            AgentError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Returns true if this error indicates the connection is no longer usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::ConnectionClosed
                | AgentError::Connection(_)
                | AgentError::Authentication(_)
                | AgentError::SessionClosed
        )
    }
}

// Io and Json sources are not Clone; copies keep their kind and message.
impl Clone for AgentError {
    fn clone(&self) -> Self {
        match self {
            AgentError::Connection(s) => AgentError::Connection(s.clone()),
            AgentError::ConnectionClosed => AgentError::ConnectionClosed,
            AgentError::Io(e) => AgentError::Io(std::io::Error::new(e.kind(), e.to_string())),
            AgentError::Authentication(s) => AgentError::Authentication(s.clone()),
            AgentError::Protocol(s) => AgentError::Protocol(s.clone()),
            AgentError::Json(e) => AgentError::Protocol(e.to_string()),
            AgentError::Session(s) => AgentError::Session(s.clone()),
            AgentError::SessionClosed => AgentError::SessionClosed,
            AgentError::ToolExecution(s) => AgentError::ToolExecution(s.clone()),
            AgentError::Timeout(d) => AgentError::Timeout(*d),
            AgentError::Validation(s) => AgentError::Validation(s.clone()),
        }
    }
}

// A result cell whose sender is gone belongs to a session that no longer exists.
impl From<tokio::sync::oneshot::error::RecvError> for AgentError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        AgentError::SessionClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Timed out after 5s");
        assert_eq!(
            AgentError::protocol("missing type").to_string(),
            "Protocol error: missing type"
        );
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(AgentError::ConnectionClosed.kind(), ErrorKind::Connection);
        assert_eq!(
            AgentError::Authentication("401".into()).kind(),
            ErrorKind::Authentication
        );
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(AgentError::from(json_err).kind(), ErrorKind::Protocol);
        assert_eq!(AgentError::SessionClosed.kind(), ErrorKind::Session);
        assert_eq!(AgentError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            AgentError::ToolExecution("boom".into()).kind(),
            ErrorKind::ToolExecution
        );
        assert_eq!(ErrorKind::ToolExecution.to_string(), "tool_execution");
    }

    #[test]
    fn test_clone_keeps_kind() {
        let io = AgentError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe gone",
        ));
        let copy = io.clone();
        assert_eq!(copy.kind(), ErrorKind::Connection);
        assert!(copy.to_string().contains("pipe gone"));

        let json_err = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
        assert_eq!(AgentError::from(json_err).clone().kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_dropped_result_cell_is_session_closed() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        drop(tx);
        let err = AgentError::from(rx.await.unwrap_err());
        assert!(matches!(err, AgentError::SessionClosed));
        assert_eq!(err.kind(), ErrorKind::Session);
    }

    #[test]
    fn test_is_fatal() {
        assert!(AgentError::ConnectionClosed.is_fatal());
        assert!(AgentError::SessionClosed.is_fatal());
        assert!(!AgentError::Timeout(Duration::from_secs(30)).is_fatal());
        assert!(!AgentError::protocol("bad frame").is_fatal());
    }
}
