//! Error taxonomy for the engine.
//!
//! Request failures are recovered inside the session (status `failed` plus a
//! visible error entry) and never show up here. What does show up is either a
//! broken handshake, a backend contract breach, or a misuse of the engine API.

use thiserror::Error;

use crate::transport::TransportError;

/// The handshake did not complete; the engine is not usable.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("transport connect failed: {0}")]
    Connect(#[source] TransportError),
    #[error("session.initialize failed: {0}")]
    Handshake(String),
    #[error("session.initialize transport error: {0}")]
    Transport(#[source] TransportError),
}

/// The backend broke a contract the reconciled history depends on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("tool message arrived with an empty history")]
    ToolResultWithoutHistory,
    #[error("tool message must follow an assistant message, found {found}")]
    ToolResultAfterNonAssistant { found: &'static str },
    #[error("tool message follows an assistant message with no tool calls")]
    ToolResultWithoutToolUse,
    #[error("tool result for unknown tool call {tool_call_id}")]
    UnknownToolCall { tool_call_id: String },
    #[error("tool call id {id} is already in use")]
    DuplicateToolCall { id: String },
    #[error("approval requested for {tool} while {pending} is still awaiting a decision")]
    ApprovalAlreadyPending { tool: String, pending: String },
    #[error("malformed {event} event: {message}")]
    MalformedEvent {
        event: &'static str,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no approval request is pending")]
    NothingPending,
    /// The session was torn down while the decision was being applied; the
    /// waiting caller was denied instead.
    #[error("approval request was withdrawn before the decision was delivered")]
    Withdrawn,
    /// The decision was delivered but persisting its side effect failed.
    #[error("approval recorded but {method} failed: {message}")]
    SideEffect {
        method: &'static str,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("engine is already initialized; drop the previous subscription first")]
    AlreadyInitialized,
    #[error("cannot {action} while {status}")]
    InvalidState {
        action: &'static str,
        status: parley_types::AppStatus,
    },
    #[error("{method} failed: {message}")]
    Request {
        method: &'static str,
        message: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EngineError {
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, EngineError::Protocol(_))
    }
}
