//! Transport boundary.
//!
//! The engine never sees the wire encoding. It issues JSON requests by method
//! name, receives JSON event payloads through handlers, and exposes one
//! approval handler the backend calls when a tool needs a human decision.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_types::{ApprovalCategory, ApprovalOutcome, ToolUse};

use crate::errors::EngineError;
use crate::lock;

/// Transport future type alias.
pub type TransportFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler for one event stream. Errors are raised back to the transport.
pub type EventHandler = Arc<dyn Fn(Value) -> Result<(), EngineError> + Send + Sync>;

/// The single approval callback registered with the transport.
pub type ApprovalHandler = Arc<
    dyn Fn(ToolUse, ApprovalCategory) -> TransportFut<'static, Result<ApprovalOutcome, EngineError>>
        + Send
        + Sync,
>;

/// Backend methods the engine invokes.
pub mod methods {
    pub const SESSION_INITIALIZE: &str = "session.initialize";
    pub const SESSION_SEND: &str = "session.send";
    pub const SESSION_ADD_MESSAGES: &str = "session.addMessages";
    pub const SESSION_CANCEL: &str = "session.cancel";
    pub const SESSION_SET_APPROVAL_MODE: &str = "session.config.setApprovalMode";
    pub const SESSION_ADD_APPROVAL_TOOLS: &str = "session.config.addApprovalTools";
    pub const SESSION_SET_SUMMARY: &str = "session.config.setSummary";
    pub const SLASH_COMMAND_GET: &str = "slashCommand.get";
    pub const SLASH_COMMAND_LIST: &str = "slashCommand.list";
    pub const SLASH_COMMAND_EXECUTE: &str = "slashCommand.execute";
    pub const UTILS_QUERY: &str = "utils.query";
    pub const UTILS_FILES_LIST: &str = "utils.files.list";
    pub const UTILS_TELEMETRY: &str = "utils.telemetry";
}

/// Error code the backend uses when a turn ended because it was cancelled.
pub const CANCELLED_CODE: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Chunk,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Chunk => "chunk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport closed")]
    Closed,
    #[error("{0}")]
    Failed(String),
}

/// Failure half of a response. Accepts a bare string or `{message, code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRpcError")]
pub struct RpcError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code.as_deref() == Some(CANCELLED_CODE)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        RpcError::new(err.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRpcError {
    Text(String),
    Detailed {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

impl From<RawRpcError> for RpcError {
    fn from(raw: RawRpcError) -> Self {
        match raw {
            RawRpcError::Text(message) => RpcError {
                message,
                code: None,
            },
            RawRpcError::Detailed { message, code } => RpcError { message, code },
        }
    }
}

/// `{success, data}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: RpcError) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| RpcError::new("request failed without an error message")))
        }
    }
}

/// Request/response and event plumbing to the backend process.
pub trait Transport: Send + Sync {
    fn connect(&self) -> TransportFut<'_, Result<(), TransportError>>;

    fn disconnect(&self);

    fn request(
        &self,
        method: &'static str,
        params: Value,
    ) -> TransportFut<'_, Result<RpcResponse, TransportError>>;

    fn subscribe(&self, event: EventKind, handler: EventHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Install (or clear with `None`) the approval callback.
    fn set_approval_handler(&self, handler: Option<ApprovalHandler>);
}

/// Issue a request and fold transport errors into the failure branch.
pub(crate) async fn call(
    transport: &dyn Transport,
    method: &'static str,
    params: Value,
) -> Result<Value, RpcError> {
    tracing::debug!(method, "request");
    match transport.request(method, params).await {
        Ok(response) => response.into_result(),
        Err(err) => Err(err.into()),
    }
}

/// Event subscriptions registered by one `initialize`. Released exactly once,
/// by whichever of the handle or `destroy` gets there first.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionSet {
    ids: Mutex<Vec<SubscriptionId>>,
}

impl SubscriptionSet {
    pub(crate) fn new(ids: Vec<SubscriptionId>) -> Self {
        Self {
            ids: Mutex::new(ids),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        !lock(&self.ids).is_empty()
    }

    pub(crate) fn release(&self, transport: &dyn Transport) -> usize {
        let ids: Vec<_> = lock(&self.ids).drain(..).collect();
        for id in &ids {
            transport.unsubscribe(*id);
        }
        ids.len()
    }
}

/// Teardown handle for the event streams registered by `initialize`.
///
/// Unsubscribes on [`Subscription::unsubscribe`] or when dropped.
pub struct Subscription {
    transport: Arc<dyn Transport>,
    set: Arc<SubscriptionSet>,
}

impl Subscription {
    pub(crate) fn new(transport: Arc<dyn Transport>, set: Arc<SubscriptionSet>) -> Self {
        Self { transport, set }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.set.is_live()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let released = self.set.release(self.transport.as_ref());
        if released > 0 {
            tracing::debug!(released, "event subscriptions released");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
