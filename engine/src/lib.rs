//! Core engine for Parley - session state machine and event reconciliation.
//!
//! This crate owns the in-memory session: it reconciles backend events into
//! renderable history, runs the request cycle state machine, and gates tool
//! execution on human approval. It has no terminal dependencies; the wire
//! encoding lives behind [`Transport`].

use std::sync::{Mutex, MutexGuard, PoisonError};

mod app;
mod approval;
mod attachments;
mod commands;
mod config;
mod errors;
mod reconcile;
mod state;
mod token_counter;
mod transport;

pub use app::{CycleOutcome, Engine, EngineSettings, FileEntry, SendRequest};
pub use approval::{ApprovalCoordinator, ApprovalTicket, PendingApproval};
pub use attachments::AttachmentStore;
pub use commands::{InputKind, classify, parse_slash};
pub use config::{
    AppConfig, CONFIG_ENV, ConfigError, ParleyConfig, SummaryConfig, TelemetryConfig,
    config_path, expand_env_vars,
};
pub use errors::{ApprovalError, EngineError, InitError, ProtocolError};
pub use reconcile::{Reconciled, assistant_to_ui, reconcile, reconcile_all};
pub use state::SessionSnapshot;
pub use token_counter::TokenCounter;
pub use transport::{
    ApprovalHandler, CANCELLED_CODE, EventHandler, EventKind, RpcError, RpcResponse,
    Subscription, SubscriptionId, Transport, TransportError, TransportFut, methods,
};

pub use parley_types as types;

// ============================================================================
// Locking
// ============================================================================

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate is a plain field update, so a
/// poisoned guard still holds consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
