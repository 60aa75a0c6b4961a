//! Backend-initiated traffic: `message` and `chunk` events and approval
//! requests.
//!
//! Callbacks hold a [`Weak`] reference so the transport never keeps a torn
//! down session alive.

use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use serde_json::Value;

use parley_types::{
    AppStatus, ApprovalCategory, ApprovalOutcome, ChunkEvent, MessageEvent, ToolUse,
};

use super::Shared;
use crate::approval::ApprovalTicket;
use crate::errors::{EngineError, ProtocolError};
use crate::reconcile::{Reconciled, reconcile};
use crate::transport::{ApprovalHandler, EventHandler};

impl Shared {
    pub(crate) fn message_handler(self: &Arc<Self>) -> EventHandler {
        let shared = Arc::downgrade(self);
        Arc::new(move |payload: Value| {
            Weak::upgrade(&shared).map_or(Ok(()), |shared| shared.on_message(payload))
        })
    }

    pub(crate) fn chunk_handler(self: &Arc<Self>) -> EventHandler {
        let shared = Arc::downgrade(self);
        Arc::new(move |payload: Value| {
            Weak::upgrade(&shared).map_or(Ok(()), |shared| shared.on_chunk(payload))
        })
    }

    pub(crate) fn approval_handler(self: &Arc<Self>) -> ApprovalHandler {
        let shared = Arc::downgrade(self);
        Arc::new(move |tool_use: ToolUse, category: ApprovalCategory| {
            let shared = Weak::clone(&shared);
            async move {
                // No strong reference may be held while parked on the ticket.
                let ticket = match Weak::upgrade(&shared) {
                    Some(shared) => shared.open_approval(tool_use, category)?,
                    None => return Ok(ApprovalOutcome { approved: false }),
                };
                let result = ticket.wait().await;
                Ok::<_, EngineError>(ApprovalOutcome {
                    approved: result.is_approved(),
                })
            }
            .boxed()
        })
    }

    pub(crate) fn on_message(&self, payload: Value) -> Result<(), EngineError> {
        let event: MessageEvent = serde_json::from_value(payload)
            .map_err(|err| malformed("message", &err))?;
        let role = event.message.role();

        let reconciled = self.update(|record| {
            let Some(key) = record.key() else {
                return Ok(None);
            };
            if !event.is_for(&key.session_id, &key.cwd) {
                return Ok(None);
            }
            let reconciled = reconcile(&mut record.messages, event.message)?;
            // A merged result means the tool finished; the turn continues.
            if matches!(reconciled, Reconciled::Merged { .. })
                && record.status == AppStatus::ToolExecuting
            {
                record.status = AppStatus::Processing;
            }
            Ok(Some(reconciled))
        });

        match reconciled {
            Ok(Some(reconciled)) => {
                tracing::debug!(role = role.as_str(), ?reconciled, "message reconciled");
                Ok(())
            }
            Ok(None) => {
                tracing::debug!(role = role.as_str(), "message event for another session ignored");
                Ok(())
            }
            Err(err) => {
                tracing::error!(role = role.as_str(), %err, "protocol violation in message event");
                Err(EngineError::Protocol(err))
            }
        }
    }

    pub(crate) fn on_chunk(&self, payload: Value) -> Result<(), EngineError> {
        let event: ChunkEvent =
            serde_json::from_value(payload).map_err(|err| malformed("chunk", &err))?;

        let current = self.read(|record| {
            record
                .key()
                .is_some_and(|key| event.is_for(&key.session_id, &key.cwd))
        });
        if !current {
            tracing::debug!(session_id = %event.session_id, "chunk for another session ignored");
            return Ok(());
        }

        let tokens = self.counter.count_chunk(&event.chunk);
        if tokens > 0 {
            self.update(|record| {
                record.processing_tokens = record.processing_tokens.saturating_add(u64::from(tokens));
            });
        }
        Ok(())
    }

    fn open_approval(
        &self,
        tool_use: ToolUse,
        category: ApprovalCategory,
    ) -> Result<ApprovalTicket, ProtocolError> {
        let tool = tool_use.name.clone();
        let ticket = self
            .approvals
            .open(tool_use, category)
            .inspect_err(|err| tracing::error!(%err, "overlapping approval request rejected"))?;

        self.update(|record| {
            if record.status.is_cycle_active() {
                record.status = AppStatus::ToolApproving;
            }
        });
        tracing::info!(tool = %tool, ?category, "approval requested");
        Ok(ticket)
    }
}

fn malformed(event: &'static str, err: &serde_json::Error) -> EngineError {
    tracing::error!(event, %err, "malformed event payload");
    EngineError::Protocol(ProtocolError::MalformedEvent {
        event,
        message: err.to_string(),
    })
}
