//! Single-slot approval gate.
//!
//! The backend's approval call parks on a oneshot receiver; the UI's decision
//! fills the matching sender. The slot holds at most one request, and taking
//! the sender out of the slot is what makes resolution happen at most once.
//!
//! A claimed request stays in the slot while the decision's side effect runs,
//! so a second request is still rejected and teardown can still deny it.
//!
//! ```text
//! open() ──> [pending] ──claim()──> [claimed] ──finish(result)──> waiter resumes
//!                │                      │
//!                └──────────────────────┴── deny_outstanding() ──> waiter reads Deny
//! ```

use std::sync::Mutex;

use tokio::sync::oneshot;

use parley_types::{ApprovalCategory, ApprovalRequestView, ApprovalResult, ToolUse};

use crate::errors::ProtocolError;
use crate::lock;

#[derive(Debug, Default)]
pub struct ApprovalCoordinator {
    slot: Mutex<Option<PendingApproval>>,
}

/// An outstanding request with its single-use continuation.
#[derive(Debug)]
pub struct PendingApproval {
    view: ApprovalRequestView,
    responder: oneshot::Sender<ApprovalResult>,
    claimed: bool,
}

impl PendingApproval {
    #[must_use]
    pub fn view(&self) -> &ApprovalRequestView {
        &self.view
    }

    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.view.tool_use.name
    }

    /// Invoke the continuation. Consumes the request.
    pub fn resolve(self, result: ApprovalResult) {
        if self.responder.send(result).is_err() {
            tracing::debug!(
                tool = %self.view.tool_use.name,
                "approval waiter went away before the decision arrived"
            );
        }
    }
}

/// Waiting side of a request.
#[derive(Debug)]
pub struct ApprovalTicket {
    receiver: oneshot::Receiver<ApprovalResult>,
}

impl ApprovalTicket {
    /// A dropped sender reads as [`ApprovalResult::Deny`].
    pub async fn wait(self) -> ApprovalResult {
        self.receiver.await.unwrap_or(ApprovalResult::Deny)
    }
}

impl ApprovalCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a new request. A second request while one is outstanding is a
    /// backend contract breach and is rejected, not queued.
    pub fn open(
        &self,
        tool_use: ToolUse,
        category: ApprovalCategory,
    ) -> Result<ApprovalTicket, ProtocolError> {
        let mut slot = lock(&self.slot);
        if let Some(pending) = slot.as_ref() {
            return Err(ProtocolError::ApprovalAlreadyPending {
                tool: tool_use.name,
                pending: pending.tool_name().to_string(),
            });
        }

        let (responder, receiver) = oneshot::channel();
        *slot = Some(PendingApproval {
            view: ApprovalRequestView { tool_use, category },
            responder,
            claimed: false,
        });
        Ok(ApprovalTicket { receiver })
    }

    pub fn take(&self) -> Option<PendingApproval> {
        lock(&self.slot).take()
    }

    /// Mark the outstanding request as being decided. `None` when nothing is
    /// outstanding or another caller already claimed it.
    pub fn claim(&self) -> Option<ApprovalRequestView> {
        let mut slot = lock(&self.slot);
        let pending = slot.as_mut().filter(|pending| !pending.claimed)?;
        pending.claimed = true;
        Some(pending.view.clone())
    }

    /// Deliver the decision for a claimed request. Returns `false` when the
    /// request was denied out from under the claim.
    pub fn finish(&self, result: ApprovalResult) -> bool {
        let pending = {
            let mut slot = lock(&self.slot);
            if !slot.as_ref().is_some_and(|pending| pending.claimed) {
                return false;
            }
            slot.take()
        };
        match pending {
            Some(pending) => {
                pending.resolve(result);
                true
            }
            None => false,
        }
    }

    /// The request awaiting a decision. Claimed requests are not shown.
    #[must_use]
    pub fn view(&self) -> Option<ApprovalRequestView> {
        lock(&self.slot)
            .as_ref()
            .filter(|pending| !pending.claimed)
            .map(|pending| pending.view.clone())
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Resolve whatever is outstanding as denied. Returns whether anything was.
    pub fn deny_outstanding(&self) -> bool {
        match self.take() {
            Some(pending) => {
                tracing::info!(tool = %pending.tool_name(), "denying outstanding approval on teardown");
                pending.resolve(ApprovalResult::Deny);
                true
            }
            None => false,
        }
    }
}
