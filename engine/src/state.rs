//! Session record and its published projection.

use std::path::PathBuf;

use serde::Serialize;

use parley_types::{
    AppStatus, ApprovalMode, ApprovalRequestView, UiDisplayMessage, UiMessage,
};

/// The one live session. Only engine operations write it.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionRecord {
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) session_id: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) approval_mode: ApprovalMode,
    pub(crate) plan_mode: bool,
    pub(crate) status: AppStatus,
    pub(crate) messages: Vec<UiMessage>,
    pub(crate) processing_tokens: u64,
    pub(crate) last_error: Option<String>,
    pub(crate) loading: bool,
    pub(crate) summary: Option<String>,
    /// Generation of the request cycle that currently owns `status`.
    pub(crate) cycle: u64,
}

/// Session identity needed to address the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionKey {
    pub(crate) cwd: PathBuf,
    pub(crate) session_id: String,
}

impl SessionRecord {
    pub(crate) fn key(&self) -> Option<SessionKey> {
        Some(SessionKey {
            cwd: self.cwd.clone()?,
            session_id: self.session_id.clone()?,
        })
    }

    pub(crate) fn push_display(&mut self, display: UiDisplayMessage) {
        self.messages.push(UiMessage::UiDisplay(
            display.with_timestamp(chrono::Utc::now().to_rfc3339()),
        ));
    }

    pub(crate) fn push_error(&mut self, text: impl Into<String>) {
        self.push_display(UiDisplayMessage::error(text));
    }

    pub(crate) fn push_info(&mut self, text: impl Into<String>) {
        self.push_display(UiDisplayMessage::info(text));
    }

    /// Clear every field. The generation still advances, so a completion
    /// from before the reset is recognized as stale.
    pub(crate) fn reset(&mut self) {
        let cycle = self.cycle + 1;
        *self = SessionRecord {
            cycle,
            ..SessionRecord::default()
        };
    }
}

/// Read-only view published to observers after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub cwd: Option<PathBuf>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub approval_mode: ApprovalMode,
    pub plan_mode: bool,
    pub status: AppStatus,
    pub messages: Vec<UiMessage>,
    pub processing_tokens: u64,
    pub last_error: Option<String>,
    pub loading: bool,
    pub summary: Option<String>,
    /// The request awaiting a decision, if any.
    pub approval: Option<ApprovalRequestView>,
    pub attachments: usize,
}

impl SessionSnapshot {
    pub(crate) fn capture(
        record: &SessionRecord,
        approval: Option<ApprovalRequestView>,
        attachments: usize,
    ) -> Self {
        Self {
            cwd: record.cwd.clone(),
            session_id: record.session_id.clone(),
            model: record.model.clone(),
            approval_mode: record.approval_mode,
            plan_mode: record.plan_mode,
            status: record.status,
            messages: record.messages.clone(),
            processing_tokens: record.processing_tokens,
            last_error: record.last_error.clone(),
            loading: record.loading,
            summary: record.summary.clone(),
            approval,
            attachments,
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.session_id.is_some()
    }

    /// The newest visible error, if the history has one.
    #[must_use]
    pub fn last_display_error(&self) -> Option<&UiDisplayMessage> {
        self.messages
            .iter()
            .rev()
            .filter_map(UiMessage::as_display)
            .find(|display| display.is_error())
    }
}
