//! Core domain types for Parley.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Wire messages arrive from the backend, UI messages are what the engine renders from
//! them, and everything else describes the session around that history.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod attachment;
mod chunk;
mod command;
mod message;
mod rich;
mod wire;

pub use attachment::{AttachedContext, FileKind, FileRef, ImageRef, SlashCommandRef};
pub use chunk::{ChunkEvent, MessageEvent, StreamChunk};
pub use command::{SlashCommandInfo, SlashCommandKind, SlashInvocation};
pub use message::{
    DisplayKind, ToolCallPart, ToolCallState, ToolResolution, UiAssistantMessage,
    UiAssistantPart, UiDisplayMessage, UiMessage,
};
pub use rich::{RichDelta, RichSegment};
pub use wire::{
    AssistantContent, AssistantPart, AssistantWireMessage, MessageMeta, SystemWireMessage,
    ToolOutcome, ToolResultPart, ToolWireMessage, UserContent, UserPart, UserWireMessage,
    WireMessage, WireRole,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Application Status
// ============================================================================

/// Authoritative status of a session.
///
/// `Idle` is both the initial status and the terminal-success status of every
/// request cycle. `Failed` and `Cancelled` end a cycle but not the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    #[default]
    Idle,
    Processing,
    Planning,
    PlanApproving,
    ToolApproving,
    ToolExecuting,
    Compacting,
    Failed,
    Cancelled,
    SlashCommandExecuting,
    Help,
    Exit,
}

impl AppStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AppStatus::Idle => "idle",
            AppStatus::Processing => "processing",
            AppStatus::Planning => "planning",
            AppStatus::PlanApproving => "plan_approving",
            AppStatus::ToolApproving => "tool_approving",
            AppStatus::ToolExecuting => "tool_executing",
            AppStatus::Compacting => "compacting",
            AppStatus::Failed => "failed",
            AppStatus::Cancelled => "cancelled",
            AppStatus::SlashCommandExecuting => "slash_command_executing",
            AppStatus::Help => "help",
            AppStatus::Exit => "exit",
        }
    }

    /// Statuses in which the backend is actively working and a cancel is meaningful.
    #[must_use]
    pub fn is_executing(self) -> bool {
        matches!(
            self,
            AppStatus::Processing
                | AppStatus::Planning
                | AppStatus::ToolExecuting
                | AppStatus::Compacting
        )
    }

    /// True while a request cycle is in flight, including the approval sub-phases.
    #[must_use]
    pub fn is_cycle_active(self) -> bool {
        self.is_executing() || matches!(self, AppStatus::ToolApproving | AppStatus::PlanApproving)
    }

    /// True when a new user turn may start from this status.
    #[must_use]
    pub fn accepts_input(self) -> bool {
        matches!(
            self,
            AppStatus::Idle | AppStatus::Failed | AppStatus::Cancelled | AppStatus::Help
        )
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-phase the backend may announce while a cycle is active.
///
/// Kept separate from [`AppStatus`] so an announcement can never name a
/// terminal or idle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Processing,
    Planning,
    PlanApproving,
    ToolApproving,
    ToolExecuting,
    Compacting,
}

impl From<CyclePhase> for AppStatus {
    fn from(phase: CyclePhase) -> Self {
        match phase {
            CyclePhase::Processing => AppStatus::Processing,
            CyclePhase::Planning => AppStatus::Planning,
            CyclePhase::PlanApproving => AppStatus::PlanApproving,
            CyclePhase::ToolApproving => AppStatus::ToolApproving,
            CyclePhase::ToolExecuting => AppStatus::ToolExecuting,
            CyclePhase::Compacting => AppStatus::Compacting,
        }
    }
}

// ============================================================================
// Approval Types
// ============================================================================

/// Session-level policy for interactive tool confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalMode {
    /// Prompt before side-effecting tools.
    #[default]
    Default,
    /// Edits are auto-approved.
    AutoEdit,
    /// Everything is auto-approved.
    Yolo,
}

impl ApprovalMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalMode::Default => "default",
            ApprovalMode::AutoEdit => "autoEdit",
            ApprovalMode::Yolo => "yolo",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown approval mode: {0}")]
pub struct ParseApprovalModeError(pub String);

impl FromStr for ApprovalMode {
    type Err = ParseApprovalModeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "default" => Ok(ApprovalMode::Default),
            "autoEdit" | "auto_edit" | "auto-edit" => Ok(ApprovalMode::AutoEdit),
            "yolo" => Ok(ApprovalMode::Yolo),
            other => Err(ParseApprovalModeError(other.to_string())),
        }
    }
}

/// A tool invocation the backend wants to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ToolUse {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            params,
        }
    }
}

/// Coarse classification of what a tool invocation will touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalCategory {
    Read,
    Write,
    Command,
    Network,
    Ask,
    #[serde(other)]
    Other,
}

/// The four answers a human can give to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResult {
    Approve,
    Deny,
    /// Approve and switch the session to [`ApprovalMode::AutoEdit`].
    ApproveAlwaysEdit,
    /// Approve and add the tool to the session allow-list.
    ApproveAlwaysTool,
}

impl ApprovalResult {
    #[must_use]
    pub fn is_approved(self) -> bool {
        !matches!(self, ApprovalResult::Deny)
    }
}

/// What the suspended backend caller observes once a request resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub approved: bool,
}

/// Observable view of the outstanding approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequestView {
    pub tool_use: ToolUse,
    pub category: ApprovalCategory,
}
