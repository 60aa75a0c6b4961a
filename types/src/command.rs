//! Slash-command registry entries and parsed invocations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlashCommandKind {
    /// Runs on the backend and produces local transcript output only.
    Local,
    /// Expands into a prompt that starts a model turn.
    Prompt,
    /// Needs a UI surface this engine does not drive.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommandInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: SlashCommandKind,
}

/// A `/name args` line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashInvocation {
    pub name: String,
    pub args: String,
}

impl SlashInvocation {
    /// The invocation as typed, normalized to a single space before args.
    #[must_use]
    pub fn as_input(&self) -> String {
        if self.args.is_empty() {
            format!("/{}", self.name)
        } else {
            format!("/{} {}", self.name, self.args)
        }
    }
}
