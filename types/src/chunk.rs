//! Backend event payloads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::wire::WireMessage;

/// Raw model-stream fragment. Only the text-bearing kinds matter to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamChunk {
    TextDelta {
        #[serde(alias = "text")]
        delta: String,
    },
    ReasoningDelta {
        #[serde(alias = "text")]
        delta: String,
    },
    #[serde(other)]
    Other,
}

impl StreamChunk {
    /// Text or reasoning increment carried by this fragment.
    #[must_use]
    pub fn increment(&self) -> Option<&str> {
        match self {
            StreamChunk::TextDelta { delta } | StreamChunk::ReasoningDelta { delta } => {
                Some(delta)
            }
            StreamChunk::Other => None,
        }
    }
}

/// Payload of a `chunk` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEvent {
    pub session_id: String,
    pub cwd: PathBuf,
    pub chunk: StreamChunk,
}

impl ChunkEvent {
    #[must_use]
    pub fn is_for(&self, session_id: &str, cwd: &Path) -> bool {
        self.session_id == session_id && self.cwd == cwd
    }
}

/// Payload of a `message` event.
///
/// Scope fields are optional; when present they must match the live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub message: WireMessage,
}

impl MessageEvent {
    #[must_use]
    pub fn is_for(&self, session_id: &str, cwd: &Path) -> bool {
        self.session_id.as_deref().is_none_or(|id| id == session_id)
            && self.cwd.as_deref().is_none_or(|dir| dir == cwd)
    }
}
