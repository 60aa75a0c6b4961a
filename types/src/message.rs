//! UI-renderable message model.
//!
//! `UiMessage` is what the transcript shows. Assistant entries own their tool
//! calls as parts, so a tool result lands on the part that proposed it rather
//! than becoming a separate entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::{MessageMeta, SystemWireMessage, ToolOutcome, UserWireMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum UiMessage {
    User(UserWireMessage),
    Assistant(UiAssistantMessage),
    System(SystemWireMessage),
    UiDisplay(UiDisplayMessage),
}

impl UiMessage {
    #[must_use]
    pub fn role_str(&self) -> &'static str {
        match self {
            UiMessage::User(_) => "user",
            UiMessage::Assistant(_) => "assistant",
            UiMessage::System(_) => "system",
            UiMessage::UiDisplay(_) => "ui_display",
        }
    }

    #[must_use]
    pub fn as_assistant(&self) -> Option<&UiAssistantMessage> {
        match self {
            UiMessage::Assistant(msg) => Some(msg),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_display(&self) -> Option<&UiDisplayMessage> {
        match self {
            UiMessage::UiDisplay(msg) => Some(msg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiAssistantMessage {
    pub content: Vec<UiAssistantPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub meta: MessageMeta,
}

impl UiAssistantMessage {
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.content.iter().filter_map(|part| match part {
            UiAssistantPart::Tool(call) => Some(call),
            _ => None,
        })
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    #[must_use]
    pub fn tool_call(&self, id: &str) -> Option<&ToolCallPart> {
        self.tool_calls().find(|call| call.id == id)
    }

    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallPart> {
        self.content.iter_mut().find_map(|part| match part {
            UiAssistantPart::Tool(call) if call.id == id => Some(call),
            _ => None,
        })
    }

    /// Concatenated text parts, reasoning excluded.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                UiAssistantPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiAssistantPart {
    Text { text: String },
    Reasoning { text: String },
    Tool(ToolCallPart),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    ToolUse,
    ToolResult,
}

/// Result of trying to attach an outcome to a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResolution {
    Resolved,
    /// The call already carried a result; nothing changed.
    AlreadyResolved,
}

/// A tool call rendered inside an assistant message.
///
/// Created in [`ToolCallState::ToolUse`]; [`ToolCallPart::resolve`] is the only
/// way to reach [`ToolCallState::ToolResult`], and it never goes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<ToolOutcome>,
    state: ToolCallState,
}

impl ToolCallPart {
    pub fn proposed(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
        description: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            description,
            result: None,
            state: ToolCallState::ToolUse,
        }
    }

    #[must_use]
    pub fn state(&self) -> ToolCallState {
        self.state
    }

    #[must_use]
    pub fn result(&self) -> Option<&ToolOutcome> {
        self.result.as_ref()
    }

    pub fn resolve(&mut self, outcome: ToolOutcome) -> ToolResolution {
        match self.state {
            ToolCallState::ToolResult => ToolResolution::AlreadyResolved,
            ToolCallState::ToolUse => {
                self.result = Some(outcome);
                self.state = ToolCallState::ToolResult;
                ToolResolution::Resolved
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayKind {
    Info,
    Error,
}

/// Engine-authored transcript entry (errors, command output).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiDisplayMessage {
    pub kind: DisplayKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl UiDisplayMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: DisplayKind::Error,
            text: text.into(),
            timestamp: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: DisplayKind::Info,
            text: text.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == DisplayKind::Error
    }
}
