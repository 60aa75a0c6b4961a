//! Backend wire messages.
//!
//! These mirror what the backend keeps in its own history and streams through
//! `message` events. Keys are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bookkeeping shared by every wire message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireRole {
    System,
    User,
    Assistant,
    Tool,
}

impl WireRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WireRole::System => "system",
            WireRole::User => "user",
            WireRole::Assistant => "assistant",
            WireRole::Tool => "tool",
        }
    }
}

/// One message as the backend sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum WireMessage {
    System(SystemWireMessage),
    User(UserWireMessage),
    Assistant(AssistantWireMessage),
    Tool(ToolWireMessage),
}

impl WireMessage {
    #[must_use]
    pub fn role(&self) -> WireRole {
        match self {
            WireMessage::System(_) => WireRole::System,
            WireMessage::User(_) => WireRole::User,
            WireMessage::Assistant(_) => WireRole::Assistant,
            WireMessage::Tool(_) => WireRole::Tool,
        }
    }

    #[must_use]
    pub fn meta(&self) -> &MessageMeta {
        match self {
            WireMessage::System(msg) => &msg.meta,
            WireMessage::User(msg) => &msg.meta,
            WireMessage::Assistant(msg) => &msg.meta,
            WireMessage::Tool(msg) => &msg.meta,
        }
    }

    /// Plain user message with prompt text only.
    pub fn user_text(text: impl Into<String>) -> Self {
        WireMessage::User(UserWireMessage {
            content: UserContent::Text(text.into()),
            ui_content: None,
            meta: MessageMeta::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemWireMessage {
    pub content: String,
    #[serde(flatten)]
    pub meta: MessageMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWireMessage {
    pub content: UserContent,
    /// Display form of the input when it differs from the prompt form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_content: Option<String>,
    #[serde(flatten)]
    pub meta: MessageMeta,
}

impl UserWireMessage {
    /// Text shown in the transcript for this message.
    #[must_use]
    pub fn display_text(&self) -> String {
        match &self.ui_content {
            Some(display) => display.clone(),
            None => self.content.text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<UserPart>),
}

impl UserContent {
    /// Concatenated text parts.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            UserContent::Text(text) => text.clone(),
            UserContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    UserPart::Text { text } => Some(text.as_str()),
                    UserPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserPart {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantWireMessage {
    pub content: AssistantContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub meta: MessageMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssistantContent {
    Text(String),
    Parts(Vec<AssistantPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    /// A proposed tool invocation; not executed yet.
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolWireMessage {
    pub content: Vec<ToolResultPart>,
    #[serde(flatten)]
    pub meta: MessageMeta,
}

/// One `(toolCallId, result)` pair carried by a tool message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    pub result: ToolOutcome,
}

/// Output of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub llm_content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_display: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(llm_content: impl Into<Value>) -> Self {
        Self {
            llm_content: llm_content.into(),
            return_display: None,
            is_error: false,
        }
    }

    pub fn error(llm_content: impl Into<Value>) -> Self {
        Self {
            llm_content: llm_content.into(),
            return_display: None,
            is_error: true,
        }
    }
}
