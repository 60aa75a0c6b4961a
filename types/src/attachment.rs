//! Context items the user attaches to the next message.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    #[default]
    File,
    Directory,
}

/// One attached item. `value` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttachedContext {
    File {
        value: String,
        #[serde(rename = "displayText")]
        display_text: String,
        kind: FileKind,
    },
    Image {
        value: String,
        #[serde(rename = "displayText")]
        display_text: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
    SlashCommand {
        value: String,
        #[serde(rename = "displayText")]
        display_text: String,
        description: String,
    },
}

impl AttachedContext {
    /// A file or directory reference shown as `@path`.
    pub fn file(path: impl Into<String>, kind: FileKind) -> Self {
        let path = path.into();
        AttachedContext::File {
            display_text: format!("@{path}"),
            value: path,
            kind,
        }
    }

    /// An inline image keyed by its data.
    pub fn image(
        display_text: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        let data = data.into();
        AttachedContext::Image {
            value: data.clone(),
            display_text: display_text.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn slash_command(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        let key = format!("/{}", name.trim_start_matches('/'));
        AttachedContext::SlashCommand {
            display_text: key.clone(),
            value: key,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            AttachedContext::File { value, .. }
            | AttachedContext::Image { value, .. }
            | AttachedContext::SlashCommand { value, .. } => value,
        }
    }

    #[must_use]
    pub fn display_text(&self) -> &str {
        match self {
            AttachedContext::File { display_text, .. }
            | AttachedContext::Image { display_text, .. }
            | AttachedContext::SlashCommand { display_text, .. } => display_text,
        }
    }
}

/// Borrowed file projection for the prompt builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileRef<'a> {
    pub path: &'a str,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlashCommandRef<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

/// Borrowed image projection, shaped as an image message part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageRef<'a> {
    #[serde(rename = "type")]
    pub part_type: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'a str,
    pub data: &'a str,
}

impl<'a> ImageRef<'a> {
    #[must_use]
    pub fn new(mime_type: &'a str, data: &'a str) -> Self {
        Self {
            part_type: "image",
            mime_type,
            data,
        }
    }
}
