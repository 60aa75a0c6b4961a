//! Structured user input.
//!
//! The composer hands the engine a `RichDelta` alongside the plain text when
//! the input holds embedded segments (pastes, mentions, images). The delta can
//! be rendered two ways: the prompt form the model sees and the display form
//! the transcript shows.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichSegment {
    Text { text: String },
    /// Pasted block, collapsed in the display form.
    Paste { id: u32, content: String },
    /// File or directory mention.
    Mention { path: String },
    /// Image placeholder such as `[Image #1]`.
    Image { placeholder: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichDelta {
    pub segments: Vec<RichSegment>,
}

impl RichDelta {
    #[must_use]
    pub fn new(segments: Vec<RichSegment>) -> Self {
        Self { segments }
    }

    /// True when any segment is more than plain text.
    #[must_use]
    pub fn has_embeds(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| !matches!(segment, RichSegment::Text { .. }))
    }

    /// Prompt form: pastes expanded, mentions as `@path`.
    #[must_use]
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            push_prompt(&mut out, segment);
        }
        out
    }

    /// Display form: pastes collapsed to a one-line marker.
    #[must_use]
    pub fn render_display(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                RichSegment::Paste { id, content } => {
                    let lines = content.lines().count().max(1);
                    out.push_str(&format!("[Pasted text #{id} +{lines} lines]"));
                }
                other => push_prompt(&mut out, other),
            }
        }
        out
    }
}

fn push_prompt(out: &mut String, segment: &RichSegment) {
    match segment {
        RichSegment::Text { text } => out.push_str(text),
        RichSegment::Paste { content, .. } => out.push_str(content),
        RichSegment::Mention { path } => {
            out.push('@');
            out.push_str(path);
        }
        RichSegment::Image { placeholder } => out.push_str(placeholder),
    }
}
