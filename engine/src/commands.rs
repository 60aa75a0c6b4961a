//! Input classification for `send`.
//!
//! Input is one of three things: a plain message, rich text that needs its
//! prompt and display forms kept apart, or a `/name args` slash command.

use std::sync::LazyLock;

use regex::Regex;

use parley_types::{RichDelta, SlashInvocation};

static SLASH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([^\s/]+)(?:\s+([\s\S]*))?$").expect("slash pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Plain(String),
    Rich { prompt: String, display: String },
    Slash(SlashInvocation),
}

/// Parse `/name args`. Paths such as `/usr/bin` and bare `/` are not commands.
#[must_use]
pub fn parse_slash(input: &str) -> Option<SlashInvocation> {
    let captures = SLASH_PATTERN.captures(input.trim())?;
    let name = captures.get(1)?.as_str().to_string();
    let args = captures
        .get(2)
        .map(|args| args.as_str().trim().to_string())
        .unwrap_or_default();
    Some(SlashInvocation { name, args })
}

/// The slash check runs on the prompt form, so a command typed through the
/// rich composer still routes as a command.
#[must_use]
pub fn classify(text: &str, rich: Option<&RichDelta>) -> InputKind {
    let rich = rich.filter(|delta| delta.has_embeds());
    let prompt = rich.map_or_else(|| text.to_string(), RichDelta::render_prompt);

    if let Some(invocation) = parse_slash(&prompt) {
        return InputKind::Slash(invocation);
    }

    match rich {
        Some(delta) => InputKind::Rich {
            prompt,
            display: delta.render_display(),
        },
        None => InputKind::Plain(prompt),
    }
}
