//! Wire-to-UI message reconciliation.
//!
//! Every inbound wire message goes through [`reconcile`] in arrival order.
//! Assistant messages become new entries with their tool proposals rewritten
//! to [`ToolCallPart`]s. Tool messages never become entries: their results are
//! merged into the tool calls of the most recent entry, which must be an
//! assistant message that proposed them. Tool call ids are unique across the
//! whole history, so a result can only ever name one call.
//!
//! The output depends only on the input sequence and the current tail, so
//! replaying a transcript always rebuilds the same history.

use std::collections::HashSet;

use parley_types::{
    AssistantContent, AssistantPart, AssistantWireMessage, ToolCallPart, ToolResolution,
    ToolWireMessage, UiAssistantMessage, UiAssistantPart, UiMessage, WireMessage,
};

use crate::errors::ProtocolError;

/// What happened to the history for one reconciled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Appended,
    /// Tool results merged into the last entry; `resolved` counts transitions.
    Merged { resolved: usize },
}

pub fn reconcile(
    history: &mut Vec<UiMessage>,
    message: WireMessage,
) -> Result<Reconciled, ProtocolError> {
    match message {
        WireMessage::Assistant(assistant) => {
            let assistant = assistant_to_ui(assistant);
            check_tool_call_ids(history, &assistant)?;
            history.push(UiMessage::Assistant(assistant));
            Ok(Reconciled::Appended)
        }
        WireMessage::Tool(tool) => merge_tool_results(history, tool),
        WireMessage::User(user) => {
            history.push(UiMessage::User(user));
            Ok(Reconciled::Appended)
        }
        WireMessage::System(system) => {
            history.push(UiMessage::System(system));
            Ok(Reconciled::Appended)
        }
    }
}

/// Rebuild a history from a full transcript. Stops at the first violation.
pub fn reconcile_all(
    messages: impl IntoIterator<Item = WireMessage>,
) -> Result<Vec<UiMessage>, ProtocolError> {
    let mut history = Vec::new();
    for message in messages {
        reconcile(&mut history, message)?;
    }
    Ok(history)
}

#[must_use]
pub fn assistant_to_ui(message: AssistantWireMessage) -> UiAssistantMessage {
    let content = match message.content {
        AssistantContent::Text(text) => vec![UiAssistantPart::Text { text }],
        AssistantContent::Parts(parts) => parts.into_iter().map(part_to_ui).collect(),
    };
    UiAssistantMessage {
        content,
        model: message.model,
        meta: message.meta,
    }
}

fn check_tool_call_ids(
    history: &[UiMessage],
    message: &UiAssistantMessage,
) -> Result<(), ProtocolError> {
    if !message.has_tool_calls() {
        return Ok(());
    }
    let mut seen: HashSet<&str> = history
        .iter()
        .filter_map(UiMessage::as_assistant)
        .flat_map(UiAssistantMessage::tool_calls)
        .map(|call| call.id.as_str())
        .collect();
    for call in message.tool_calls() {
        if !seen.insert(call.id.as_str()) {
            return Err(ProtocolError::DuplicateToolCall {
                id: call.id.clone(),
            });
        }
    }
    Ok(())
}

fn part_to_ui(part: AssistantPart) -> UiAssistantPart {
    match part {
        AssistantPart::Text { text } => UiAssistantPart::Text { text },
        AssistantPart::Reasoning { text } => UiAssistantPart::Reasoning { text },
        AssistantPart::ToolUse {
            id,
            name,
            input,
            description,
        } => UiAssistantPart::Tool(ToolCallPart::proposed(id, name, input, description)),
    }
}

fn merge_tool_results(
    history: &mut [UiMessage],
    tool: ToolWireMessage,
) -> Result<Reconciled, ProtocolError> {
    let Some(last) = history.last_mut() else {
        return Err(ProtocolError::ToolResultWithoutHistory);
    };
    let found = last.role_str();
    let UiMessage::Assistant(assistant) = last else {
        return Err(ProtocolError::ToolResultAfterNonAssistant { found });
    };
    if !assistant.has_tool_calls() {
        return Err(ProtocolError::ToolResultWithoutToolUse);
    }

    // Pairs apply in order to one copy; the entry is only replaced if all succeed.
    let mut updated = assistant.clone();
    let mut resolved = 0;
    for pair in tool.content {
        let Some(call) = updated.tool_call_mut(&pair.tool_call_id) else {
            return Err(ProtocolError::UnknownToolCall {
                tool_call_id: pair.tool_call_id,
            });
        };
        match call.resolve(pair.result) {
            ToolResolution::Resolved => resolved += 1,
            ToolResolution::AlreadyResolved => {
                tracing::debug!(
                    tool_call_id = %pair.tool_call_id,
                    "tool call already resolved; keeping first result"
                );
            }
        }
    }
    *assistant = updated;

    Ok(Reconciled::Merged { resolved })
}
