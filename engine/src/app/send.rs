//! Input routing for [`Engine::send`].
//!
//! | Input            | Backend history first         | Then                  |
//! |------------------|-------------------------------|-----------------------|
//! | plain            | (carried by `session.send`)   | request cycle         |
//! | rich             | user message, display form    | request cycle         |
//! | `/prompt` cmd    | invocation + command output   | request cycle         |
//! | `/local` cmd     | nothing                       | local output, `idle`  |

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use parley_types::{
    AppStatus, MessageMeta, RichDelta, SlashCommandInfo, SlashCommandKind, SlashInvocation,
    UiMessage, UserContent, UserWireMessage, WireMessage,
};

use super::{CommandEntry, CycleOutcome, Engine, SendRequest, decode};
use crate::commands::{InputKind, classify};
use crate::errors::EngineError;
use crate::reconcile::reconcile;
use crate::state::{SessionKey, SessionRecord};
use crate::transport::{RpcError, call, methods};

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the user's request as a short session title. \
Reply with the title only: no quotes, no trailing punctuation, at most eight words.";

impl Engine {
    /// Route one line of user input.
    ///
    /// Backend failures end up in the transcript, not in the returned error;
    /// `Err` means the engine was misused or the backend broke a contract.
    pub async fn send(&self, text: &str, rich: Option<&RichDelta>) -> Result<(), EngineError> {
        let key = self.input_key("send")?;
        self.report_send(&key, text);

        match classify(text, rich) {
            InputKind::Plain(message) => {
                let outcome = self.run_cycle(SendRequest::text(message.clone())).await?;
                self.after_send(outcome, key, message);
            }
            InputKind::Rich { prompt, display } => {
                let message = self.user_message(prompt.clone(), Some(display));
                if let Err(err) = self.add_messages(&key, vec![message]).await {
                    self.fail_request(&key, methods::SESSION_ADD_MESSAGES, &err);
                    return Ok(());
                }
                let outcome = self.run_cycle(SendRequest::default()).await?;
                self.after_send(outcome, key, prompt);
            }
            InputKind::Slash(invocation) => self.run_slash(&key, invocation).await?,
        }
        Ok(())
    }

    /// A request that failed before any cycle could start.
    fn fail_request(&self, key: &SessionKey, method: &'static str, err: &RpcError) {
        tracing::warn!(session_id = %key.session_id, method, error = %err, "request failed");
        self.shared.update(|record| {
            record.status = AppStatus::Failed;
            record.last_error = Some(err.message.clone());
            record.push_error(err.message.clone());
        });
    }

    fn after_send(&self, outcome: CycleOutcome, key: SessionKey, prompt: String) {
        if outcome == CycleOutcome::Completed {
            self.derive_summary(key, prompt);
        }
    }

    // ------------------------------------------------------------------------
    // Slash commands
    // ------------------------------------------------------------------------

    async fn run_slash(
        &self,
        key: &SessionKey,
        invocation: SlashInvocation,
    ) -> Result<(), EngineError> {
        self.shared
            .update(|record| record.status = AppStatus::SlashCommandExecuting);
        let name = invocation.name.as_str();

        let info = match self.lookup_command(key, name).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                self.finish_slash(Some(format!("Unknown slash command: /{name}")));
                return Ok(());
            }
            Err(message) => {
                self.finish_slash(Some(format!("Failed to load /{name}: {message}")));
                return Ok(());
            }
        };
        tracing::debug!(command = name, kind = ?info.kind, "dispatching slash command");

        match info.kind {
            SlashCommandKind::Prompt => self.run_prompt_command(key, &invocation).await,
            SlashCommandKind::Local => self.run_local_command(key, &invocation).await,
            SlashCommandKind::Unsupported => {
                self.finish_slash(Some(format!("/{name} is not available in this client")));
                Ok(())
            }
        }
    }

    /// Leave `slash_command_executing`, optionally with a visible error.
    fn finish_slash(&self, error: Option<String>) {
        self.shared.update(|record| {
            if let Some(error) = error {
                record.push_error(error);
            }
            if record.status == AppStatus::SlashCommandExecuting {
                record.status = AppStatus::Idle;
            }
        });
    }

    async fn run_prompt_command(
        &self,
        key: &SessionKey,
        invocation: &SlashInvocation,
    ) -> Result<(), EngineError> {
        let name = &invocation.name;
        let typed = self.user_message(invocation.as_input(), None);
        if let Err(err) = self.add_messages(key, vec![typed]).await {
            self.finish_slash(Some(format!("Failed to run /{name}: {err}")));
            return Ok(());
        }

        let produced = match self.execute_command(key, invocation).await {
            Ok(produced) => produced,
            Err(message) => {
                self.finish_slash(Some(format!("Failed to run /{name}: {message}")));
                return Ok(());
            }
        };
        if !produced.is_empty()
            && let Err(err) = self.add_messages(key, produced).await
        {
            self.finish_slash(Some(format!("Failed to run /{name}: {err}")));
            return Ok(());
        }

        self.run_cycle(SendRequest::default()).await.map(|_| ())
    }

    async fn run_local_command(
        &self,
        key: &SessionKey,
        invocation: &SlashInvocation,
    ) -> Result<(), EngineError> {
        let produced = match self.execute_command(key, invocation).await {
            Ok(produced) => produced,
            Err(message) => {
                self.finish_slash(Some(format!(
                    "Failed to run /{}: {message}",
                    invocation.name
                )));
                return Ok(());
            }
        };

        let applied = self.shared.update(|record| {
            let applied = produced.into_iter().try_for_each(|message| match message {
                WireMessage::User(user) => {
                    record.push_info(user.display_text());
                    Ok(())
                }
                other => reconcile(&mut record.messages, other).map(|_| ()),
            });
            if record.status == AppStatus::SlashCommandExecuting {
                record.status = AppStatus::Idle;
            }
            applied
        });

        applied.map_err(|err| {
            tracing::error!(command = %invocation.name, %err, "local command output violates the tool-result contract");
            EngineError::Protocol(err)
        })
    }

    /// `Ok(None)` when the backend does not know the command.
    async fn lookup_command(
        &self,
        key: &SessionKey,
        name: &str,
    ) -> Result<Option<SlashCommandInfo>, String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Lookup {
            #[serde(default)]
            command_entry: Option<CommandEntry>,
        }

        let method = methods::SLASH_COMMAND_GET;
        let params = json!({ "cwd": key.cwd, "sessionId": key.session_id, "command": name });
        let data = call(self.transport.as_ref(), method, params)
            .await
            .map_err(|err| err.message)?;
        decode::<Lookup>(method, data)
            .map(|lookup| lookup.command_entry.map(|entry| entry.command))
            .map_err(|err| err.to_string())
    }

    async fn execute_command(
        &self,
        key: &SessionKey,
        invocation: &SlashInvocation,
    ) -> Result<Vec<WireMessage>, String> {
        #[derive(Deserialize)]
        struct Execution {
            #[serde(default)]
            messages: Vec<WireMessage>,
        }

        let method = methods::SLASH_COMMAND_EXECUTE;
        let params = json!({
            "cwd": key.cwd,
            "sessionId": key.session_id,
            "command": invocation.name,
            "args": invocation.args,
        });
        let data = call(self.transport.as_ref(), method, params)
            .await
            .map_err(|err| err.message)?;
        decode::<Execution>(method, data)
            .map(|execution| execution.messages)
            .map_err(|err| err.to_string())
    }

    // ------------------------------------------------------------------------
    // Backend history
    // ------------------------------------------------------------------------

    async fn add_messages(
        &self,
        key: &SessionKey,
        messages: Vec<WireMessage>,
    ) -> Result<(), RpcError> {
        let params = json!({
            "cwd": key.cwd,
            "sessionId": key.session_id,
            "messages": messages,
        });
        call(self.transport.as_ref(), methods::SESSION_ADD_MESSAGES, params)
            .await
            .map(|_| ())
    }

    /// A user message chained onto the newest entry of the local history.
    fn user_message(&self, prompt: String, display: Option<String>) -> WireMessage {
        let parent_uuid = self.shared.read(latest_uuid);
        WireMessage::User(UserWireMessage {
            content: UserContent::Text(prompt),
            ui_content: display,
            meta: MessageMeta {
                uuid: Some(uuid::Uuid::new_v4().to_string()),
                parent_uuid,
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            },
        })
    }

    // ------------------------------------------------------------------------
    // Background work
    // ------------------------------------------------------------------------

    fn report_send(&self, key: &SessionKey, text: &str) {
        if !self.settings.telemetry {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let params = json!({
            "cwd": key.cwd,
            "name": "send",
            "payload": { "message": text, "sessionId": key.session_id },
        });
        self.shared.spawn_background("telemetry", async move {
            if let Err(err) = call(transport.as_ref(), methods::UTILS_TELEMETRY, params).await {
                tracing::debug!(error = %err, "telemetry event dropped");
            }
        });
    }

    /// Derive and persist a title once per session.
    fn derive_summary(&self, key: SessionKey, prompt: String) {
        let config = &self.settings.summary;
        if !config.enabled || self.shared.read(|record| record.summary.is_some()) {
            return;
        }
        let max_chars = config.max_chars;
        let transport = Arc::clone(&self.transport);
        let shared = Arc::downgrade(&self.shared);

        self.shared.spawn_background("summary", async move {
            let query = json!({
                "cwd": key.cwd,
                "systemPrompt": SUMMARY_SYSTEM_PROMPT,
                "userPrompt": prompt,
            });
            let title = match call(transport.as_ref(), methods::UTILS_QUERY, query).await {
                Ok(data) => data
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|text| clean_summary(text, max_chars))
                    .unwrap_or_default(),
                Err(err) => {
                    tracing::warn!(session_id = %key.session_id, error = %err, "summary query failed");
                    return;
                }
            };
            if title.is_empty() {
                tracing::debug!(session_id = %key.session_id, "summary query returned no title");
                return;
            }

            let persist = json!({
                "cwd": key.cwd,
                "sessionId": key.session_id,
                "summary": title,
            });
            if let Err(err) = call(transport.as_ref(), methods::SESSION_SET_SUMMARY, persist).await {
                tracing::warn!(session_id = %key.session_id, error = %err, "summary could not be persisted");
                return;
            }

            if let Some(shared) = shared.upgrade() {
                shared.update(|record| {
                    if record.session_id.as_deref() == Some(key.session_id.as_str()) {
                        record.summary = Some(title);
                    }
                });
            }
        });
    }
}

fn latest_uuid(record: &SessionRecord) -> Option<String> {
    record.messages.iter().rev().find_map(|message| {
        let meta = match message {
            UiMessage::User(user) => &user.meta,
            UiMessage::Assistant(assistant) => &assistant.meta,
            UiMessage::System(system) => &system.meta,
            UiMessage::UiDisplay(_) => return None,
        };
        meta.uuid.clone()
    })
}

/// First line of a model answer, unquoted, at most `max_chars` characters.
pub(crate) fn clean_summary(text: &str, max_chars: usize) -> String {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default();
    let unquoted = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”'))
        .trim_end_matches(['.', '!'])
        .trim();
    unquoted.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
