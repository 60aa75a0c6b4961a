//! The session engine.
//!
//! [`Engine`] is a cheap handle over shared session state. The UI drives it
//! serially, but `cancel` and `resolve_approval` are expected to run while a
//! `send` is still awaiting the backend, so every operation takes `&self` and
//! the session record lives behind a mutex that is never held across an await.

mod events;
mod send;


use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use parley_types::{
    AppStatus, ApprovalMode, ApprovalResult, AttachedContext, CyclePhase, FileKind,
    SlashCommandInfo, WireMessage,
};

use crate::approval::ApprovalCoordinator;
use crate::attachments::AttachmentStore;
use crate::config::{ParleyConfig, SummaryConfig};
use crate::errors::{ApprovalError, EngineError, InitError};
use crate::lock;
use crate::reconcile::reconcile_all;
use crate::state::{SessionKey, SessionRecord, SessionSnapshot};
use crate::token_counter::TokenCounter;
use crate::transport::{
    EventKind, Subscription, SubscriptionSet, Transport, call, methods,
};

// ============================================================================
// Settings
// ============================================================================

/// Engine-level defaults, usually derived from [`ParleyConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_model: Option<String>,
    pub default_approval_mode: ApprovalMode,
    pub telemetry: bool,
    pub summary: SummaryConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_model: None,
            default_approval_mode: ApprovalMode::Default,
            telemetry: true,
            summary: SummaryConfig::default(),
        }
    }
}

impl EngineSettings {
    #[must_use]
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            default_model: config.model().map(str::to_string),
            default_approval_mode: config.approval_mode(),
            telemetry: config.telemetry_enabled(),
            summary: config.summary(),
        }
    }

    /// No background telemetry or summary tasks.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            telemetry: false,
            summary: SummaryConfig {
                enabled: false,
                ..SummaryConfig::default()
            },
            ..Self::default()
        }
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Parameters for one `session.send`. Unset fields fall back to the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    pub message: Option<String>,
    pub plan_mode: Option<bool>,
    pub model: Option<String>,
}

impl SendRequest {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// How a request cycle ended, as far as this engine is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Failed,
    Cancelled,
    /// The cycle was cancelled or the session torn down before the backend
    /// answered; status was left alone.
    Superseded,
}

/// One entry of a `utils.files.list` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: FileKind,
}

impl FileEntry {
    #[must_use]
    pub fn into_attachment(self) -> AttachedContext {
        AttachedContext::file(self.path, self.kind)
    }
}

#[derive(Debug, Deserialize)]
struct CommandEntry {
    command: SlashCommandInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Handshake {
    model: Option<String>,
    approval_mode: Option<ApprovalMode>,
    plan_mode: Option<bool>,
    summary: Option<String>,
}

/// Decode response data, treating `null` as an empty object.
pub(crate) fn decode<T: DeserializeOwned>(
    method: &'static str,
    data: Value,
) -> Result<T, EngineError> {
    let data = if data.is_null() { json!({}) } else { data };
    serde_json::from_value(data).map_err(|err| EngineError::Request {
        method,
        message: format!("malformed response: {err}"),
    })
}

// ============================================================================
// Shared state
// ============================================================================

/// State reachable from both the engine handle and the transport callbacks.
pub(crate) struct Shared {
    session: Mutex<SessionRecord>,
    approvals: ApprovalCoordinator,
    attachments: Mutex<AttachmentStore>,
    counter: TokenCounter,
    snapshots: watch::Sender<SessionSnapshot>,
    subscription: Mutex<Option<Arc<SubscriptionSet>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn new() -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        Self {
            session: Mutex::new(SessionRecord::default()),
            approvals: ApprovalCoordinator::new(),
            attachments: Mutex::new(AttachmentStore::new()),
            counter: TokenCounter::new(),
            snapshots,
            subscription: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Mutate the session record, then publish a fresh snapshot.
    pub(crate) fn update<R>(&self, mutate: impl FnOnce(&mut SessionRecord) -> R) -> R {
        let result = mutate(&mut lock(&self.session));
        self.publish();
        result
    }

    pub(crate) fn read<R>(&self, inspect: impl FnOnce(&SessionRecord) -> R) -> R {
        inspect(&lock(&self.session))
    }

    pub(crate) fn publish(&self) {
        let approval = self.approvals.view();
        let attachments = lock(&self.attachments).len();
        let snapshot = SessionSnapshot::capture(&lock(&self.session), approval, attachments);
        self.snapshots.send_replace(snapshot);
    }

    fn subscription_live(&self) -> bool {
        lock(&self.subscription)
            .as_ref()
            .is_some_and(|set| set.is_live())
    }

    /// Fire-and-forget work tied to this session. Skipped outside a runtime.
    pub(crate) fn spawn_background(
        &self,
        task: &'static str,
        future: impl Future<Output = ()> + Send + 'static,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(task, "no async runtime; background task skipped");
            return;
        };
        let handle = runtime.spawn(future);
        let mut tasks = lock(&self.background);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn abort_background(&self) {
        for task in lock(&self.background).drain(..) {
            task.abort();
        }
    }
}

/// Clears the loading flag on every exit path of a cycle, unless a later
/// cycle has taken the flag over.
struct LoadingGuard<'a> {
    shared: &'a Shared,
    cycle: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.shared.update(|record| {
            if record.cycle == self.cycle {
                record.loading = false;
            }
        });
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Clone)]
pub struct Engine {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    settings: Arc<EngineSettings>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("status", &self.status())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, settings: EngineSettings) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared::new()),
            settings: Arc::new(settings),
        }
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: &ParleyConfig) -> Self {
        Self::new(transport, EngineSettings::from_config(config))
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// A receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> AppStatus {
        self.shared.read(|record| record.status)
    }

    fn require_key(&self) -> Result<SessionKey, EngineError> {
        self.shared
            .read(SessionRecord::key)
            .ok_or(EngineError::NotInitialized)
    }

    /// Session key, provided the current status accepts new input.
    fn input_key(&self, action: &'static str) -> Result<SessionKey, EngineError> {
        self.shared.read(|record| {
            let key = record.key().ok_or(EngineError::NotInitialized)?;
            if record.status.accepts_input() {
                Ok(key)
            } else {
                Err(EngineError::InvalidState {
                    action,
                    status: record.status,
                })
            }
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Connect, handshake, seed history from `prior`, and start listening.
    ///
    /// Nothing is retained if any step fails. The returned handle must be
    /// dropped (or [`Subscription::unsubscribe`]d) before initializing again.
    pub async fn initialize(
        &self,
        cwd: impl Into<PathBuf>,
        session_id: impl Into<String>,
        prior: Vec<WireMessage>,
    ) -> Result<Subscription, EngineError> {
        let cwd = cwd.into();
        let session_id = session_id.into();
        if self.shared.subscription_live() {
            return Err(EngineError::AlreadyInitialized);
        }

        self.transport
            .connect()
            .await
            .map_err(InitError::Connect)?;

        let handshake = match self.handshake(&cwd, &session_id).await {
            Ok(handshake) => handshake,
            Err(err) => {
                tracing::warn!(session_id = %session_id, %err, "session handshake failed");
                self.transport.disconnect();
                return Err(err.into());
            }
        };
        let messages = match reconcile_all(prior) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::error!(session_id = %session_id, %err, "prior history violates the tool-result contract");
                self.transport.disconnect();
                return Err(err.into());
            }
        };
        let history_len = messages.len();

        self.shared.update(|record| {
            record.reset();
            record.cwd = Some(cwd.clone());
            record.session_id = Some(session_id.clone());
            record.model = handshake
                .model
                .or_else(|| self.settings.default_model.clone());
            record.approval_mode = handshake
                .approval_mode
                .unwrap_or(self.settings.default_approval_mode);
            record.plan_mode = handshake.plan_mode.unwrap_or(false);
            record.summary = handshake.summary;
            record.messages = messages;
        });

        let ids = vec![
            self.transport
                .subscribe(EventKind::Message, self.shared.message_handler()),
            self.transport
                .subscribe(EventKind::Chunk, self.shared.chunk_handler()),
        ];
        let set = Arc::new(SubscriptionSet::new(ids));
        *lock(&self.shared.subscription) = Some(Arc::clone(&set));
        self.transport
            .set_approval_handler(Some(self.shared.approval_handler()));

        tracing::info!(
            session_id = %session_id,
            cwd = %cwd.display(),
            history = history_len,
            "session initialized"
        );
        Ok(Subscription::new(Arc::clone(&self.transport), set))
    }

    async fn handshake(
        &self,
        cwd: &std::path::Path,
        session_id: &str,
    ) -> Result<Handshake, InitError> {
        let response = self
            .transport
            .request(
                methods::SESSION_INITIALIZE,
                json!({ "cwd": cwd, "sessionId": session_id }),
            )
            .await
            .map_err(InitError::Transport)?;
        let data = response
            .into_result()
            .map_err(|err| InitError::Handshake(err.message))?;
        if data.is_null() {
            return Ok(Handshake::default());
        }
        serde_json::from_value(data)
            .map_err(|err| InitError::Handshake(format!("malformed handshake data: {err}")))
    }

    /// Deny any outstanding approval, stop listening, clear the session and
    /// disconnect.
    pub fn destroy(&self) {
        if self.shared.approvals.deny_outstanding() {
            tracing::debug!("outstanding approval denied by destroy");
        }
        self.transport.set_approval_handler(None);

        let set = lock(&self.shared.subscription).take();
        if let Some(set) = set {
            set.release(self.transport.as_ref());
        }
        self.shared.abort_background();

        lock(&self.shared.attachments).clear();
        self.shared.update(SessionRecord::reset);
        self.transport.disconnect();
        tracing::info!("session destroyed");
    }

    // ------------------------------------------------------------------------
    // Request cycle
    // ------------------------------------------------------------------------

    /// Start a request cycle from an input-accepting status.
    pub async fn send_message(&self, request: SendRequest) -> Result<CycleOutcome, EngineError> {
        self.input_key("send a message")?;
        self.run_cycle(request).await
    }

    /// One `session.send` round trip. Backend failures end the cycle as
    /// `failed` and are not returned.
    pub(crate) async fn run_cycle(&self, request: SendRequest) -> Result<CycleOutcome, EngineError> {
        let started = self.shared.update(|record| {
            let key = record.key()?;
            record.cycle += 1;
            record.status = AppStatus::Processing;
            record.processing_tokens = 0;
            record.last_error = None;
            record.loading = true;
            Some((
                key,
                record.cycle,
                request.plan_mode.unwrap_or(record.plan_mode),
                request.model.clone().or_else(|| record.model.clone()),
            ))
        });
        let Some((key, cycle, plan_mode, model)) = started else {
            return Err(EngineError::NotInitialized);
        };
        let _loading = LoadingGuard {
            shared: &self.shared,
            cycle,
        };

        let params = {
            let attachments = lock(&self.shared.attachments);
            json!({
                "cwd": key.cwd,
                "sessionId": key.session_id,
                "message": request.message,
                "planMode": plan_mode,
                "model": model,
                "attachments": attachments.images().collect::<Vec<_>>(),
                "contextFiles": attachments.files().collect::<Vec<_>>(),
                "slashCommands": attachments.slash_commands().collect::<Vec<_>>(),
            })
        };

        let result = call(self.transport.as_ref(), methods::SESSION_SEND, params).await;

        let outcome = self.shared.update(|record| {
            if record.cycle != cycle {
                return CycleOutcome::Superseded;
            }
            record.processing_tokens = 0;
            match result {
                Ok(_) => {
                    record.status = AppStatus::Idle;
                    CycleOutcome::Completed
                }
                Err(err) if err.is_cancelled() => {
                    record.status = AppStatus::Cancelled;
                    CycleOutcome::Cancelled
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %key.session_id,
                        method = methods::SESSION_SEND,
                        error = %err,
                        "request failed"
                    );
                    record.status = AppStatus::Failed;
                    record.last_error = Some(err.message.clone());
                    record.push_error(err.message);
                    CycleOutcome::Failed
                }
            }
        });

        match outcome {
            CycleOutcome::Completed => {
                lock(&self.shared.attachments).clear();
                self.shared.publish();
            }
            CycleOutcome::Superseded => {
                tracing::debug!(cycle, "completion arrived for a superseded cycle");
            }
            CycleOutcome::Failed | CycleOutcome::Cancelled => {}
        }
        Ok(outcome)
    }

    /// Ask the backend to stop the current turn. Advisory: status returns to
    /// `idle` whatever the backend answers. No-op outside the executing phases.
    pub async fn cancel(&self) {
        let key = self.shared.update(|record| {
            if !record.status.is_executing() {
                return None;
            }
            let key = record.key()?;
            record.cycle += 1;
            record.status = AppStatus::Idle;
            record.processing_tokens = 0;
            record.loading = false;
            Some(key)
        });
        let Some(key) = key else {
            tracing::debug!("cancel ignored; nothing is executing");
            return;
        };

        let params = json!({ "cwd": key.cwd, "sessionId": key.session_id });
        if let Err(err) = call(self.transport.as_ref(), methods::SESSION_CANCEL, params).await {
            tracing::warn!(
                session_id = %key.session_id,
                method = methods::SESSION_CANCEL,
                error = %err,
                "cancel request failed"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Approval
    // ------------------------------------------------------------------------

    /// Answer the outstanding approval request.
    ///
    /// The `approve_always_*` side effect is awaited before the backend caller
    /// resumes. If it fails the caller still gets `approved` and the failure
    /// comes back here. A teardown while the side effect runs denies the
    /// caller and yields [`ApprovalError::Withdrawn`].
    pub async fn resolve_approval(&self, result: ApprovalResult) -> Result<(), EngineError> {
        let view = self
            .shared
            .approvals
            .claim()
            .ok_or(ApprovalError::NothingPending)?;
        self.shared.publish();

        let tool = view.tool_use.name;
        let side_effect = self.persist_approval_choice(result, &tool).await;

        if !self.shared.approvals.finish(result) {
            tracing::info!(tool = %tool, ?result, "approval withdrawn during teardown");
            return Err(ApprovalError::Withdrawn.into());
        }
        self.shared.update(|record| {
            if record.status == AppStatus::ToolApproving {
                record.status = if result.is_approved() {
                    AppStatus::ToolExecuting
                } else {
                    AppStatus::Processing
                };
            }
        });
        tracing::info!(tool = %tool, ?result, "approval resolved");

        side_effect.map_err(EngineError::from)
    }

    async fn persist_approval_choice(
        &self,
        result: ApprovalResult,
        tool: &str,
    ) -> Result<(), ApprovalError> {
        let method = match result {
            ApprovalResult::ApproveAlwaysEdit => methods::SESSION_SET_APPROVAL_MODE,
            ApprovalResult::ApproveAlwaysTool => methods::SESSION_ADD_APPROVAL_TOOLS,
            ApprovalResult::Approve | ApprovalResult::Deny => return Ok(()),
        };
        let Some(key) = self.shared.read(SessionRecord::key) else {
            return Err(ApprovalError::SideEffect {
                method,
                message: EngineError::NotInitialized.to_string(),
            });
        };
        let params = if result == ApprovalResult::ApproveAlwaysEdit {
            json!({
                "cwd": key.cwd,
                "sessionId": key.session_id,
                "approvalMode": ApprovalMode::AutoEdit,
            })
        } else {
            json!({
                "cwd": key.cwd,
                "sessionId": key.session_id,
                "approvalTools": [tool],
            })
        };

        if let Err(err) = call(self.transport.as_ref(), method, params).await {
            tracing::warn!(session_id = %key.session_id, method, tool, error = %err, "approval side effect failed");
            return Err(ApprovalError::SideEffect {
                method,
                message: err.message,
            });
        }
        if result == ApprovalResult::ApproveAlwaysEdit {
            // Only the session that asked; a reset record has no key.
            self.shared.update(|record| {
                if record.key().as_ref() == Some(&key) {
                    record.approval_mode = ApprovalMode::AutoEdit;
                }
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Session settings and modes
    // ------------------------------------------------------------------------

    pub fn set_plan_mode(&self, enabled: bool) {
        self.shared.update(|record| record.plan_mode = enabled);
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        self.shared.update(|record| record.model = Some(model));
    }

    pub fn show_help(&self) -> Result<(), EngineError> {
        self.shared.update(|record| match record.status {
            AppStatus::Help => Ok(()),
            status if status.accepts_input() => {
                record.status = AppStatus::Help;
                Ok(())
            }
            status => Err(EngineError::InvalidState {
                action: "show help",
                status,
            }),
        })
    }

    pub fn dismiss_help(&self) {
        self.shared.update(|record| {
            if record.status == AppStatus::Help {
                record.status = AppStatus::Idle;
            }
        });
    }

    /// Enter the `exit` status. Any outstanding approval is denied first.
    pub fn exit(&self) {
        self.shared.approvals.deny_outstanding();
        self.shared.update(|record| record.status = AppStatus::Exit);
    }

    /// Project a backend-announced sub-phase onto the status. Ignored (and
    /// `false`) unless a cycle is active.
    pub fn announce_phase(&self, phase: CyclePhase) -> bool {
        let applied = self.shared.update(|record| {
            if record.status.is_cycle_active() {
                record.status = phase.into();
                true
            } else {
                false
            }
        });
        if !applied {
            tracing::debug!(?phase, "phase announcement outside an active cycle ignored");
        }
        applied
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub async fn list_files(&self, query: &str) -> Result<Vec<FileEntry>, EngineError> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            files: Vec<FileEntry>,
        }

        let key = self.require_key()?;
        let method = methods::UTILS_FILES_LIST;
        let data = call(
            self.transport.as_ref(),
            method,
            json!({ "cwd": key.cwd, "query": query }),
        )
        .await
        .map_err(|err| EngineError::Request {
            method,
            message: err.message,
        })?;
        decode::<Listing>(method, data).map(|listing| listing.files)
    }

    pub async fn list_slash_commands(&self) -> Result<Vec<SlashCommandInfo>, EngineError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Commands {
            #[serde(default)]
            slash_commands: Vec<CommandEntry>,
        }

        let key = self.require_key()?;
        let method = methods::SLASH_COMMAND_LIST;
        let data = call(
            self.transport.as_ref(),
            method,
            json!({ "cwd": key.cwd, "sessionId": key.session_id }),
        )
        .await
        .map_err(|err| EngineError::Request {
            method,
            message: err.message,
        })?;
        decode::<Commands>(method, data).map(|commands| {
            commands
                .slash_commands
                .into_iter()
                .map(|entry| entry.command)
                .collect()
        })
    }

    // ------------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------------

    /// Returns `false` when an item with the same key is already attached.
    pub fn attach(&self, item: AttachedContext) -> bool {
        let added = lock(&self.shared.attachments).add(item);
        if added {
            self.shared.publish();
        }
        added
    }

    pub fn detach(&self, value: &str) -> Option<AttachedContext> {
        let removed = lock(&self.shared.attachments).remove(value);
        if removed.is_some() {
            self.shared.publish();
        }
        removed
    }

    /// Detach and erase the item's display text from `draft`.
    pub fn detach_with_draft(&self, value: &str, draft: &mut String) -> Option<AttachedContext> {
        let removed = lock(&self.shared.attachments).remove_with_draft(value, draft);
        if removed.is_some() {
            self.shared.publish();
        }
        removed
    }

    pub fn clear_attachments(&self) {
        lock(&self.shared.attachments).clear();
        self.shared.publish();
    }

    #[must_use]
    pub fn attachments(&self) -> Vec<AttachedContext> {
        lock(&self.shared.attachments).iter().cloned().collect()
    }

    pub fn next_image_placeholder(&self) -> String {
        lock(&self.shared.attachments).next_image_placeholder()
    }
}
