//! Shared test utilities and fixtures
//!
//! A scriptable in-memory transport that records every request, plus helpers
//! for driving an engine through it.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::sync::{Notify, watch};

use parley_engine::types::{ApprovalCategory, ApprovalOutcome, ToolUse};
use parley_engine::{
    ApprovalHandler, Engine, EngineError, EngineSettings, EventHandler, EventKind, RpcError,
    RpcResponse, SessionSnapshot, Subscription, SubscriptionId, Transport, TransportError,
    TransportFut,
};

pub const CWD: &str = "/work/project";
pub const SESSION: &str = "session-1";

/// A recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub params: Value,
}

/// Scripted answer for the next request to a method.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Fail(RpcError),
    Transport(TransportError),
}

#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    handlers: Mutex<Vec<(SubscriptionId, EventKind, EventHandler)>>,
    approval: Mutex<Option<ApprovalHandler>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    fail_connect: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply for the next request to `method`. Unscripted requests
    /// succeed with `null` data.
    pub fn reply(&self, method: &'static str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(reply);
    }

    pub fn reply_ok(&self, method: &'static str, data: Value) {
        self.reply(method, Reply::Ok(data));
    }

    pub fn reply_fail(&self, method: &'static str, message: &str) {
        self.reply(method, Reply::Fail(RpcError::new(message)));
    }

    /// Park the next request to `method` until the returned gate is notified.
    pub fn hold(&self, method: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(method, Arc::clone(&gate));
        gate
    }

    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .map(|call| call.params)
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn has_approval_handler(&self) -> bool {
        self.approval.lock().unwrap().is_some()
    }

    /// Deliver an event to every handler of `kind`.
    pub fn emit(&self, kind: EventKind, payload: Value) -> Vec<Result<(), EngineError>> {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        handlers
            .into_iter()
            .map(|handler| handler(payload.clone()))
            .collect()
    }

    pub fn emit_message(&self, message: Value) -> Result<(), EngineError> {
        let mut results = self.emit(
            EventKind::Message,
            json!({ "sessionId": SESSION, "cwd": CWD, "message": message }),
        );
        assert_eq!(results.len(), 1, "exactly one message subscriber");
        results.remove(0)
    }

    pub fn emit_chunk(&self, session_id: &str, delta: &str) -> Result<(), EngineError> {
        let mut results = self.emit(
            EventKind::Chunk,
            json!({
                "sessionId": session_id,
                "cwd": CWD,
                "chunk": { "type": "text-delta", "delta": delta }
            }),
        );
        assert_eq!(results.len(), 1, "exactly one chunk subscriber");
        results.remove(0)
    }

    /// What the backend does when a tool needs a decision.
    pub fn request_approval(
        &self,
        tool_use: ToolUse,
        category: ApprovalCategory,
    ) -> TransportFut<'static, Result<ApprovalOutcome, EngineError>> {
        let handler = self
            .approval
            .lock()
            .unwrap()
            .clone()
            .expect("approval handler registered");
        handler(tool_use, category)
    }
}

impl Transport for MockTransport {
    fn connect(&self) -> TransportFut<'_, Result<(), TransportError>> {
        async move {
            if self.fail_connect.swap(false, Ordering::SeqCst) {
                return Err(TransportError::Failed("connection refused".into()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn request(
        &self,
        method: &'static str,
        params: Value,
    ) -> TransportFut<'_, Result<RpcResponse, TransportError>> {
        async move {
            self.calls.lock().unwrap().push(Call { method, params });
            let gate = self.gates.lock().unwrap().remove(method);
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get_mut(method)
                .and_then(VecDeque::pop_front);
            match reply {
                None => Ok(RpcResponse::ok(Value::Null)),
                Some(Reply::Ok(data)) => Ok(RpcResponse::ok(data)),
                Some(Reply::Fail(error)) => Ok(RpcResponse::failure(error)),
                Some(Reply::Transport(error)) => Err(error),
            }
        }
        .boxed()
    }

    fn subscribe(&self, event: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.lock().unwrap().push((id, event, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers
            .lock()
            .unwrap()
            .retain(|(existing, _, _)| *existing != id);
    }

    fn set_approval_handler(&self, handler: Option<ApprovalHandler>) {
        *self.approval.lock().unwrap() = handler;
    }
}

/// An engine with no background telemetry or summary traffic.
pub fn quiet_engine() -> (Engine, Arc<MockTransport>) {
    engine_with(EngineSettings::quiet())
}

pub fn engine_with(settings: EngineSettings) -> (Engine, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let engine = Engine::new(transport.clone(), settings);
    (engine, transport)
}

pub async fn initialized() -> (Engine, Arc<MockTransport>, Subscription) {
    let (engine, transport) = quiet_engine();
    let subscription = engine
        .initialize(CWD, SESSION, Vec::new())
        .await
        .expect("initialize succeeds");
    (engine, transport, subscription)
}

/// Wait until a published snapshot satisfies `predicate`.
pub async fn wait_for(
    receiver: &mut watch::Receiver<SessionSnapshot>,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(predicate))
        .await
        .expect("snapshot condition reached in time")
        .expect("engine still publishing")
        .clone()
}

/// Yield until `condition` holds; panics after a generous bound.
pub async fn settle(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub fn wire(value: Value) -> parley_engine::types::WireMessage {
    serde_json::from_value(value).expect("valid wire message")
}

pub fn assistant_with_tool(id: &str, name: &str) -> Value {
    json!({
        "role": "assistant",
        "content": [
            { "type": "text", "text": "On it." },
            { "type": "tool_use", "id": id, "name": name, "input": { "path": "src/lib.rs" } }
        ]
    })
}

pub fn tool_result(id: &str, name: &str, content: &str) -> Value {
    json!({
        "role": "tool",
        "content": [{
            "toolCallId": id,
            "toolName": name,
            "result": { "llmContent": content }
        }]
    })
}
