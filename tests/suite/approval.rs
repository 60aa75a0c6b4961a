//! Approval gate: suspension, decisions, side effects, teardown

use parley_engine::types::{AppStatus, ApprovalCategory, ApprovalMode, ApprovalResult, ToolUse};
use parley_engine::{ApprovalError, EngineError, ProtocolError, SendRequest, methods};
use serde_json::json;

use crate::common::{initialized, settle, wait_for};

fn bash(id: &str) -> ToolUse {
    ToolUse::new(id, "bash", json!({"command": "cargo fmt"}))
}

/// An engine mid-cycle (its `session.send` parked) with one approval pending.
async fn pending_approval() -> (
    parley_engine::Engine,
    std::sync::Arc<crate::common::MockTransport>,
    parley_engine::Subscription,
    tokio::task::JoinHandle<Result<parley_engine::types::ApprovalOutcome, EngineError>>,
    std::sync::Arc<tokio::sync::Notify>,
) {
    let (engine, transport, subscription) = initialized().await;
    let send_gate = transport.hold(methods::SESSION_SEND);
    let sending = engine.clone();
    tokio::spawn(async move { sending.send_message(SendRequest::text("format it")).await });
    settle(|| !transport.calls_to(methods::SESSION_SEND).is_empty()).await;

    let waiting = tokio::spawn(transport.request_approval(bash("c1"), ApprovalCategory::Command));
    let mut snapshots = engine.subscribe_snapshots();
    wait_for(&mut snapshots, |s| s.approval.is_some()).await;
    (engine, transport, subscription, waiting, send_gate)
}

#[tokio::test]
async fn request_is_published_with_tool_approving_status() {
    let (engine, _transport, _subscription, _waiting, _gate) = pending_approval().await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::ToolApproving);
    let view = snapshot.approval.unwrap();
    assert_eq!(view.tool_use.call_id, "c1");
    assert_eq!(view.category, ApprovalCategory::Command);
}

#[tokio::test]
async fn approve_resumes_caller_and_moves_to_tool_executing() {
    let (engine, transport, _subscription, waiting, _gate) = pending_approval().await;

    engine
        .resolve_approval(ApprovalResult::Approve)
        .await
        .unwrap();
    assert!(waiting.await.unwrap().unwrap().approved);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::ToolExecuting);
    assert!(snapshot.approval.is_none());
    assert!(transport.calls_to(methods::SESSION_SET_APPROVAL_MODE).is_empty());
    assert!(transport.calls_to(methods::SESSION_ADD_APPROVAL_TOOLS).is_empty());
}

#[tokio::test]
async fn deny_resumes_caller_and_returns_to_processing() {
    let (engine, _transport, _subscription, waiting, _gate) = pending_approval().await;

    engine.resolve_approval(ApprovalResult::Deny).await.unwrap();
    assert!(!waiting.await.unwrap().unwrap().approved);
    assert_eq!(engine.status(), AppStatus::Processing);
}

#[tokio::test]
async fn approve_always_edit_persists_before_caller_resumes() {
    let (engine, transport, _subscription, waiting, _gate) = pending_approval().await;
    let mode_gate = transport.hold(methods::SESSION_SET_APPROVAL_MODE);

    let resolver = engine.clone();
    let resolving =
        tokio::spawn(async move { resolver.resolve_approval(ApprovalResult::ApproveAlwaysEdit).await });
    settle(|| !transport.calls_to(methods::SESSION_SET_APPROVAL_MODE).is_empty()).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!waiting.is_finished(), "caller resumed before the mode was persisted");

    mode_gate.notify_one();
    resolving.await.unwrap().unwrap();
    assert!(waiting.await.unwrap().unwrap().approved);

    let params = &transport.calls_to(methods::SESSION_SET_APPROVAL_MODE)[0];
    assert_eq!(params["approvalMode"], "autoEdit");
    assert_eq!(params["sessionId"], crate::common::SESSION);
    assert_eq!(engine.snapshot().approval_mode, ApprovalMode::AutoEdit);
}

#[tokio::test]
async fn approve_always_tool_adds_tool_to_allow_list() {
    let (engine, transport, _subscription, waiting, _gate) = pending_approval().await;

    engine
        .resolve_approval(ApprovalResult::ApproveAlwaysTool)
        .await
        .unwrap();
    assert!(waiting.await.unwrap().unwrap().approved);

    let params = &transport.calls_to(methods::SESSION_ADD_APPROVAL_TOOLS)[0];
    assert_eq!(params["approvalTools"], json!(["bash"]));
    assert_eq!(engine.snapshot().approval_mode, ApprovalMode::Default);
}

#[tokio::test]
async fn failed_side_effect_still_resolves_caller() {
    let (engine, transport, _subscription, waiting, _gate) = pending_approval().await;
    transport.reply_fail(methods::SESSION_ADD_APPROVAL_TOOLS, "config locked");

    let err = engine
        .resolve_approval(ApprovalResult::ApproveAlwaysTool)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Approval(ApprovalError::SideEffect {
            method: methods::SESSION_ADD_APPROVAL_TOOLS,
            ..
        })
    ));
    assert!(waiting.await.unwrap().unwrap().approved);
    assert!(engine.snapshot().approval.is_none());
}

#[tokio::test]
async fn resolving_twice_reports_nothing_pending() {
    let (engine, _transport, _subscription, waiting, _gate) = pending_approval().await;

    engine.resolve_approval(ApprovalResult::Approve).await.unwrap();
    let err = engine
        .resolve_approval(ApprovalResult::Deny)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Approval(ApprovalError::NothingPending)
    ));
    assert!(waiting.await.unwrap().unwrap().approved);
}

#[tokio::test]
async fn overlapping_request_is_rejected_to_the_backend() {
    let (engine, transport, _subscription, _waiting, _gate) = pending_approval().await;

    let second = transport
        .request_approval(bash("c2"), ApprovalCategory::Command)
        .await
        .unwrap_err();
    assert!(matches!(
        second,
        EngineError::Protocol(ProtocolError::ApprovalAlreadyPending { .. })
    ));
    assert_eq!(engine.snapshot().approval.unwrap().tool_use.call_id, "c1");
}

#[tokio::test]
async fn destroy_denies_outstanding_request_exactly_once() {
    let (engine, transport, _subscription, waiting, _gate) = pending_approval().await;

    engine.destroy();
    assert!(!waiting.await.unwrap().unwrap().approved);

    let err = engine
        .resolve_approval(ApprovalResult::Approve)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Approval(ApprovalError::NothingPending)
    ));
    assert!(!transport.has_approval_handler());
}

#[tokio::test]
async fn destroy_during_side_effect_denies_caller() {
    let (engine, transport, _subscription, waiting, _gate) = pending_approval().await;
    let mode_gate = transport.hold(methods::SESSION_SET_APPROVAL_MODE);

    let resolver = engine.clone();
    let resolving =
        tokio::spawn(async move { resolver.resolve_approval(ApprovalResult::ApproveAlwaysEdit).await });
    settle(|| !transport.calls_to(methods::SESSION_SET_APPROVAL_MODE).is_empty()).await;

    engine.destroy();
    assert!(!waiting.await.unwrap().unwrap().approved);

    mode_gate.notify_one();
    let err = resolving.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Approval(ApprovalError::Withdrawn)));
    let snapshot = engine.snapshot();
    assert!(!snapshot.is_initialized());
    assert_eq!(snapshot.approval_mode, ApprovalMode::Default);
    assert!(snapshot.approval.is_none());
}

#[tokio::test]
async fn request_during_side_effect_is_rejected() {
    let (engine, transport, _subscription, waiting, _gate) = pending_approval().await;
    let mode_gate = transport.hold(methods::SESSION_SET_APPROVAL_MODE);

    let resolver = engine.clone();
    let resolving =
        tokio::spawn(async move { resolver.resolve_approval(ApprovalResult::ApproveAlwaysEdit).await });
    settle(|| !transport.calls_to(methods::SESSION_SET_APPROVAL_MODE).is_empty()).await;

    let second = transport
        .request_approval(bash("c2"), ApprovalCategory::Command)
        .await
        .unwrap_err();
    assert!(matches!(
        second,
        EngineError::Protocol(ProtocolError::ApprovalAlreadyPending { .. })
    ));
    let again = engine
        .resolve_approval(ApprovalResult::Deny)
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        EngineError::Approval(ApprovalError::NothingPending)
    ));

    mode_gate.notify_one();
    resolving.await.unwrap().unwrap();
    assert!(waiting.await.unwrap().unwrap().approved);
    assert_eq!(engine.snapshot().approval_mode, ApprovalMode::AutoEdit);
}
