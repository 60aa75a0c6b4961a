//! Input routing: plain, rich, and slash-command paths

use parley_engine::types::{
    AppStatus, DisplayKind, RichDelta, RichSegment, UiMessage,
};
use parley_engine::{EngineSettings, SummaryConfig, methods};
use serde_json::json;

use crate::common::{CWD, SESSION, engine_with, initialized, settle, wait_for};

fn command(name: &str, kind: &str) -> serde_json::Value {
    json!({"commandEntry": {"command": {"name": name, "description": "", "type": kind}}})
}

#[tokio::test]
async fn plain_text_is_one_session_send() {
    let (engine, transport, _subscription) = initialized().await;

    engine.send("hello", None).await.unwrap();

    let sends = transport.calls_to(methods::SESSION_SEND);
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["message"], "hello");
    assert!(transport.calls_to(methods::SESSION_ADD_MESSAGES).is_empty());

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::Idle);
    assert_eq!(snapshot.processing_tokens, 0);
}

#[tokio::test]
async fn rich_input_is_added_to_history_before_the_cycle() {
    let (engine, transport, _subscription) = initialized().await;
    let delta = RichDelta::new(vec![
        RichSegment::Text {
            text: "why does this fail? ".into(),
        },
        RichSegment::Paste {
            id: 1,
            content: "error: linker `cc` not found\nnote: install a C toolchain".into(),
        },
    ]);

    engine
        .send("why does this fail? [Pasted text #1 +2 lines]", Some(&delta))
        .await
        .unwrap();

    let methods_in_order: Vec<_> = transport
        .calls()
        .into_iter()
        .map(|call| call.method)
        .filter(|method| *method != methods::UTILS_TELEMETRY)
        .collect();
    assert_eq!(
        methods_in_order,
        vec![
            methods::SESSION_INITIALIZE,
            methods::SESSION_ADD_MESSAGES,
            methods::SESSION_SEND
        ]
    );

    let added = &transport.calls_to(methods::SESSION_ADD_MESSAGES)[0]["messages"][0];
    assert_eq!(added["role"], "user");
    assert_eq!(
        added["content"],
        "why does this fail? error: linker `cc` not found\nnote: install a C toolchain"
    );
    assert_eq!(added["uiContent"], "why does this fail? [Pasted text #1 +2 lines]");
    assert!(added["uuid"].is_string());

    let send = &transport.calls_to(methods::SESSION_SEND)[0];
    assert!(send["message"].is_null());
}

#[tokio::test]
async fn rich_history_failure_skips_the_cycle() {
    let (engine, transport, _subscription) = initialized().await;
    transport.reply_fail(methods::SESSION_ADD_MESSAGES, "history locked");
    let delta = RichDelta::new(vec![RichSegment::Mention {
        path: "Cargo.toml".into(),
    }]);

    engine.send("@Cargo.toml", Some(&delta)).await.unwrap();

    assert!(transport.calls_to(methods::SESSION_SEND).is_empty());
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::Failed);
    assert_eq!(snapshot.last_display_error().unwrap().text, "history locked");
}

#[tokio::test]
async fn unknown_slash_command_shows_error_without_sending() {
    let (engine, transport, _subscription) = initialized().await;
    transport.reply_ok(methods::SLASH_COMMAND_GET, json!({"commandEntry": null}));

    engine.send("/nope", None).await.unwrap();

    assert!(transport.calls_to(methods::SESSION_SEND).is_empty());
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::Idle);
    let errors: Vec<_> = snapshot
        .messages
        .iter()
        .filter_map(UiMessage::as_display)
        .filter(|display| display.is_error())
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].text.contains("nope"));

    let lookup = &transport.calls_to(methods::SLASH_COMMAND_GET)[0];
    assert_eq!(lookup["command"], "nope");
}

#[tokio::test]
async fn lookup_failure_returns_to_idle_with_error() {
    let (engine, transport, _subscription) = initialized().await;
    transport.reply_fail(methods::SLASH_COMMAND_GET, "registry offline");

    engine.send("/review", None).await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::Idle);
    assert!(
        snapshot
            .last_display_error()
            .unwrap()
            .text
            .contains("registry offline")
    );
}

#[tokio::test]
async fn prompt_command_seeds_history_then_runs_a_cycle() {
    let (engine, transport, _subscription) = initialized().await;
    transport.reply_ok(methods::SLASH_COMMAND_GET, command("review", "prompt"));
    transport.reply_ok(
        methods::SLASH_COMMAND_EXECUTE,
        json!({"messages": [{"role": "user", "content": "Review the staged diff for bugs."}]}),
    );

    engine.send("/review   staged", None).await.unwrap();

    let execute = &transport.calls_to(methods::SLASH_COMMAND_EXECUTE)[0];
    assert_eq!(execute["command"], "review");
    assert_eq!(execute["args"], "staged");

    let added = transport.calls_to(methods::SESSION_ADD_MESSAGES);
    assert_eq!(added.len(), 2);
    assert_eq!(added[0]["messages"][0]["content"], "/review staged");
    assert_eq!(
        added[1]["messages"][0]["content"],
        "Review the staged diff for bugs."
    );

    let sends = transport.calls_to(methods::SESSION_SEND);
    assert_eq!(sends.len(), 1);
    assert!(sends[0]["message"].is_null());
    assert_eq!(engine.status(), AppStatus::Idle);
}

#[tokio::test]
async fn local_command_output_stays_local() {
    let (engine, transport, _subscription) = initialized().await;
    transport.reply_ok(methods::SLASH_COMMAND_GET, command("status", "local"));
    transport.reply_ok(
        methods::SLASH_COMMAND_EXECUTE,
        json!({"messages": [
            {"role": "user", "content": "Model: sonnet"},
            {"role": "assistant", "content": "All systems nominal."}
        ]}),
    );

    engine.send("/status", None).await.unwrap();

    assert!(transport.calls_to(methods::SESSION_SEND).is_empty());
    assert!(transport.calls_to(methods::SESSION_ADD_MESSAGES).is_empty());

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::Idle);
    assert_eq!(snapshot.messages.len(), 2);
    let info = snapshot.messages[0].as_display().unwrap();
    assert_eq!(info.kind, DisplayKind::Info);
    assert_eq!(info.text, "Model: sonnet");
    assert_eq!(
        snapshot.messages[1].as_assistant().unwrap().text(),
        "All systems nominal."
    );
}

#[tokio::test]
async fn unsupported_command_kind_is_reported() {
    let (engine, transport, _subscription) = initialized().await;
    transport.reply_ok(methods::SLASH_COMMAND_GET, command("theme", "local-jsx"));

    engine.send("/theme", None).await.unwrap();

    assert!(transport.calls_to(methods::SLASH_COMMAND_EXECUTE).is_empty());
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, AppStatus::Idle);
    assert!(snapshot.last_display_error().unwrap().text.contains("/theme"));
}

#[tokio::test]
async fn command_typed_through_rich_input_routes_as_command() {
    let (engine, transport, _subscription) = initialized().await;
    transport.reply_ok(methods::SLASH_COMMAND_GET, json!({"commandEntry": null}));
    let delta = RichDelta::new(vec![
        RichSegment::Text {
            text: "/explain ".into(),
        },
        RichSegment::Mention {
            path: "src/app.rs".into(),
        },
    ]);

    engine.send("/explain @src/app.rs", Some(&delta)).await.unwrap();

    assert_eq!(
        transport.calls_to(methods::SLASH_COMMAND_GET)[0]["command"],
        "explain"
    );
    assert!(transport.calls_to(methods::SESSION_ADD_MESSAGES).is_empty());
}

#[tokio::test]
async fn path_like_input_is_not_a_command() {
    let (engine, transport, _subscription) = initialized().await;
    engine.send("/usr/bin/env is missing", None).await.unwrap();
    assert!(transport.calls_to(methods::SLASH_COMMAND_GET).is_empty());
    assert_eq!(transport.calls_to(methods::SESSION_SEND).len(), 1);
}

// ========================================================================
// Background telemetry and summary
// ========================================================================

#[tokio::test]
async fn every_send_reports_telemetry() {
    let settings = EngineSettings {
        summary: SummaryConfig {
            enabled: false,
            ..SummaryConfig::default()
        },
        ..EngineSettings::default()
    };
    let (engine, transport) = engine_with(settings);
    let _subscription = engine.initialize(CWD, SESSION, Vec::new()).await.unwrap();
    transport.reply_ok(methods::SLASH_COMMAND_GET, json!({"commandEntry": null}));

    engine.send("/nope", None).await.unwrap();
    settle(|| !transport.calls_to(methods::UTILS_TELEMETRY).is_empty()).await;

    let event = &transport.calls_to(methods::UTILS_TELEMETRY)[0];
    assert_eq!(event["name"], "send");
    assert_eq!(event["payload"]["message"], "/nope");
    assert_eq!(event["payload"]["sessionId"], SESSION);
}

#[tokio::test]
async fn telemetry_failure_is_not_surfaced() {
    let settings = EngineSettings {
        summary: SummaryConfig {
            enabled: false,
            ..SummaryConfig::default()
        },
        ..EngineSettings::default()
    };
    let (engine, transport) = engine_with(settings);
    let _subscription = engine.initialize(CWD, SESSION, Vec::new()).await.unwrap();
    transport.reply_fail(methods::UTILS_TELEMETRY, "collector down");

    engine.send("hello", None).await.unwrap();
    settle(|| !transport.calls_to(methods::UTILS_TELEMETRY).is_empty()).await;
    assert!(engine.snapshot().last_display_error().is_none());
}

#[tokio::test]
async fn successful_send_derives_and_persists_a_summary() {
    let settings = EngineSettings {
        telemetry: false,
        summary: SummaryConfig {
            enabled: true,
            max_chars: 20,
        },
        ..EngineSettings::default()
    };
    let (engine, transport) = engine_with(settings);
    let _subscription = engine.initialize(CWD, SESSION, Vec::new()).await.unwrap();
    transport.reply_ok(
        methods::UTILS_QUERY,
        json!({"text": "\"Investigate flaky integration tests\""}),
    );
    let mut snapshots = engine.subscribe_snapshots();

    engine.send("why are the tests flaky?", None).await.unwrap();
    let snapshot = wait_for(&mut snapshots, |s| s.summary.is_some()).await;

    assert_eq!(snapshot.summary.as_deref(), Some("Investigate flaky in"));
    let query = &transport.calls_to(methods::UTILS_QUERY)[0];
    assert_eq!(query["userPrompt"], "why are the tests flaky?");
    let persisted = &transport.calls_to(methods::SESSION_SET_SUMMARY)[0];
    assert_eq!(persisted["summary"], "Investigate flaky in");
    assert_eq!(persisted["sessionId"], SESSION);
}

#[tokio::test]
async fn failed_send_derives_no_summary() {
    let settings = EngineSettings {
        telemetry: false,
        ..EngineSettings::default()
    };
    let (engine, transport) = engine_with(settings);
    let _subscription = engine.initialize(CWD, SESSION, Vec::new()).await.unwrap();
    transport.reply_fail(methods::SESSION_SEND, "overloaded");

    engine.send("hello", None).await.unwrap();
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(transport.calls_to(methods::UTILS_QUERY).is_empty());
}

#[tokio::test]
async fn existing_summary_is_not_rederived() {
    let settings = EngineSettings {
        telemetry: false,
        ..EngineSettings::default()
    };
    let (engine, transport) = engine_with(settings);
    transport.reply_ok(methods::SESSION_INITIALIZE, json!({"summary": "Already named"}));
    let _subscription = engine.initialize(CWD, SESSION, Vec::new()).await.unwrap();

    engine.send("hello", None).await.unwrap();
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(transport.calls_to(methods::UTILS_QUERY).is_empty());
    assert_eq!(engine.snapshot().summary.as_deref(), Some("Already named"));
}
