//! End-to-end tests over the router with a scripted stand-in engine.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chat_relay::events::StreamResponse;
use chat_relay::executable::ResolvedExecutable;
use chat_relay::router::{build_router, AppState, RelayConfig};
use chat_relay::rules::{RulesCache, DEFAULT_RULES};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

/// Stands up a router whose engine is a shell script. The script sees
/// the regular CLI argument layout and can drop capture files next to
/// itself under the returned temp dir.
async fn make_router(script_body: &str) -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let router = make_router_in(&dir, script_body, None).await;
    (dir, router)
}

async fn make_router_in(dir: &TempDir, script_body: &str, rules_file: Option<&Path>) -> Router {
    let program = dir.path().join("claude");
    std::fs::write(&program, format!("#!/bin/sh\n{script_body}")).unwrap();
    std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

    let executable = ResolvedExecutable {
        program,
        args_prefix: Vec::new(),
        version: "0.0.0-test".to_string(),
    };
    let state = AppState::new(
        RelayConfig {
            default_project_dir: dir.path().to_path_buf(),
        },
        executable,
        RulesCache::load(rules_file.map(Path::to_path_buf)).await,
    );
    build_router(state)
}

/// Engine script that records its prompt and argv, then plays a
/// complete successful turn.
const HAPPY_ENGINE: &str = r#"dir=$(dirname "$0")
printf '%s' "$2" > "$dir/prompt.txt"
printf '%s' "$*" > "$dir/args.txt"
printf '{"type":"system","subtype":"init","session_id":"sess-test"}\n'
printf '{"type":"assistant","message":{"content":"hi there"}}\n'
printf '{"type":"result","is_error":false}\n'
"#;

/// Engine script that emits one event and then hangs until killed.
const HANGING_ENGINE: &str = r#"printf '{"type":"system","subtype":"init","session_id":"sess-hang"}\n'
sleep 5 >/dev/null 2>&1
printf '{"type":"result"}\n'
"#;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn stream_events(response: axum::response::Response) -> Vec<StreamResponse> {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    std::str::from_utf8(&bytes)
        .unwrap()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let (_dir, router) = make_router("exit 0").await;
    let response = router.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn config_reports_executable_and_project_dir() {
    let (dir, router) = make_router("exit 0").await;
    let response = router.oneshot(get("/api/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let config = body_json(response).await;
    assert_eq!(
        config["defaultProjectPath"],
        dir.path().display().to_string()
    );
    assert_eq!(config["version"], "0.0.0-test");
    assert!(config["executable"].as_str().unwrap().ends_with("claude"));
}

#[tokio::test]
async fn rules_endpoint_serves_and_reloads_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let rules_path = dir.path().join("rules.md");
    std::fs::write(&rules_path, "be terse").unwrap();
    let router = make_router_in(&dir, "exit 0", Some(&rules_path)).await;

    let response = router.clone().oneshot(get("/api/rules")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["rules"], "be terse");
    assert_eq!(body["length"], 8);

    std::fs::write(&rules_path, "be thorough").unwrap();
    let response = router
        .clone()
        .oneshot(post_empty("/api/rules/reload"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["rules"], "be thorough");

    let response = router.oneshot(get("/api/rules")).await.unwrap();
    assert_eq!(body_json(response).await["rules"], "be thorough");
}

#[tokio::test]
async fn abort_of_unknown_request_reports_failure() {
    let (_dir, router) = make_router("exit 0").await;
    let response = router
        .oneshot(post_empty("/api/abort/no-such-request"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"success": false}));
}

#[tokio::test]
async fn chat_streams_engine_events_and_ends_done() {
    let (dir, router) = make_router(HAPPY_ENGINE).await;
    let response = router
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "hello", "requestId": "r-happy"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );

    let events = stream_events(response).await;
    assert_eq!(events.len(), 4);
    match &events[0] {
        StreamResponse::ClaudeJson { data } => {
            assert_eq!(data["session_id"], "sess-test");
        }
        other => panic!("expected claude_json, got {other:?}"),
    }
    assert!(matches!(events.last(), Some(StreamResponse::Done)));
    assert_eq!(
        events.iter().filter(|e| e.is_terminal()).count(),
        1,
        "exactly one terminal event"
    );

    // New conversation: rules prepended, baseline tools granted.
    let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
    assert!(prompt.starts_with(DEFAULT_RULES));
    assert!(prompt.ends_with("User message: hello"));

    let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
    assert!(args.contains("--output-format stream-json"));
    assert!(args.contains("--allowedTools Read,Glob,Grep,LS,Task"));
    assert!(!args.contains("--resume"));
}

#[tokio::test]
async fn resumed_chat_passes_message_through_and_resumes_session() {
    let (dir, router) = make_router(HAPPY_ENGINE).await;
    let response = router
        .oneshot(post_json(
            "/api/chat",
            json!({
                "message": "/review the diff",
                "requestId": "r-resume",
                "sessionId": "sess-prev",
                "allowedTools": ["WebSearch", "Bash"],
            }),
        ))
        .await
        .unwrap();
    let events = stream_events(response).await;
    assert!(matches!(events.last(), Some(StreamResponse::Done)));

    // Resumed turn: no rules injection, marker stripped.
    let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
    assert_eq!(prompt, "review the diff");

    let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
    assert!(args.contains("--resume sess-prev"));
    // Approved tool kept, write-capable tool dropped.
    assert!(args.contains("--allowedTools Read,Glob,Grep,LS,Task,WebSearch"));
    assert!(!args.contains("Bash"));
}

#[tokio::test]
async fn duplicate_request_id_conflicts_and_abort_ends_the_stream() {
    let (_dir, router) = make_router(HANGING_ENGINE).await;

    let first = router
        .clone()
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "long task", "requestId": "r-dup"}),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .clone()
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "again", "requestId": "r-dup"}),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let problem = body_json(second).await;
    assert_eq!(problem["type"], "urn:chat-relay:error:conflict");
    assert_eq!(problem["requestId"], "r-dup");

    let abort = router
        .clone()
        .oneshot(post_empty("/api/abort/r-dup"))
        .await
        .unwrap();
    assert_eq!(body_json(abort).await, json!({"success": true}));

    let events = stream_events(first).await;
    assert!(matches!(events.last(), Some(StreamResponse::Aborted)));

    // The entry is gone; a second abort is a miss.
    let again = router.oneshot(post_empty("/api/abort/r-dup")).await.unwrap();
    assert_eq!(body_json(again).await, json!({"success": false}));
}

#[tokio::test]
async fn failing_engine_ends_stream_with_error_event() {
    let (_dir, router) =
        make_router("printf '{\"type\":\"system\"}\\n'; echo 'out of tokens' >&2; exit 1").await;
    let response = router
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "hi", "requestId": "r-err"}),
        ))
        .await
        .unwrap();
    // Stream starts 200; the failure arrives in-band as the terminal line.
    assert_eq!(response.status(), StatusCode::OK);

    let events = stream_events(response).await;
    match events.last() {
        Some(StreamResponse::Error { error }) => {
            assert!(error.contains("out of tokens"), "got: {error}");
        }
        other => panic!("expected error terminal, got {other:?}"),
    }
}
