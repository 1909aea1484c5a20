//! Full request cycles through the runner.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use policygate_core::{GateError, MemoryStore, SharedStore, Store};
use policygate_engine::runner::{
    build_input, load_handler, AsyncFnHandler, EndpointType, Executor, FnHandler, HandlerRequest,
    RunnerInput, SharedHandler,
};

fn request(extra: Value) -> RunnerInput {
    let mut base = json!({
        "type": "data_source",
        "query": "hello world",
        "context": { "user_id": "alice", "endpoint_slug": "docs" },
        "policies": [],
    });
    if let (Value::Object(b), Value::Object(e)) = (&mut base, extra) {
        b.extend(e);
    }
    serde_json::from_value(base).unwrap()
}

/// Handler that echoes a fixed response and counts its invocations.
fn echo(response: &'static str) -> (SharedHandler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let h = FnHandler::new(move |_req: HandlerRequest| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "response": response }))
    });
    (Arc::new(h), calls)
}

#[tokio::test]
async fn success_envelope_carries_handler_result() {
    let (handler, calls) = echo("hi");
    let out = Executor::new()
        .with_handler(handler)
        .execute(request(json!({})))
        .await;

    assert!(out.success, "{out:?}");
    assert_eq!(out.result, json!({ "response": "hi" }));
    assert_eq!(out.error, "");
    assert!(out.policy_result.as_ref().unwrap().allowed);
    assert_eq!(out.exit_code(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pre_denial_never_reaches_the_handler() {
    let (handler, calls) = echo("hi");
    let out = Executor::new()
        .with_handler(handler)
        .execute(request(json!({
            "policies": [
                { "name": "team", "type": "access_group", "config": { "users": ["bob"] } }
            ]
        })))
        .await;

    assert!(!out.success);
    assert_eq!(out.error_type, "PolicyDenied");
    assert_eq!(
        out.error,
        "User 'alice' is not a member of access group 'team'"
    );
    let verdict = out.policy_result.as_ref().unwrap();
    assert!(!verdict.allowed);
    assert_eq!(verdict.policy_name, "team");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.exit_code(), 1);
}

#[tokio::test]
async fn post_denial_happens_after_the_handler_ran() {
    let (handler, calls) = echo("way too long");
    let out = Executor::new()
        .with_handler(handler)
        .execute(request(json!({
            "policies": [
                { "name": "tokens", "type": "token_limit", "config": { "max_output_tokens": 5 } }
            ]
        })))
        .await;

    assert!(!out.success);
    assert_eq!(out.error, "Output tokens (12) exceed limit (5)");
    assert_eq!(out.result, Value::Null);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pending_verdict_is_reported_as_pending() {
    let (handler, _) = echo("hold me");
    let store: SharedStore = Arc::new(MemoryStore::new());
    let out = Executor::new()
        .with_store(store.clone())
        .with_handler(handler)
        .execute(request(json!({
            "policies": [{ "name": "review", "type": "manual_review" }]
        })))
        .await;

    assert!(!out.success);
    assert_eq!(out.error_type, "PolicyDenied");
    let verdict = out.policy_result.unwrap();
    assert!(verdict.pending);
    let id = verdict.metadata["review_id"].as_str().unwrap();
    let held = store.get("manual_review:review", id).await.unwrap().unwrap();
    assert_eq!(held["output"], json!({ "response": "hold me" }));
    assert_eq!(held["input"]["query"], json!("hello world"));
}

#[tokio::test]
async fn handler_sees_pre_phase_metadata() {
    let handler: SharedHandler = Arc::new(AsyncFnHandler::new(|req: HandlerRequest| async move {
        Ok(json!({ "docs": req.metadata["resolved_documents"].clone(), "input": req.input }))
    }));
    let out = Executor::new()
        .with_handler(handler)
        .execute(request(json!({
            "context": { "user_id": "alice", "metadata": { "trace": "t-1" } },
            "policies": [
                { "name": "team", "type": "access_group",
                  "config": { "users": ["alice"], "documents": ["d1"] } }
            ]
        })))
        .await;

    assert!(out.success, "{out:?}");
    assert_eq!(out.result["docs"], json!(["d1"]));
    assert_eq!(out.result["input"], json!("hello world"));
}

#[tokio::test]
async fn state_is_shared_across_cycles_through_the_store() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let (handler, calls) = echo("ok");
    let exec = Executor::new().with_store(store).with_handler(handler);
    let limited = || {
        request(json!({
            "policies": [
                { "name": "limit", "type": "rate_limit",
                  "config": { "max_requests": 2, "window_seconds": 3600 } }
            ]
        }))
    };

    assert!(exec.execute(limited()).await.success);
    assert!(exec.execute(limited()).await.success);
    let out = exec.execute(limited()).await;
    assert_eq!(out.error, "Rate limit exceeded: 2 requests per 3600s");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_cycles_share_one_store_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db").to_string_lossy().to_string();
    let slow: SharedHandler = Arc::new(AsyncFnHandler::new(|_req: HandlerRequest| async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(json!({ "response": "done" }))
    }));
    let exec = Executor::new().with_handler(slow);
    let cycle = |user: &str| {
        request(json!({
            "context": { "user_id": user },
            "store": { "type": "sqlite", "path": path },
            "policies": [
                { "name": "limit", "type": "rate_limit",
                  "config": { "max_requests": 5, "window_seconds": 3600 } }
            ]
        }))
    };

    let (a, b) = tokio::join!(exec.execute(cycle("alice")), exec.execute(cycle("bob")));
    assert!(a.success, "{a:?}");
    assert!(b.success, "{b:?}");

    let store = policygate_engine::store::FileStore::open(&path).unwrap();
    for user in ["alice", "bob"] {
        let state = store.get("rate_limit:limit", user).await.unwrap().unwrap();
        assert_eq!(state["timestamps"].as_array().unwrap().len(), 1);
    }
}

#[tokio::test]
async fn errors_map_to_wire_categories() {
    let (handler, _) = echo("x");
    let exec = Executor::new().with_handler(handler);

    let out = exec
        .execute(request(json!({
            "policies": [{ "name": "n", "type": "not", "config": { "policy": "ghost" } }]
        })))
        .await;
    assert_eq!(out.error_type, "PolicyFactoryError");
    assert!(out.policy_result.is_none());

    let out = Executor::new()
        .execute(request(json!({ "store": { "type": "file" } })))
        .await;
    assert_eq!(out.error_type, "PolicyConfigError");

    let out = Executor::new()
        .execute(request(json!({ "handler_path": "/definitely/not/here" })))
        .await;
    assert_eq!(out.error_type, "HandlerLoadError");
    assert_eq!(out.error, "Handler file not found: /definitely/not/here");
}

#[tokio::test]
async fn handler_failures_and_panics_become_envelopes() {
    let failing: SharedHandler = Arc::new(FnHandler::new(|_req: HandlerRequest| {
        Err(GateError::Internal("backend down".into()))
    }));
    let out = Executor::new()
        .with_handler(failing)
        .execute(request(json!({})))
        .await;
    assert_eq!(out.error_type, "ExecutionError");
    assert!(out.error.starts_with("Handler execution failed:"), "{}", out.error);

    let panicking: SharedHandler = Arc::new(FnHandler::new(|_req: HandlerRequest| -> policygate_core::Result<Value> {
        panic!("boom")
    }));
    let out = Executor::new()
        .with_handler(panicking)
        .execute(request(json!({})))
        .await;
    assert!(!out.success);
    assert_eq!(out.error_type, "InternalError");
    assert!(out.error.contains("boom"));
}

#[test]
fn messages_are_flattened_into_query() {
    let input: RunnerInput = serde_json::from_value(json!({
        "type": "model",
        "messages": [
            { "role": "system", "content": "be brief" },
            { "role": "user", "content": "" },
            { "role": "user", "content": "hi there" }
        ],
        "context": { "user_id": "u" },
        "transaction_token": "t.a.b.c"
    }))
    .unwrap();
    assert_eq!(input.endpoint_type, EndpointType::Model);

    let map = build_input(&input);
    assert_eq!(map["type"], json!("model"));
    assert_eq!(map["query"], json!("be brief hi there"));
    assert_eq!(map["messages"].as_array().unwrap().len(), 3);
    assert_eq!(map["transaction_token"], json!("t.a.b.c"));
}

#[test]
fn load_handler_rejects_bad_paths() {
    let dir = tempfile::tempdir().unwrap();

    let err = load_handler("", "").unwrap_err();
    assert_eq!(err.to_string(), "handler_path is empty");

    let dir_path = dir.path().to_string_lossy().to_string();
    let err = load_handler(&dir_path, "").unwrap_err();
    assert!(err.to_string().starts_with("Handler path is not a file"));

    let file = dir.path().join("h.sh");
    std::fs::write(&file, "#!/bin/sh\n").unwrap();
    let file = file.to_string_lossy().to_string();
    let err = load_handler(&file, "/definitely/not/a/dir").unwrap_err();
    assert_eq!(err.error_type().as_str(), "HandlerLoadError");
}

#[cfg(unix)]
#[tokio::test]
async fn process_handler_round_trip() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("handler.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\ncat > request.json\nprintf '{\"response\":\"from process\"}'\n",
    )
    .unwrap();

    let plain = script.to_string_lossy().to_string();
    let err = load_handler(&plain, "").unwrap_err();
    assert!(err.to_string().starts_with("Handler is not executable"));

    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let out = Executor::new()
        .execute(request(json!({
            "handler_path": plain,
            "work_dir": dir.path().to_string_lossy(),
        })))
        .await;
    assert!(out.success, "{out:?}");
    assert_eq!(out.result, json!({ "response": "from process" }));

    let sent: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("request.json")).unwrap())
            .unwrap();
    assert_eq!(sent["type"], json!("data_source"));
    assert_eq!(sent["input"], json!("hello world"));
}

#[cfg(unix)]
#[tokio::test]
async fn process_handler_streams_large_input_and_output() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("chatty.sh");
    // answers before reading; both payloads exceed a pipe buffer
    std::fs::write(
        &script,
        "#!/bin/sh\nhead -c 300000 /dev/zero | tr '\\000' a\ncat > /dev/null\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let big_query = "q".repeat(300_000);
    let out = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        Executor::new().execute(request(json!({
            "query": big_query,
            "handler_path": script.to_string_lossy(),
        }))),
    )
    .await
    .expect("handler must not stall");
    assert!(out.success, "{out:?}");
    assert_eq!(out.result.as_str().unwrap().len(), 300_000);
}

#[cfg(unix)]
#[tokio::test]
async fn process_handler_failure_is_an_execution_error() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("fail.sh");
    std::fs::write(&script, "#!/bin/sh\necho nope >&2\nexit 3\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let out = Executor::new()
        .execute(request(json!({ "handler_path": script.to_string_lossy() })))
        .await;
    assert_eq!(out.error_type, "ExecutionError");
    assert!(out.error.contains("nope"), "{}", out.error);
}
