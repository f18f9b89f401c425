mod common;

use common::{server_config, Behavior, FakeConnector, FakeSession};
use std::sync::Arc;
use std::time::Duration;
use tiny_agents_core::agent::{NO_CONTENT, TOOL_NOT_FOUND};
use tiny_agents_core::{
    ConnectPolicy, Role, SessionManager, SessionState, ToolCall, ToolCallDispatcher, ToolRegistry,
};
use tokio_util::sync::CancellationToken;

async fn sessions(session: Arc<FakeSession>) -> Arc<SessionManager> {
    let manager = Arc::new(SessionManager::new(
        Arc::new(FakeConnector::new().with_server("srv", session)),
        Arc::new(ToolRegistry::new()),
        ConnectPolicy::default(),
    ));
    manager
        .connect_all(vec![server_config("srv")], &CancellationToken::new())
        .await;
    manager
}

fn fixture() -> Arc<FakeSession> {
    Arc::new(FakeSession::new(&[
        ("fib", Behavior::Reply("0 1 1 2 3 5 8 13 21 34".into())),
        ("echo", Behavior::Echo),
        ("empty", Behavior::Reply(String::new())),
        ("flagged", Behavior::ToolError("division by zero".into())),
        ("rejects", Behavior::ServerError("bad request".into())),
        ("slow", Behavior::Slow(Duration::from_secs(60), "late".into())),
        ("quick", Behavior::Slow(Duration::from_millis(10), "early".into())),
    ]))
}

#[tokio::test]
async fn test_every_call_gets_one_result_in_order() {
    let dispatcher = ToolCallDispatcher::new(sessions(fixture()).await, Duration::from_secs(30));
    let calls = vec![
        ToolCall::new("c1", "fib", r#"{"n": 10}"#),
        ToolCall::new("c2", "missing", "{}"),
        ToolCall::new("c3", "echo", r#"{"x": 1}"#),
    ];

    let results = dispatcher.dispatch(&calls).await;

    assert_eq!(results.len(), 3);
    for (call, result) in calls.iter().zip(&results) {
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(result.name.as_deref(), Some(call.name.as_str()));
    }
    assert_eq!(results[0].text(), "0 1 1 2 3 5 8 13 21 34");
    assert_eq!(results[1].text(), "Error: Tool not found");
    assert_eq!(results[2].text(), r#"{"x":1}"#);
}

#[tokio::test]
async fn test_unknown_and_nameless_tools_are_answered() {
    let session = fixture();
    let dispatcher = ToolCallDispatcher::new(sessions(session.clone()).await, Duration::from_secs(30));
    let calls = vec![
        ToolCall::new("c1", "hallucinated", "{}"),
        ToolCall::new("c2", "", "{}"),
    ];

    let results = dispatcher.dispatch(&calls).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text(), TOOL_NOT_FOUND);
    assert_eq!(results[1].text(), "Error: Tool not found");
    assert_eq!(results[1].tool_call_id.as_deref(), Some("c2"));
    assert_eq!(session.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_arguments_are_reported() {
    let session = fixture();
    let dispatcher = ToolCallDispatcher::new(sessions(session.clone()).await, Duration::from_secs(30));
    let calls = vec![
        ToolCall::new("c1", "echo", "{\"x\": "),
        ToolCall::new("c2", "echo", "42"),
        ToolCall::new("c3", "echo", ""),
    ];

    let results = dispatcher.dispatch(&calls).await;

    assert!(results[0].text().starts_with("Error: Invalid arguments - "));
    assert_eq!(results[1].text(), "Error: Invalid arguments - expected a JSON object");
    assert_eq!(results[2].text(), "{}");
    // Only the valid call reached the server
    assert_eq!(session.call_count(), 1);
}

#[tokio::test]
async fn test_failures_become_error_text() {
    let dispatcher = ToolCallDispatcher::new(sessions(fixture()).await, Duration::from_secs(30));
    let calls = vec![
        ToolCall::new("c1", "flagged", "{}"),
        ToolCall::new("c2", "rejects", "{}"),
        ToolCall::new("c3", "empty", "{}"),
    ];

    let results = dispatcher.dispatch(&calls).await;

    assert!(results[0].text().starts_with("Error: "));
    assert!(results[0].text().contains("division by zero"));
    assert!(results[1].text().starts_with("Error: "));
    assert!(results[1].text().contains("bad request"));
    assert_eq!(results[2].text(), NO_CONTENT);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_only_that_call() {
    let stats = Arc::new(SessionState::new());
    let dispatcher = ToolCallDispatcher::new(sessions(fixture()).await, Duration::from_secs(30))
        .with_stats(stats.clone());
    let calls = vec![
        ToolCall::new("c1", "slow", "{}"),
        ToolCall::new("c2", "fib", "{}"),
    ];

    let results = dispatcher.dispatch(&calls).await;

    assert_eq!(results[0].text(), "Error: Tool call timed out after 30s");
    assert_eq!(results[1].text(), "0 1 1 2 3 5 8 13 21 34");
    let snap = stats.snapshot();
    assert_eq!(snap.tool_calls, 2);
    assert_eq!(snap.tool_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_dispatch_keeps_input_order() {
    let dispatcher = ToolCallDispatcher::new(sessions(fixture()).await, Duration::from_secs(120))
        .with_parallel(true);
    let calls = vec![
        ToolCall::new("c1", "slow", "{}"),
        ToolCall::new("c2", "quick", "{}"),
    ];
    let started = tokio::time::Instant::now();

    let results = dispatcher.dispatch(&calls).await;

    assert_eq!(results[0].text(), "late");
    assert_eq!(results[1].text(), "early");
    // Both ran at once: total time is the slowest call, not the sum
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test]
async fn test_empty_turn_yields_no_messages() {
    let dispatcher = ToolCallDispatcher::new(sessions(fixture()).await, Duration::from_secs(30));
    assert!(dispatcher.dispatch(&[]).await.is_empty());
}
