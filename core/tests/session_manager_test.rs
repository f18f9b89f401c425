mod common;

use common::{server_config, Behavior, FakeConnector, FakeSession};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tiny_agents_core::mcp::McpServerConfig;
use tiny_agents_core::{
    ConnectPolicy, Liveness, SessionError, SessionManager, StdioConnector, ToolError, ToolRegistry,
};
use tokio_util::sync::CancellationToken;

fn policy() -> ConnectPolicy {
    ConnectPolicy {
        attempts: 3,
        backoff: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(5),
        close_timeout: Duration::from_secs(1),
    }
}

fn manager(connector: FakeConnector) -> (SessionManager, Arc<FakeConnector>) {
    let connector = Arc::new(connector);
    let manager = SessionManager::new(connector.clone(), Arc::new(ToolRegistry::new()), policy());
    (manager, connector)
}

#[tokio::test(start_paused = true)]
async fn test_one_unreachable_server_degrades_alone() {
    let (manager, connector) = manager(
        FakeConnector::new()
            .with_server("math", Arc::new(FakeSession::new(&[("fib", Behavior::Reply("55".into()))])))
            .with_server("web", Arc::new(FakeSession::new(&[("search", Behavior::Echo)])))
            .with_unreachable_server("shell"),
    );

    let outcomes = manager
        .connect_all(
            vec![server_config("math"), server_config("shell"), server_config("web")],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].server_id, "math");
    assert!(outcomes[0].is_ready());
    assert_eq!(outcomes[1].liveness, Liveness::Degraded);
    assert_eq!(outcomes[1].attempts, 3);
    assert!(outcomes[1].last_error.is_some());
    assert!(outcomes[2].is_ready());

    assert_eq!(connector.attempts("shell"), 3);
    assert_eq!(manager.ready_count().await, 2);
    assert_eq!(manager.registry().len(), 2);
    assert!(manager.registry().resolve("fib").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_flaky_server_recovers_within_attempts() {
    let session = Arc::new(FakeSession::new(&[("fib", Behavior::Echo)]));
    let (manager, connector) = manager(FakeConnector::new().with_flaky_server("math", session, 2));

    let outcomes = manager
        .connect_all(vec![server_config("math")], &CancellationToken::new())
        .await;

    assert!(outcomes[0].is_ready());
    assert_eq!(outcomes[0].attempts, 3);
    assert_eq!(outcomes[0].tools, vec!["fib".to_string()]);
    assert_eq!(connector.attempts("math"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_tool_listing_closes_the_session() {
    let session = Arc::new(
        FakeSession::new(&[("fib", Behavior::Echo)])
            .failing_list("tools/list returned garbage")
            .failing_close("pipe already gone"),
    );
    let (manager, connector) = manager(FakeConnector::new().with_server("math", session.clone()));

    let outcomes = manager
        .connect_all(vec![server_config("math")], &CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].liveness, Liveness::Degraded);
    assert_eq!(connector.attempts("math"), 3);
    assert!(outcomes[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("tools/list returned garbage"));
    // The close error is logged, never surfaced in place of the listing error
    assert!(session.is_closed());
    assert!(manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_runs_between_attempts() {
    let (manager, _) = manager(FakeConnector::new().with_unreachable_server("down"));
    let started = tokio::time::Instant::now();

    manager
        .connect_all(vec![server_config("down")], &CancellationToken::new())
        .await;

    // 100ms after the first failure, 200ms after the second
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_tool_degrades_without_retry() {
    let (manager, connector) = manager(
        FakeConnector::new()
            .with_server("a", Arc::new(FakeSession::new(&[("search", Behavior::Echo)])))
            .with_server("b", Arc::new(FakeSession::new(&[("search", Behavior::Echo)]))),
    );

    let outcomes = manager
        .connect_all(vec![server_config("a"), server_config("b")], &CancellationToken::new())
        .await;

    let ready: Vec<_> = outcomes.iter().filter(|o| o.is_ready()).collect();
    let degraded: Vec<_> = outcomes.iter().filter(|o| !o.is_ready()).collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].attempts, 1);
    assert!(degraded[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("Duplicate tool"));
    assert_eq!(connector.attempts(&degraded[0].server_id), 1);
    assert_eq!(manager.registry().server_of("search"), Some(ready[0].server_id.clone()));
}

#[tokio::test]
async fn test_dispatch_forwards_to_ready_session() {
    let session = Arc::new(FakeSession::new(&[("fib", Behavior::Reply("55".into()))]));
    let (manager, _) = manager(FakeConnector::new().with_server("math", session.clone()));
    manager
        .connect_all(vec![server_config("math")], &CancellationToken::new())
        .await;

    let handle = manager.registry().resolve("fib").unwrap();
    let result = manager.dispatch(&handle, "fib", json!({"n": 10})).await.unwrap();

    assert_eq!(result.content, "55");
    assert_eq!(session.calls.lock().unwrap()[0].1, json!({"n": 10}));
}

#[tokio::test]
async fn test_dispatch_on_closed_handle_fails() {
    let session = Arc::new(FakeSession::new(&[("fib", Behavior::Echo)]));
    let (manager, _) = manager(FakeConnector::new().with_server("math", session.clone()));
    manager
        .connect_all(vec![server_config("math")], &CancellationToken::new())
        .await;
    let handle = manager.registry().resolve("fib").unwrap();

    let report = manager.shutdown().await;
    assert!(report.is_clean());

    let err = manager.dispatch(&handle, "fib", json!({})).await.unwrap_err();
    assert!(matches!(err, SessionError::Closed(ref s) if s == "math"));
    assert_eq!(session.call_count(), 0);
}

#[tokio::test]
async fn test_transport_failure_degrades_server() {
    let session = Arc::new(FakeSession::new(&[
        ("run", Behavior::Transport("broken pipe".into())),
        ("ls", Behavior::Echo),
    ]));
    let (manager, _) = manager(FakeConnector::new().with_server("shell", session.clone()));
    manager
        .connect_all(vec![server_config("shell")], &CancellationToken::new())
        .await;

    let handle = manager.registry().resolve("run").unwrap();
    let err = manager.dispatch(&handle, "run", json!({})).await.unwrap_err();
    assert!(matches!(err, SessionError::Call { .. }));

    assert_eq!(handle.liveness().await, Liveness::Degraded);
    assert!(session.is_closed());
    assert_eq!(
        manager.registry().resolve("ls").unwrap_err(),
        ToolError::NotFound("ls".to_string())
    );
    let health = manager.server_health().await;
    assert_eq!(health[0].liveness, Liveness::Degraded);
}

#[tokio::test]
async fn test_server_error_keeps_session_ready() {
    let session = Arc::new(FakeSession::new(&[("run", Behavior::ServerError("bad input".into()))]));
    let (manager, _) = manager(FakeConnector::new().with_server("shell", session));
    manager
        .connect_all(vec![server_config("shell")], &CancellationToken::new())
        .await;

    let handle = manager.registry().resolve("run").unwrap();
    assert!(manager.dispatch(&handle, "run", json!({})).await.is_err());
    assert!(handle.is_ready().await);
    assert!(manager.registry().resolve("run").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aggregates_failures() {
    let (manager, _) = manager(
        FakeConnector::new()
            .with_server("ok", Arc::new(FakeSession::new(&[("a", Behavior::Echo)])))
            .with_server(
                "broken",
                Arc::new(FakeSession::new(&[("b", Behavior::Echo)]).failing_close("already gone")),
            )
            .with_server(
                "stuck",
                Arc::new(FakeSession::new(&[("c", Behavior::Echo)]).hanging_close(Duration::from_secs(60))),
            ),
    );
    manager
        .connect_all(
            vec![server_config("ok"), server_config("broken"), server_config("stuck")],
            &CancellationToken::new(),
        )
        .await;

    let report = manager.shutdown().await;

    assert_eq!(report.closed, vec!["ok".to_string()]);
    let failed: Vec<_> = report.failures.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(failed, vec!["broken", "stuck"]);
    assert!(report.failures[1].1.contains("timed out"));
    assert!(manager.registry().is_empty());
    assert_eq!(manager.ready_count().await, 0);
    assert!(manager
        .server_health()
        .await
        .iter()
        .all(|h| h.liveness == Liveness::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_uses_stored_config() {
    let session = Arc::new(FakeSession::new(&[("fib", Behavior::Echo)]));
    let (manager, connector) = manager(FakeConnector::new().with_flaky_server("math", session, 3));

    let outcomes = manager
        .connect_all(vec![server_config("math")], &CancellationToken::new())
        .await;
    assert!(!outcomes[0].is_ready());

    let outcome = manager
        .reconnect("math", &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_ready());
    assert_eq!(connector.attempts("math"), 4);
    assert!(manager.registry().resolve("fib").is_ok());
}

#[tokio::test]
async fn test_cancelled_startup_connects_nothing() {
    let (manager, _) = manager(
        FakeConnector::new().with_server("math", Arc::new(FakeSession::new(&[("fib", Behavior::Echo)]))),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = manager.connect_all(vec![server_config("math")], &cancel).await;

    assert_eq!(outcomes[0].liveness, Liveness::Degraded);
    assert_eq!(outcomes[0].last_error.as_deref(), Some("connect cancelled"));
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_duplicate_server_names_are_rejected() {
    let (manager, connector) = manager(
        FakeConnector::new().with_server("math", Arc::new(FakeSession::new(&[("fib", Behavior::Echo)]))),
    );

    let outcomes = manager
        .connect_all(vec![server_config("math"), server_config("math")], &CancellationToken::new())
        .await;

    assert!(outcomes[0].is_ready());
    assert_eq!(outcomes[1].liveness, Liveness::Degraded);
    assert_eq!(connector.attempts("math"), 1);
}

#[tokio::test]
async fn test_nonexistent_stdio_command_degrades() {
    let manager = SessionManager::new(
        Arc::new(StdioConnector::new(Duration::from_secs(1))),
        Arc::new(ToolRegistry::new()),
        ConnectPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
            ..policy()
        },
    );
    let config = McpServerConfig {
        command: "definitely-not-a-real-mcp-server-binary".to_string(),
        ..server_config("ghost")
    };

    let outcomes = manager
        .connect_all(vec![config], &CancellationToken::new())
        .await;

    assert_eq!(outcomes[0].liveness, Liveness::Degraded);
    assert_eq!(outcomes[0].attempts, 2);
    assert!(outcomes[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("Failed to spawn process"));
}
