/// Example: Using MCP tools without a model
///
/// This example demonstrates how to:
/// 1. Configure and connect to MCP servers
/// 2. Discover tools through the registry
/// 3. Call a tool directly through the SessionManager
///
/// Prerequisites:
/// - Node.js installed (for running MCP servers)
///
/// Run with:
/// ```bash
/// cargo run --example mcp_integration
/// ```
use serde_json::json;
use std::sync::Arc;
use tiny_agents_core::telemetry::{init_tracing, DEFAULT_LOG_FILTER};
use tiny_agents_core::{ConnectPolicy, McpServerConfig, SessionManager, StdioConnector, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(DEFAULT_LOG_FILTER).map_err(|e| format!("Failed to initialize tracing: {}", e))?;

    info!("Starting MCP integration example");

    // Requires: npx -y @modelcontextprotocol/server-filesystem
    let configs = vec![McpServerConfig {
        name: "filesystem".to_string(),
        command: "npx".to_string(),
        args: vec![
            "-y".to_string(),
            "@modelcontextprotocol/server-filesystem".to_string(),
            "/tmp".to_string(),
        ],
        env: None,
        cwd: None,
        protocol_version: None,
    }];

    let registry = Arc::new(ToolRegistry::new());
    let sessions = SessionManager::new(
        Arc::new(StdioConnector::default()),
        Arc::clone(&registry),
        ConnectPolicy::default(),
    );

    info!("Connecting to MCP servers...");
    for outcome in sessions.connect_all(configs, &CancellationToken::new()).await {
        if outcome.is_ready() {
            info!("Connected to {} with tools {:?}", outcome.server_id, outcome.tools);
        } else {
            warn!(
                "Failed to connect to {}: {}",
                outcome.server_id,
                outcome.last_error.unwrap_or_default()
            );
        }
    }

    info!("Available tools:");
    for tool in registry.schema_list() {
        info!("  {} - {}", tool.name, tool.description);
    }

    if let Ok(handle) = registry.resolve("read_file") {
        let test_file = "/tmp/tiny_agents_mcp_test.txt";
        std::fs::write(test_file, "Hello from the MCP integration example!")?;

        match sessions
            .dispatch(&handle, "read_file", json!({ "path": test_file }))
            .await
        {
            Ok(result) if result.is_error => warn!("MCP tool error: {}", result.content),
            Ok(result) => info!("MCP tool result: {}", result.content),
            Err(e) => warn!("Failed to invoke MCP tool: {}", e),
        }

        std::fs::remove_file(test_file)?;
    }

    let report = sessions.shutdown().await;
    for (server, error) in &report.failures {
        warn!("Failed to close {}: {}", server, error);
    }

    Ok(())
}
