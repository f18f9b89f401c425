mod config;

use clap::Parser;
use std::path::PathBuf;
use tiny_agents_core::telemetry::{init_tracing, DEFAULT_LOG_FILTER};
use tiny_agents_core::{Agent, McpServerConfig};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Chat with a model that can call tools on MCP servers
#[derive(Parser, Debug)]
#[command(name = "tiny-agent", version, about)]
struct Args {
    /// MCP server scripts (.py or .js), one stdio server each
    server_paths: Vec<PathBuf>,

    /// Model name, e.g. openai/gpt-4.1
    #[arg(long, env = "TINY_AGENT_MODEL")]
    model: Option<String>,

    /// Context window size in tokens
    #[arg(long)]
    max_context_tokens: Option<usize>,

    /// Run the tool calls of one turn concurrently
    #[arg(long)]
    parallel_tools: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logs go to stderr; stdout is the conversation
    init_tracing(DEFAULT_LOG_FILTER).map_err(|e| format!("Failed to initialize tracing: {}", e))?;

    // Defaults + env + optional TOML overlay, then flags
    let mut cfg = config::load();
    if let Some(model) = args.model {
        cfg.model = model;
    }
    if let Some(max) = args.max_context_tokens {
        cfg.max_context_tokens = max;
    }
    if args.parallel_tools {
        cfg.parallel_tool_calls = true;
    }
    for path in &args.server_paths {
        cfg.servers.push(McpServerConfig::from_script_path(path)?);
    }
    if cfg.servers.is_empty() {
        return Err("Usage: tiny-agent <path_to_server_script> [more scripts...]".into());
    }

    info!(target: "tiny_agent", model = %cfg.model, servers = cfg.servers.len(), "Starting tiny agent");

    let (interrupt_tx, mut interrupt_rx) = mpsc::channel::<()>(4);
    let startup_cancel = CancellationToken::new();
    let ctrl_c = {
        let startup_cancel = startup_cancel.clone();
        tokio::spawn(async move {
            while signal::ctrl_c().await.is_ok() {
                startup_cancel.cancel();
                if interrupt_tx.send(()).await.is_err() {
                    break;
                }
            }
        })
    };

    let agent = Agent::from_config(cfg, &startup_cancel).await?;
    // Drop the Ctrl-C that cancelled nothing during startup
    while interrupt_rx.try_recv().is_ok() {}

    for outcome in agent.startup() {
        if outcome.is_ready() {
            println!(
                "Connected to server {} with tools: {}",
                outcome.server_id,
                outcome.tools.join(", ")
            );
        } else {
            warn!(
                target: "tiny_agent",
                server = %outcome.server_id,
                error = outcome.last_error.as_deref().unwrap_or_default(),
                "Server unavailable"
            );
        }
    }
    println!("\nTiny agent started. Type your queries, 'history', 'clear' or 'quit' to exit.");

    let stdin = BufReader::new(tokio::io::stdin());
    let result = agent
        .run_interactive(stdin, tokio::io::stdout(), &mut interrupt_rx)
        .await;

    let report = agent.shutdown().await;
    for (server, error) in &report.failures {
        warn!(target: "tiny_agent", server = %server, error = %error, "Failed to close server");
    }
    ctrl_c.abort();

    result?;
    Ok(())
}
