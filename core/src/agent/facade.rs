use super::dispatcher::ToolCallDispatcher;
use super::engine::{ConversationEngine, EngineOptions, EngineState};
use super::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::config::AgentConfig;
use crate::llm::{ModelProvider, OpenAiClient};
use crate::mcp::{McpConnector, ServerOutcome, SessionManager, ShutdownReport, StdioConnector};
use crate::plugin::PluginManager;
use crate::telemetry::{SessionSnapshot, SessionState};
use crate::tools::ToolRegistry;
use crate::{AgentError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One line of interactive input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Clear,
    History,
    Empty,
    Query(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "" => Command::Empty,
            "quit" | "exit" => Command::Quit,
            "clear" => Command::Clear,
            "history" => Command::History,
            _ => Command::Query(trimmed.to_string()),
        }
    }
}

const PROMPT: &str = "Query> ";

/// Entry point: wires sessions, dispatcher and engine together from config
pub struct Agent {
    engine: Mutex<ConversationEngine>,
    sessions: Arc<SessionManager>,
    stats: Arc<SessionState>,
    plugins: PluginManager,
    startup: Vec<ServerOutcome>,
}

impl Agent {
    /// Connect every configured server, then build the engine around `model`
    pub async fn connect(
        config: AgentConfig,
        model: Arc<dyn ModelProvider>,
        connector: Arc<dyn McpConnector>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ToolRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            connector,
            Arc::clone(&registry),
            config.connect_policy(),
        ));
        let startup = sessions.connect_all(config.servers.clone(), cancel).await;
        if cancel.is_cancelled() {
            sessions.shutdown().await;
            return Err(AgentError::Cancelled);
        }

        let ready = startup.iter().filter(|o| o.is_ready()).count();
        if ready == 0 && !startup.is_empty() {
            warn!(target: "agent", "No MCP server could be connected; continuing without tools");
        }

        let stats = Arc::new(SessionState::new());
        let plugins = PluginManager::new();
        let dispatcher = ToolCallDispatcher::new(Arc::clone(&sessions), config.tool_call_timeout())
            .with_parallel(config.parallel_tool_calls)
            .with_stats(Arc::clone(&stats));
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let engine = ConversationEngine::new(
            model,
            dispatcher,
            registry,
            system_prompt,
            EngineOptions::from(&config),
        )
        .with_budget(
            crate::context::TokenBudget::for_model(&config.model).with_reserve(config.reserve_tokens),
        )
        .with_stats(Arc::clone(&stats))
        .with_plugins(plugins.clone());

        info!(
            target: "agent",
            model = %config.model,
            servers = startup.len(),
            ready,
            "Agent ready"
        );

        Ok(Self {
            engine: Mutex::new(engine),
            sessions,
            stats,
            plugins,
            startup,
        })
    }

    /// Agent over stdio MCP servers and an OpenAI-compatible model
    pub async fn from_config(config: AgentConfig, cancel: &CancellationToken) -> Result<Self> {
        let model = Arc::new(OpenAiClient::new(config.llm_client_config())?);
        let connector = Arc::new(StdioConnector::new(config.tool_call_timeout()));
        Self::connect(config, model, connector, cancel).await
    }

    /// Outcome of connecting each configured server
    pub fn startup(&self) -> &[ServerOutcome] {
        &self.startup
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn stats(&self) -> SessionSnapshot {
        self.stats.snapshot()
    }

    pub async fn query(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.engine.lock().await.run_query(query, cancel).await
    }

    pub async fn clear_history(&self) {
        self.engine.lock().await.clear_history();
    }

    pub async fn summary(&self) -> String {
        self.engine.lock().await.summary()
    }

    pub async fn state(&self) -> EngineState {
        self.engine.lock().await.state()
    }

    /// Line-oriented chat loop until `quit` or end of input.
    ///
    /// A message on `interrupts` cancels the running query; at the prompt
    /// it only reminds how to exit.
    pub async fn run_interactive<R, W>(
        &self,
        reader: R,
        mut writer: W,
        interrupts: &mut mpsc::Receiver<()>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            writer.write_all(PROMPT.as_bytes()).await?;
            writer.flush().await?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                Some(()) = interrupts.recv() => {
                    writer.write_all(b"\nUse 'quit' to exit.\n").await?;
                    continue;
                }
            };
            let Some(line) = line else {
                break;
            };

            let reply = match Command::parse(&line) {
                Command::Quit => break,
                Command::Empty => "Please enter a query or command. Type 'quit' to exit.".to_string(),
                Command::Clear => {
                    self.clear_history().await;
                    "Chat history cleared.".to_string()
                }
                Command::History => self.summary().await,
                Command::Query(query) => self.interactive_query(&query, interrupts).await,
            };
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn interactive_query(&self, query: &str, interrupts: &mut mpsc::Receiver<()>) -> String {
        if self.sessions.ready_count().await == 0 {
            return "Not connected to any MCP server.".to_string();
        }

        let token = CancellationToken::new();
        let run = self.query(query, &token);
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                r = &mut run => break r,
                Some(()) = interrupts.recv() => token.cancel(),
            }
        };

        match result {
            Ok(answer) => format!("{answer}\n\n{}", self.summary().await),
            Err(AgentError::Cancelled) => "Query interrupted. Use 'quit' to exit.".to_string(),
            Err(e) => format!("Error: {}", e.user_message()),
        }
    }

    /// Close every session and plugin. Never fails.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.plugins.shutdown().await;
        let report = self.sessions.shutdown().await;
        let snapshot = self.stats.snapshot();
        info!(
            target: "agent",
            queries = snapshot.queries,
            tool_calls = snapshot.tool_calls,
            tool_errors = snapshot.tool_errors,
            "Agent shut down"
        );
        report
    }
}
