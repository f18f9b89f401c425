use crate::context::{Message, ToolCall};
use crate::mcp::{SessionError, SessionManager};
use crate::telemetry::SessionState;
use crate::tools::ToolError;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tool result text when a tool succeeds with no output
pub const NO_CONTENT: &str = "No content returned";

/// Tool result text for a name no connected server provides
pub const TOOL_NOT_FOUND: &str = "Error: Tool not found";

/// Runs the tool calls of one assistant turn.
///
/// Every call yields exactly one tool message, in input order. A failing
/// call only affects its own message.
pub struct ToolCallDispatcher {
    sessions: Arc<SessionManager>,
    call_timeout: Duration,
    parallel: bool,
    stats: Option<Arc<SessionState>>,
}

impl ToolCallDispatcher {
    pub fn new(sessions: Arc<SessionManager>, call_timeout: Duration) -> Self {
        Self {
            sessions,
            call_timeout,
            parallel: false,
            stats: None,
        }
    }

    /// Run the calls of a turn concurrently instead of one after another
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_stats(mut self, stats: Arc<SessionState>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Message> {
        if self.parallel && calls.len() > 1 {
            join_all(calls.iter().map(|call| self.execute(call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call).await);
            }
            results
        }
    }

    async fn execute(&self, call: &ToolCall) -> Message {
        let started = Instant::now();
        let outcome = self.run(call).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(stats) = &self.stats {
            stats.record_tool_call(outcome.is_err());
        }

        let text = match outcome {
            Ok(text) => {
                debug!(target: "dispatcher", tool = %call.name, call_id = %call.id, elapsed_ms, "Tool call succeeded");
                text
            }
            Err(e) => {
                warn!(target: "dispatcher", tool = %call.name, call_id = %call.id, elapsed_ms, error = %e, "Tool call failed");
                error_text(&e)
            }
        };
        Message::tool_result(call, text)
    }

    async fn run(&self, call: &ToolCall) -> Result<String, ToolError> {
        let handle = self.sessions.registry().resolve(&call.name)?;
        let arguments = parse_arguments(&call.arguments)?;

        let result = tokio::time::timeout(
            self.call_timeout,
            self.sessions.dispatch(&handle, &call.name, arguments),
        )
        .await
        .map_err(|_| ToolError::Timeout(self.call_timeout))?
        .map_err(|e| match e {
            SessionError::Closed(server) => ToolError::SessionClosed(server),
            SessionError::Call { source, .. } => ToolError::ExecutionFailed(source.to_string()),
            other => ToolError::Internal(other.to_string()),
        })?;

        if result.is_error {
            return Err(ToolError::ExecutionFailed(result.content));
        }
        if result.content.trim().is_empty() {
            return Ok(NO_CONTENT.to_string());
        }
        Ok(result.content)
    }
}

/// Tool message text for a failed call
fn error_text(e: &ToolError) -> String {
    match e {
        ToolError::NotFound(_) => TOOL_NOT_FOUND.to_string(),
        other => format!("Error: {other}"),
    }
}

/// Parse raw model-produced arguments. Empty input means no arguments.
pub fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err(ToolError::InvalidArguments(
            "expected a JSON object".to_string(),
        )),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}
