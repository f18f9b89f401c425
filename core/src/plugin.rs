// Plugin hooks around each query
use crate::{AgentError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Optional extension point notified as a query progresses.
///
/// Every hook defaults to a no-op. A failing hook is logged and never fails
/// the query. Plugins run in no particular order.
#[async_trait]
pub trait AgentPlugin: Send + Sync {
    async fn on_query_start(&self, _query: &str) -> Result<()> {
        Ok(())
    }

    async fn on_response_ready(&self, _response: &str) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _error: &AgentError) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Plugin Manager
#[derive(Default, Clone)]
pub struct PluginManager {
    plugins: Arc<DashMap<String, Arc<dyn AgentPlugin>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any plugin with the same id
    pub fn register_plugin(&self, plugin_id: impl Into<String>, plugin: Arc<dyn AgentPlugin>) {
        let plugin_id = plugin_id.into();
        info!(target: "plugin", plugin = %plugin_id, "Registered plugin");
        self.plugins.insert(plugin_id, plugin);
    }

    pub fn unregister_plugin(&self, plugin_id: &str) -> bool {
        self.plugins.remove(plugin_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Copy out the plugins so no map guard is held across an await
    fn snapshot(&self) -> Vec<(String, Arc<dyn AgentPlugin>)> {
        self.plugins
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    pub async fn query_started(&self, query: &str) {
        for (id, plugin) in self.snapshot() {
            if let Err(e) = plugin.on_query_start(query).await {
                warn!(target: "plugin", plugin = %id, hook = "on_query_start", error = %e, "Plugin hook failed");
            }
        }
    }

    pub async fn response_ready(&self, response: &str) {
        for (id, plugin) in self.snapshot() {
            if let Err(e) = plugin.on_response_ready(response).await {
                warn!(target: "plugin", plugin = %id, hook = "on_response_ready", error = %e, "Plugin hook failed");
            }
        }
    }

    pub async fn error_raised(&self, error: &AgentError) {
        for (id, plugin) in self.snapshot() {
            if let Err(e) = plugin.on_error(error).await {
                warn!(target: "plugin", plugin = %id, hook = "on_error", error = %e, "Plugin hook failed");
            }
        }
    }

    pub async fn shutdown(&self) {
        info!(target: "plugin", "Plugin Manager shutting down");
        for (id, plugin) in self.snapshot() {
            if let Err(e) = plugin.shutdown().await {
                warn!(target: "plugin", plugin = %id, error = %e, "Error shutting down plugin");
            }
        }
        self.plugins.clear();
    }
}
