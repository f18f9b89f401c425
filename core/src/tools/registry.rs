use super::descriptor::ToolDescriptor;
use super::error::{ToolError, ToolResult};
use crate::mcp::session::SessionHandle;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, info};

struct ToolEntry {
    descriptor: ToolDescriptor,
    server_id: String,
    /// The SessionManager owns the handle; a dead session leaves this dangling
    session: Weak<SessionHandle>,
}

#[derive(Default)]
struct RegistryInner {
    /// Registration order is the order the model sees
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl RegistryInner {
    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.descriptor.name.clone(), i))
            .collect();
    }
}

/// A registry of every tool exposed by the connected servers
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register all tools of one server.
    ///
    /// All-or-nothing: if any name is already owned by another server (or
    /// repeated within `tools`), nothing is registered. Re-registering a
    /// server's own tool replaces it in place.
    pub fn register(
        &self,
        server_id: &str,
        tools: Vec<ToolDescriptor>,
        session: &Arc<SessionHandle>,
    ) -> ToolResult<usize> {
        let mut inner = self.write();

        let mut seen = std::collections::HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ToolError::Duplicate {
                    name: tool.name.clone(),
                    existing_server: server_id.to_string(),
                });
            }
            if let Some(&idx) = inner.index.get(&tool.name) {
                let owner = &inner.entries[idx].server_id;
                if owner != server_id {
                    return Err(ToolError::Duplicate {
                        name: tool.name.clone(),
                        existing_server: owner.clone(),
                    });
                }
            }
        }

        let count = tools.len();
        for descriptor in tools {
            let entry = ToolEntry {
                server_id: server_id.to_string(),
                session: Arc::downgrade(session),
                descriptor,
            };
            match inner.index.get(&entry.descriptor.name).copied() {
                Some(idx) => inner.entries[idx] = entry,
                None => {
                    let idx = inner.entries.len();
                    inner.index.insert(entry.descriptor.name.clone(), idx);
                    inner.entries.push(entry);
                }
            }
        }

        info!(target: "tool_registry", server = %server_id, count, "Registered tools");
        Ok(count)
    }

    /// Find the live session that owns `tool_name`
    pub fn resolve(&self, tool_name: &str) -> ToolResult<Arc<SessionHandle>> {
        let inner = self.read();
        let idx = inner
            .index
            .get(tool_name)
            .copied()
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        let entry = &inner.entries[idx];
        entry
            .session
            .upgrade()
            .ok_or_else(|| ToolError::SessionClosed(entry.server_id.clone()))
    }

    /// Tool catalog in registration order
    pub fn schema_list(&self) -> Vec<ToolDescriptor> {
        self.read()
            .entries
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Remove every tool owned by `server_id`, returning how many were removed
    pub fn unregister_all(&self, server_id: &str) -> usize {
        let mut inner = self.write();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.server_id != server_id);
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.reindex();
            debug!(target: "tool_registry", server = %server_id, removed, "Unregistered tools");
        }
        removed
    }

    /// Server that owns `tool_name`
    pub fn server_of(&self, tool_name: &str) -> Option<String> {
        let inner = self.read();
        inner
            .index
            .get(tool_name)
            .map(|&i| inner.entries[i].server_id.clone())
    }

    /// Tool names owned by `server_id`, in registration order
    pub fn tool_names(&self, server_id: &str) -> Vec<String> {
        self.read()
            .entries
            .iter()
            .filter(|e| e.server_id == server_id)
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
