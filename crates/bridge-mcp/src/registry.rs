//! Client registry: owns every MCP server connection and the enable/disable
//! policy over servers and tools.
//!
//! State sits behind one read-write lock. Reads take a snapshot of the
//! connections they need and release the lock before any I/O, so catalog
//! fetches and tool calls never hold it.

use crate::client::{McpClient, McpResourceInfo, McpToolInfo};
use crate::config::McpConfig;
use crate::connection::McpConnection;
use bridge_types::RegistryError;
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Entry {
    conn: Arc<dyn McpConnection>,
    enabled: bool,
}

#[derive(Default)]
struct RegistryState {
    /// Ordered by name so tool resolution is deterministic.
    connections: BTreeMap<String, Entry>,
    /// Tool-level flags. Absent means enabled.
    disabled_tools: HashSet<String>,
}

/// Manages connections to multiple MCP servers.
#[derive(Default)]
pub struct ClientRegistry {
    state: RwLock<RegistryState>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to all configured MCP servers concurrently.
    ///
    /// Servers that fail to start are logged and skipped; the registry holds
    /// whatever servers are available.
    pub async fn start(config: &McpConfig) -> Self {
        let registry = Self::new();

        let attempts = config.servers.iter().map(|(name, server_config)| async move {
            let result = McpClient::connect(name.clone(), server_config, config.log_server_pings).await;
            (name, result)
        });

        for (name, result) in join_all(attempts).await {
            match result {
                Ok(client) => {
                    if let Err(e) = registry.register(name, Arc::new(client)) {
                        tracing::warn!("{e}");
                    }
                }
                Err(e) => tracing::warn!("Failed to start MCP server '{name}': {e}"),
            }
        }

        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection under `name`, enabled.
    pub fn register(
        &self,
        name: impl Into<String>,
        conn: Arc<dyn McpConnection>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut state = self.write();
        if state.connections.contains_key(&name) {
            return Err(RegistryError::DuplicateConnection { name });
        }
        tracing::debug!("Registered MCP server '{name}'");
        state.connections.insert(name, Entry { conn, enabled: true });
        Ok(())
    }

    /// Remove a connection without closing it. Tool flags are kept.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn McpConnection>> {
        self.write().connections.remove(name).map(|e| e.conn)
    }

    /// Connections whose server-level flag is on, in name order.
    pub fn enabled_connections(&self) -> Vec<Arc<dyn McpConnection>> {
        self.read()
            .connections
            .values()
            .filter(|e| e.enabled)
            .map(|e| Arc::clone(&e.conn))
            .collect()
    }

    fn enabled_entries(&self) -> Vec<(String, Arc<dyn McpConnection>)> {
        self.read()
            .connections
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(name, e)| (name.clone(), Arc::clone(&e.conn)))
            .collect()
    }

    /// Names of enabled servers.
    pub fn enabled_server_names(&self) -> Vec<String> {
        self.read()
            .connections
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every registered server with its enabled flag.
    pub fn servers(&self) -> Vec<(String, bool)> {
        self.read()
            .connections
            .iter()
            .map(|(name, e)| (name.clone(), e.enabled))
            .collect()
    }

    /// Number of registered servers, enabled or not.
    pub fn len(&self) -> usize {
        self.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_server_enabled(&self, name: &str) -> bool {
        self.read()
            .connections
            .get(name)
            .is_some_and(|e| e.enabled)
    }

    /// Flip a server's flag. Returns false if no such server is registered.
    pub fn set_server_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.write().connections.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                tracing::info!(
                    "MCP server '{name}' {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                true
            }
            None => false,
        }
    }

    /// Whether any registered connection, enabled or not, advertises `tool`.
    pub fn is_tool_known(&self, tool: &str) -> bool {
        let state = self.read();
        Self::knows(&state, tool)
    }

    fn knows(state: &RegistryState, tool: &str) -> bool {
        state
            .connections
            .values()
            .any(|e| e.conn.cached_tools().iter().any(|t| t.name == tool))
    }

    /// The tool's own flag, independent of its server's flag.
    pub fn is_tool_enabled(&self, tool: &str) -> Result<bool, RegistryError> {
        let state = self.read();
        if !Self::knows(&state, tool) {
            return Err(RegistryError::UnknownTool {
                name: tool.to_string(),
            });
        }
        Ok(!state.disabled_tools.contains(tool))
    }

    /// Flip a tool's flag. Returns false if no connection advertises the tool.
    pub fn set_tool_enabled(&self, tool: &str, enabled: bool) -> bool {
        let mut state = self.write();
        if !Self::knows(&state, tool) {
            return false;
        }
        if enabled {
            state.disabled_tools.remove(tool);
        } else {
            state.disabled_tools.insert(tool.to_string());
        }
        tracing::info!(
            "Tool '{tool}' {}",
            if enabled { "enabled" } else { "disabled" }
        );
        true
    }

    /// Fetch the tool catalog of every enabled connection. A connection that
    /// fails is logged and left out; the others are still reported.
    pub async fn list_tools(&self) -> BTreeMap<String, Vec<McpToolInfo>> {
        let conns = self.enabled_entries();
        let results = join_all(conns.iter().map(|(_, c)| c.list_tools())).await;
        let mut catalogs = BTreeMap::new();
        for ((name, _), result) in conns.into_iter().zip(results) {
            match result {
                Ok(tools) => {
                    catalogs.insert(name, tools);
                }
                Err(e) => tracing::warn!("Failed to list tools of '{name}': {e}"),
            }
        }
        catalogs
    }

    /// Fetch the resource catalog of every enabled connection, with the same
    /// isolation as [`Self::list_tools`].
    pub async fn list_resources(&self) -> BTreeMap<String, Vec<McpResourceInfo>> {
        let conns = self.enabled_entries();
        let results = join_all(conns.iter().map(|(_, c)| c.list_resources())).await;
        let mut catalogs = BTreeMap::new();
        for ((name, _), result) in conns.into_iter().zip(results) {
            match result {
                Ok(resources) => {
                    catalogs.insert(name, resources);
                }
                Err(e) => tracing::warn!("Failed to list resources of '{name}': {e}"),
            }
        }
        catalogs
    }

    /// Refresh every catalog and return the tools a conversation may call:
    /// enabled tools of enabled servers, first server in name order winning
    /// on a name clash.
    pub async fn routable_tools(&self) -> Vec<McpToolInfo> {
        let catalogs = self.list_tools().await;
        let state = self.read();
        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for (server, catalog) in catalogs {
            // The server may have been disabled while the fetch ran
            if !state.connections.get(&server).is_some_and(|e| e.enabled) {
                continue;
            }
            for tool in catalog {
                if state.disabled_tools.contains(&tool.name) {
                    continue;
                }
                if seen.insert(tool.name.clone()) {
                    tools.push(tool);
                } else {
                    tracing::debug!("Tool '{}' on '{server}' is shadowed", tool.name);
                }
            }
        }
        tools
    }

    /// The connection that should run `tool`: the first enabled connection
    /// advertising it, provided the tool itself is enabled.
    pub fn resolve_tool_owner(&self, tool: &str) -> Result<Arc<dyn McpConnection>, RegistryError> {
        let state = self.read();
        let unknown = || RegistryError::UnknownTool {
            name: tool.to_string(),
        };
        if state.disabled_tools.contains(tool) {
            return Err(unknown());
        }
        state
            .connections
            .values()
            .filter(|e| e.enabled)
            .find(|e| e.conn.cached_tools().iter().any(|t| t.name == tool))
            .map(|e| Arc::clone(&e.conn))
            .ok_or_else(unknown)
    }

    /// Close and drop every connection.
    pub async fn shutdown(&self) {
        let conns: Vec<_> = std::mem::take(&mut self.write().connections)
            .into_values()
            .map(|e| e.conn)
            .collect();
        join_all(conns.iter().map(|c| c.close())).await;
    }
}
