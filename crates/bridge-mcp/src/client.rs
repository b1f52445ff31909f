//! MCP client: manages one server connection.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! catalog discovery (tools/list, resources/list, both paginated), and tool
//! invocation (tools/call). Requests on one client are serialized through an
//! internal queue, so a subprocess server only ever sees one at a time.

use crate::config::McpServerConfig;
use crate::connection::{ConnectionState, McpConnection};
use crate::error::McpError;
use crate::transport::{Transport, TransportKind};
use bridge_types::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, PoisonError, RwLock};

/// MCP protocol version we support.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A read-only resource exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Result of calling a tool on an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<McpToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource, kept as the server sent it.
    Resource {
        resource: Value,
    },
}

/// What the server said it supports during `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Deserialize)]
struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: Option<String>,
    #[serde(default)]
    capabilities: ServerCapabilities,
    #[serde(default, rename = "serverInfo")]
    server_info: Option<ServerInfo>,
}

/// Client for a single MCP server.
pub struct McpClient {
    name: String,
    transport: Transport,
    queue: tokio::sync::Mutex<()>,
    state: Mutex<ConnectionState>,
    capabilities: ServerCapabilities,
    server_info: Option<ServerInfo>,
    tools: RwLock<Vec<McpToolInfo>>,
}

impl McpClient {
    /// Connect to an MCP server: open the transport, handshake, discover tools.
    pub async fn connect(
        name: impl Into<String>,
        config: &McpServerConfig,
        log_pings: bool,
    ) -> Result<Self, McpError> {
        let name = name.into();
        let transport = Transport::connect(&name, config, log_pings).await?;

        let (capabilities, server_info) = match handshake(&name, &transport).await {
            Ok(parts) => parts,
            Err(e) => {
                transport.shutdown().await;
                return Err(e);
            }
        };

        let client = Self {
            name,
            transport,
            queue: tokio::sync::Mutex::new(()),
            state: Mutex::new(ConnectionState::Ready),
            capabilities,
            server_info,
            tools: RwLock::new(Vec::new()),
        };

        if let Err(e) = client.fetch_tools().await {
            client.shutdown().await;
            return Err(e);
        }

        tracing::info!(
            "MCP server '{}' connected over {:?} with {} tools",
            client.name,
            client.transport.kind(),
            client.cached_tools().len()
        );
        Ok(client)
    }

    /// Get the server name.
    pub fn server_name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Closed is final
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }

    /// Send one request through the queue and unwrap its result.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.state() == ConnectionState::Closed {
            return Err(McpError::ServerNotRunning {
                name: self.name.clone(),
            });
        }

        let response = {
            let _turn = self.queue.lock().await;
            self.transport.send_request(method, params).await
        };

        match response {
            Ok(resp) => {
                self.set_state(ConnectionState::Ready);
                resp.into_result(&self.name)
            }
            Err(e) => {
                tracing::warn!("MCP server '{}' failed on '{method}': {e}", self.name);
                self.set_state(ConnectionState::Degraded);
                Err(e)
            }
        }
    }

    /// Fetch every page of a paginated list method.
    async fn fetch_all<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({"cursor": c}));
            let mut result = self.request(method, params).await?;

            let page = result.get_mut(key).map(Value::take).unwrap_or_default();
            if !page.is_null() {
                let page: Vec<T> = serde_json::from_value(page).map_err(|e| {
                    McpError::Protocol(format!("Failed to parse {method} response: {e}"))
                })?;
                items.extend(page);
            }

            let next = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            match next {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                Some(_) => {
                    tracing::warn!("MCP server '{}' repeated cursor on {method}", self.name);
                    break;
                }
                None => break,
            }
        }

        Ok(items)
    }

    async fn fetch_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let tools: Vec<McpToolInfo> = if self.capabilities.tools.is_some() {
            self.fetch_all("tools/list", "tools").await?
        } else {
            Vec::new()
        };
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools.clone();
        Ok(tools)
    }

    async fn fetch_resources(&self) -> Result<Vec<McpResourceInfo>, McpError> {
        if self.capabilities.resources.is_none() {
            return Ok(Vec::new());
        }
        self.fetch_all("resources/list", "resources").await
    }

    /// Call a tool on this server.
    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))
    }

    /// Shut down the server connection.
    pub async fn shutdown(&self) {
        self.set_state(ConnectionState::Closed);
        self.transport.shutdown().await;
        tracing::debug!("MCP server '{}' shut down", self.name);
    }
}

async fn handshake(
    name: &str,
    transport: &Transport,
) -> Result<(ServerCapabilities, Option<ServerInfo>), McpError> {
    let init_params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcp-bridge",
            "version": env!("CARGO_PKG_VERSION")
        }
    });

    let result = transport
        .send_request("initialize", Some(init_params))
        .await?
        .into_result(name)?;
    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| McpError::Protocol(format!("Failed to parse initialize result: {e}")))?;

    match init.protocol_version.as_deref() {
        Some(version) if version != PROTOCOL_VERSION => {
            tracing::debug!("MCP server '{name}' negotiated protocol version {version}");
        }
        _ => {}
    }

    transport
        .send_notification("notifications/initialized", None)
        .await?;

    Ok((init.capabilities, init.server_info))
}

impl McpConnection for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached_tools(&self) -> Vec<McpToolInfo> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<McpToolInfo>, McpError>> {
        Box::pin(self.fetch_tools())
    }

    fn list_resources(&self) -> BoxFuture<'_, Result<Vec<McpResourceInfo>, McpError>> {
        Box::pin(self.fetch_resources())
    }

    fn call_tool<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: Value,
    ) -> BoxFuture<'a, Result<McpToolResult, McpError>> {
        Box::pin(self.invoke(tool_name, arguments))
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.shutdown())
    }
}
