//! The connection seam the registry and orchestrator talk to.

use crate::client::{McpResourceInfo, McpToolInfo, McpToolResult};
use crate::error::McpError;
use crate::transport::TransportKind;
use bridge_types::BoxFuture;
use serde::Serialize;

/// Lifecycle of one server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Handshake in progress.
    Initializing,
    Ready,
    /// The last request failed at the transport level. The next success
    /// returns the connection to `Ready`.
    Degraded,
    /// Shut down; every request is refused.
    Closed,
}

/// One live connection to an MCP server.
///
/// [`crate::McpClient`] is the real implementation; tests substitute their own.
pub trait McpConnection: Send + Sync {
    /// Server name this connection was registered under.
    fn name(&self) -> &str;

    fn kind(&self) -> TransportKind;

    fn state(&self) -> ConnectionState;

    /// Tools from the most recent successful catalog fetch.
    fn cached_tools(&self) -> Vec<McpToolInfo>;

    /// Fetch the tool catalog from the server and refresh the cache.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<McpToolInfo>, McpError>>;

    /// Fetch the resource catalog from the server.
    fn list_resources(&self) -> BoxFuture<'_, Result<Vec<McpResourceInfo>, McpError>>;

    fn call_tool<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, Result<McpToolResult, McpError>>;

    fn close(&self) -> BoxFuture<'_, ()>;
}
