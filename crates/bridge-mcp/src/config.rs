//! Configuration types for MCP servers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

fn default_timeout() -> u64 {
    30000
}

/// Top-level MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
    /// Log server-initiated pings at info level instead of trace.
    #[serde(default)]
    pub log_server_pings: bool,
}

/// Configuration for a single MCP server. The transport is chosen by shape:
/// a `command` means a subprocess, a `url` means an SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Stdio(StdioServerConfig),
    Sse(SseServerConfig),
}

impl McpServerConfig {
    /// Per-request timeout in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        match self {
            McpServerConfig::Stdio(c) => c.timeout_ms,
            McpServerConfig::Sse(c) => c.timeout_ms,
        }
    }
}

/// A server spawned as a child process speaking JSON-RPC over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioServerConfig {
    /// Command to run (e.g., "npx", "uvx").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Timeout for requests in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// A server reached over a persistent SSE event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseServerConfig {
    /// URL of the event stream (e.g., "http://localhost:8080/sse").
    pub url: String,
    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Timeout for requests in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}
