//! MCP (Model Context Protocol) client side of MCP Bridge.
//!
//! Supports stdio servers (a child process speaking newline-delimited JSON-RPC
//! 2.0) and SSE servers (an HTTP event stream plus a POST endpoint). Each
//! configured server is connected, initialized with a handshake, and its
//! catalog discovered. The [`ClientRegistry`] owns every connection and
//! decides which tools are routable; [`translate`] maps MCP descriptors and
//! results onto chat-completion types.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod jsonrpc;
pub mod registry;
mod sse;
pub mod translate;
mod transport;

pub use client::{McpClient, McpResourceInfo, McpToolContent, McpToolInfo, McpToolResult};
pub use config::{McpConfig, McpServerConfig, SseServerConfig, StdioServerConfig};
pub use connection::{ConnectionState, McpConnection};
pub use error::McpError;
pub use registry::ClientRegistry;
pub use translate::{EMPTY_RESULT_PLACEHOLDER, to_function_schema, to_tool_message};
pub use transport::TransportKind;
