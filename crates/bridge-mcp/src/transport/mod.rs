//! Transports: the live channel to one MCP server.
//!
//! Both transports share the same request bookkeeping: every outgoing request
//! gets a fresh id and a oneshot slot in [`PendingRequests`]; a background task
//! reads the server's messages and completes the matching slot.

mod sse;
mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcReply, JsonRpcResponse, METHOD_NOT_FOUND};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Which kind of channel a connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

/// A connected transport of either kind.
pub enum Transport {
    Stdio(StdioTransport),
    Sse(SseTransport),
}

impl Transport {
    /// Open the transport described by `config`. Does not perform the MCP
    /// handshake; see [`crate::McpClient::connect`].
    pub async fn connect(
        server: &str,
        config: &McpServerConfig,
        log_pings: bool,
    ) -> Result<Self, McpError> {
        match config {
            McpServerConfig::Stdio(c) => Ok(Transport::Stdio(StdioTransport::spawn(
                server, c, log_pings,
            )?)),
            McpServerConfig::Sse(c) => Ok(Transport::Sse(
                SseTransport::connect(server, c, log_pings).await?,
            )),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio(_) => TransportKind::Stdio,
            Transport::Sse(_) => TransportKind::Sse,
        }
    }

    /// Send a JSON-RPC request and wait for the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        match self {
            Transport::Stdio(t) => t.send_request(method, params).await,
            Transport::Sse(t) => t.send_request(method, params).await,
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.send_notification(method, params).await,
            Transport::Sse(t) => t.send_notification(method, params).await,
        }
    }

    pub async fn shutdown(&self) {
        match self {
            Transport::Stdio(t) => t.shutdown().await,
            Transport::Sse(t) => t.shutdown().await,
        }
    }
}

type ResponseSlots = HashMap<u64, oneshot::Sender<JsonRpcResponse>>;

/// In-flight requests awaiting a response, keyed by JSON-RPC id.
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    slots: Arc<Mutex<ResponseSlots>>,
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, ResponseSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for `id`. Dropping the returned handle frees the slot,
    /// so an abandoned request never leaks.
    pub(crate) fn register(&self, id: u64) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        PendingResponse {
            id,
            rx,
            pending: self.clone(),
        }
    }

    /// Deliver a response to whoever is waiting on its id.
    pub(crate) fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            tracing::debug!("Dropping MCP response without id");
            return;
        };
        match self.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!("No pending request for MCP response id {id}"),
        }
    }

    /// Fail every waiter (their receivers observe a closed channel).
    pub(crate) fn fail_all(&self) {
        self.lock().clear();
    }

    fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Handle for one in-flight request.
pub(crate) struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<JsonRpcResponse>,
    pending: PendingRequests,
}

impl PendingResponse {
    /// Wait for the response, failing after `timeout_ms`.
    pub(crate) async fn wait(
        mut self,
        method: &str,
        timeout_ms: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut self.rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => Err(McpError::Timeout {
                name: method.to_string(),
                timeout_ms,
            }),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.pending.forget(self.id);
    }
}

/// Route one raw message from a server. Responses complete their pending
/// request; server-initiated requests produce a reply for the caller to send.
pub(crate) fn route_incoming(
    server: &str,
    raw: &str,
    pending: &PendingRequests,
    log_pings: bool,
) -> Option<JsonRpcReply> {
    let message = match JsonRpcMessage::parse(raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Failed to parse message from MCP server '{server}': {e}: {raw}");
            return None;
        }
    };

    match message {
        JsonRpcMessage::Response(resp) => {
            pending.complete(resp);
            None
        }
        JsonRpcMessage::Request { id, method, .. } if method == "ping" => {
            if log_pings {
                tracing::info!("Ping from MCP server '{server}'");
            } else {
                tracing::trace!("Ping from MCP server '{server}'");
            }
            Some(JsonRpcReply::result(id, serde_json::json!({})))
        }
        JsonRpcMessage::Request { id, method, .. } => {
            tracing::debug!("Unsupported request '{method}' from MCP server '{server}'");
            Some(JsonRpcReply::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ))
        }
        JsonRpcMessage::Notification { method, .. } => {
            tracing::debug!("Notification from MCP server '{server}': {method}");
            None
        }
    }
}
