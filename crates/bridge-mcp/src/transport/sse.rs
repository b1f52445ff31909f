//! SSE transport for MCP servers reachable over HTTP.
//!
//! The client holds one long-lived `GET` event stream open. The server's first
//! `endpoint` event names the URL that JSON-RPC messages are POSTed to;
//! responses come back on the stream as `message` events.

use super::{PendingRequests, route_incoming};
use crate::config::SseServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse::SseParser;
use futures_util::{Stream, StreamExt};
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Async SSE transport for communicating with a remote MCP server.
pub struct SseTransport {
    server: String,
    http: reqwest::Client,
    headers: HeaderMap,
    endpoint: Url,
    next_id: AtomicU64,
    pending: PendingRequests,
    reader_handle: JoinHandle<()>,
    timeout_ms: u64,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its message
    /// endpoint.
    pub async fn connect(
        server: &str,
        config: &SseServerConfig,
        log_pings: bool,
    ) -> Result<Self, McpError> {
        let base = Url::parse(&config.url)
            .map_err(|e| McpError::Protocol(format!("Invalid URL '{}': {e}", config.url)))?;
        let headers = build_headers(&config.headers)?;
        let http = reqwest::Client::builder().build()?;

        // Only the response head is bounded; the body is the long-lived stream
        let response = within("connect", config.timeout_ms, async {
            Ok(http
                .get(base.clone())
                .headers(headers.clone())
                .header(ACCEPT, "text/event-stream")
                .send()
                .await?)
        })
        .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http(format!("GET {base} returned {status}")));
        }

        let pending = PendingRequests::default();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = EventReader {
            server: server.to_string(),
            base,
            http: http.clone(),
            headers: headers.clone(),
            pending: pending.clone(),
            log_pings,
            timeout_ms: config.timeout_ms,
        };
        let reader_handle = tokio::spawn(reader.run(response.bytes_stream(), endpoint_tx));

        let endpoint =
            match tokio::time::timeout(Duration::from_millis(config.timeout_ms), endpoint_rx).await
            {
                Ok(Ok(url)) => url,
                Ok(Err(_)) => {
                    reader_handle.abort();
                    return Err(McpError::Closed);
                }
                Err(_) => {
                    reader_handle.abort();
                    return Err(McpError::Timeout {
                        name: "endpoint".to_string(),
                        timeout_ms: config.timeout_ms,
                    });
                }
            };
        tracing::debug!("MCP server '{server}' message endpoint: {endpoint}");

        Ok(Self {
            server: server.to_string(),
            http,
            headers,
            endpoint,
            next_id: AtomicU64::new(1),
            pending,
            reader_handle,
            timeout_ms: config.timeout_ms,
        })
    }

    fn ensure_running(&self) -> Result<(), McpError> {
        if self.reader_handle.is_finished() {
            return Err(McpError::ServerNotRunning {
                name: self.server.clone(),
            });
        }
        Ok(())
    }

    /// Send a JSON-RPC request and wait for its response on the event stream.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        self.ensure_running()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let waiter = self.pending.register(id);
        within(
            method,
            self.timeout_ms,
            post_message(&self.http, &self.endpoint, &self.headers, body),
        )
        .await?;
        waiter.wait(method, self.timeout_ms).await
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.ensure_running()?;
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        within(
            method,
            self.timeout_ms,
            post_message(&self.http, &self.endpoint, &self.headers, body),
        )
        .await
    }

    /// Close the event stream and fail anything still waiting.
    pub async fn shutdown(&self) {
        self.reader_handle.abort();
        self.pending.fail_all();
    }
}

/// Fail `fut` with [`McpError::Timeout`] if it runs past `timeout_ms`.
async fn within<T>(
    name: &str,
    timeout_ms: u64,
    fut: impl Future<Output = Result<T, McpError>>,
) -> Result<T, McpError> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
        .await
        .map_err(|_| McpError::Timeout {
            name: name.to_string(),
            timeout_ms,
        })?
}

async fn post_message(
    http: &reqwest::Client,
    endpoint: &Url,
    headers: &HeaderMap,
    body: String,
) -> Result<(), McpError> {
    let response = http
        .post(endpoint.clone())
        .headers(headers.clone())
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(McpError::Http(format!("POST {endpoint} returned {status}")));
    }
    Ok(())
}

fn build_headers(
    configured: &std::collections::HashMap<String, String>,
) -> Result<HeaderMap, McpError> {
    let mut headers = HeaderMap::new();
    for (name, value) in configured {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::Protocol(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| McpError::Protocol(format!("Invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Background task state for the event stream.
struct EventReader {
    server: String,
    base: Url,
    http: reqwest::Client,
    headers: HeaderMap,
    pending: PendingRequests,
    log_pings: bool,
    timeout_ms: u64,
}

impl EventReader {
    async fn run(
        self,
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        endpoint_tx: oneshot::Sender<Url>,
    ) {
        let mut stream = std::pin::pin!(byte_stream);
        let mut parser = SseParser::new();
        let mut utf8 = Utf8Buffer::default();
        let mut endpoint_tx = Some(endpoint_tx);
        let mut endpoint: Option<Url> = None;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("Event stream from MCP server '{}' failed: {e}", self.server);
                    break;
                }
            };

            for event in parser.feed(&utf8.push(&bytes)) {
                match event.name() {
                    "endpoint" => match self.base.join(event.data.trim()) {
                        Ok(url) => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(url.clone());
                            }
                            endpoint = Some(url);
                        }
                        Err(e) => tracing::warn!(
                            "MCP server '{}' sent a bad endpoint '{}': {e}",
                            self.server,
                            event.data
                        ),
                    },
                    "message" => {
                        let reply =
                            route_incoming(&self.server, &event.data, &self.pending, self.log_pings);
                        if let (Some(reply), Some(url)) = (reply, endpoint.as_ref()) {
                            self.send_reply(url, &reply).await;
                        }
                    }
                    other => tracing::debug!(
                        "Ignoring '{other}' event from MCP server '{}'",
                        self.server
                    ),
                }
            }
        }

        tracing::debug!("Event stream from MCP server '{}' ended", self.server);
        self.pending.fail_all();
    }

    async fn send_reply(&self, url: &Url, reply: &crate::jsonrpc::JsonRpcReply) {
        let result = match serde_json::to_string(reply) {
            Ok(body) => {
                within(
                    "reply",
                    self.timeout_ms,
                    post_message(&self.http, url, &self.headers, body),
                )
                .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to reply to MCP server '{}': {e}", self.server);
        }
    }
}

/// Decodes a byte stream as UTF-8 without splitting codepoints across chunks.
#[derive(Default)]
struct Utf8Buffer {
    carry: Vec<u8>,
}

impl Utf8Buffer {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // An incomplete trailing sequence has no error_len; keep it for later
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                let text = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                return text;
            }
        };
        let rest = self.carry.split_off(valid_up_to);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = rest;
        text
    }
}
