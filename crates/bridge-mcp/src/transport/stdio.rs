//! Stdio transport for MCP server communication.
//!
//! Spawns a child process and manages async communication over stdin/stdout
//! using newline-delimited JSON-RPC messages. The server's stderr is forwarded
//! to the log at debug level.

use super::{PendingRequests, route_incoming};
use crate::config::StdioServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::PoisonError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    server: String,
    next_id: AtomicU64,
    write_tx: std::sync::Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingRequests,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
    child: Mutex<Child>,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn a child process and start background reader/writer tasks.
    pub fn spawn(
        server: &str,
        config: &StdioServerConfig,
        log_pings: bool,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: config.command.clone(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(McpError::Protocol(format!(
                "MCP server '{server}' was spawned without piped stdio"
            )));
        };

        let pending = PendingRequests::default();

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // Reader task: routes responses to waiters and answers server requests.
        // It holds only a weak sender so dropping `write_tx` still closes stdin.
        let reply_tx = write_tx.downgrade();
        let reader_pending = pending.clone();
        let reader_server = server.to_string();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let Some(reply) = route_incoming(&reader_server, &line, &reader_pending, log_pings)
                else {
                    continue;
                };
                let Some(tx) = reply_tx.upgrade() else {
                    break;
                };
                match serde_json::to_string(&reply) {
                    Ok(serialized) => {
                        let _ = tx.send(serialized).await;
                    }
                    Err(e) => tracing::warn!("Failed to encode reply to '{reader_server}': {e}"),
                }
            }
            tracing::debug!("MCP server '{reader_server}' closed its stdout");
            reader_pending.fail_all();
        });

        let stderr_server = server.to_string();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(server = %stderr_server, "{line}");
            }
        });

        Ok(Self {
            server: server.to_string(),
            next_id: AtomicU64::new(1),
            write_tx: std::sync::Mutex::new(Some(write_tx)),
            pending,
            reader_handle,
            writer_handle,
            stderr_handle,
            child: Mutex::new(child),
            timeout_ms: config.timeout_ms,
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<String>, McpError> {
        if self.reader_handle.is_finished() {
            return Err(McpError::ServerNotRunning {
                name: self.server.clone(),
            });
        }
        self.write_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| McpError::ServerNotRunning {
                name: self.server.clone(),
            })
    }

    /// Send a JSON-RPC request and wait for the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let serialized = serde_json::to_string(&request)?;

        let waiter = self.pending.register(id);
        self.sender()?
            .send(serialized)
            .await
            .map_err(|_| McpError::Closed)?;

        waiter.wait(method, self.timeout_ms).await
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let serialized = serde_json::to_string(&notification)?;

        self.sender()?
            .send(serialized)
            .await
            .map_err(|_| McpError::Closed)
    }

    /// Shut down the transport: close stdin, wait briefly, then kill.
    pub async fn shutdown(&self) {
        // Dropping the last strong sender sends EOF to the child
        self.write_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let graceful = tokio::time::timeout(Duration::from_secs(5), async {
            let mut child = self.child.lock().await;
            let _ = child.wait().await;
        })
        .await;

        if graceful.is_err() {
            let mut child = self.child.lock().await;
            let _ = child.kill().await;
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
        self.stderr_handle.abort();
        self.pending.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(command: &str, args: &[&str], timeout_ms: u64) -> StdioServerConfig {
        StdioServerConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn spawn_echo_process() {
        let transport = StdioTransport::spawn("echo", &config("cat", &[], 5000), false);
        assert!(transport.is_ok());
        transport.unwrap().shutdown().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = StdioTransport::spawn(
            "missing",
            &config("this_command_does_not_exist_xyz123", &[], 5000),
            false,
        );
        match result {
            Err(McpError::SpawnFailed { name, .. }) => {
                assert_eq!(name, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("Expected SpawnFailed, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip_with_mock() {
        // Echo back a result carrying the request id, using only sed
        let script = r#"while IFS= read -r line; do id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p'); [ -n "$id" ] && printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"; done"#;
        let Ok(transport) =
            StdioTransport::spawn("mock", &config("bash", &["-c", script], 5000), false)
        else {
            // Skip test if bash is not available
            return;
        };

        let resp = transport
            .send_request("test/method", Some(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn notification_does_not_block() {
        let transport = StdioTransport::spawn("cat", &config("cat", &[], 5000), false).unwrap();
        let result = transport
            .send_notification("notifications/initialized", None)
            .await;
        assert!(result.is_ok());
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_fires_on_unresponsive_server() {
        // `sleep` never writes to stdout, so requests will time out
        let transport =
            StdioTransport::spawn("sleepy", &config("sleep", &["10"], 100), false).unwrap();

        let result = transport
            .send_request("test/method", Some(serde_json::json!({})))
            .await;
        match result {
            Err(McpError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 100),
            other => panic!("Expected Timeout, got: {other:?}"),
        }

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn exited_server_refuses_requests() {
        // `true` exits immediately; once its stdout closes, requests are refused
        let transport = StdioTransport::spawn("gone", &config("true", &[], 5000), false).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let result = transport.send_request("tools/list", None).await;
        assert!(
            matches!(result, Err(McpError::ServerNotRunning { .. })),
            "Expected ServerNotRunning, got {result:?}"
        );
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_refused() {
        let transport = StdioTransport::spawn("cat", &config("cat", &[], 5000), false).unwrap();
        transport.shutdown().await;
        let result = transport.send_notification("x", None).await;
        assert!(matches!(result, Err(McpError::ServerNotRunning { .. })));
    }
}
