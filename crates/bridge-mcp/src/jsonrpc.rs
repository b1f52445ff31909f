//! JSON-RPC 2.0 types for MCP communication.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response to one of our requests.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the `result`, turning an `error` object into [`McpError::JsonRpc`].
    pub fn into_result(self, server: &str) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::JsonRpc {
                server: server.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        self.result.ok_or_else(|| {
            McpError::Protocol("response has neither result nor error".to_string())
        })
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Our reply to a request the server initiated (e.g. `ping`).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Any message a server may send us.
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    Response(JsonRpcResponse),
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl JsonRpcMessage {
    /// Classify one raw line/event: a `method` with an `id` is a request, a
    /// `method` without one is a notification, anything else is a response.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(raw)?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        match method {
            Some(method) => {
                let params = value.get_mut("params").map(Value::take);
                match value.get_mut("id").map(Value::take) {
                    Some(id) if !id.is_null() => Ok(JsonRpcMessage::Request { id, method, params }),
                    _ => Ok(JsonRpcMessage::Notification { method, params }),
                }
            }
            None => Ok(JsonRpcMessage::Response(serde_json::from_value(value)?)),
        }
    }
}
