//! The operations the bridge exposes to a front-end: chat completions plus
//! the catalog and enable/disable admin surface.

use crate::orchestrator::{Completion, ConversationEvent, Orchestrator};
use bridge_mcp::{ClientRegistry, McpResourceInfo, McpToolInfo};
use bridge_types::{BridgeError, ChatCompletionRequest, RegistryError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A registered server and its server-level flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub enabled: bool,
}

/// Facade over the orchestrator and the client registry.
pub struct BridgeService {
    orchestrator: Orchestrator,
    registry: Arc<ClientRegistry>,
}

impl BridgeService {
    /// The orchestrator must route through `registry`.
    pub fn new(orchestrator: Orchestrator, registry: Arc<ClientRegistry>) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Run a full tool-using conversation and return its final reply.
    pub async fn chat_completion<F>(
        &self,
        request: ChatCompletionRequest,
        cancel: CancellationToken,
        on_event: F,
    ) -> Result<Completion, BridgeError>
    where
        F: FnMut(ConversationEvent),
    {
        self.orchestrator.run(request, cancel, on_event).await
    }

    /// Tool catalogs of enabled servers. Servers that fail are left out.
    pub async fn list_tools(&self) -> BTreeMap<String, Vec<McpToolInfo>> {
        self.registry.list_tools().await
    }

    /// Resource catalogs of enabled servers. Servers that fail are left out.
    pub async fn list_resources(&self) -> BTreeMap<String, Vec<McpResourceInfo>> {
        self.registry.list_resources().await
    }

    pub fn enabled_servers(&self) -> Vec<String> {
        self.registry.enabled_server_names()
    }

    pub fn all_servers(&self) -> Vec<ServerStatus> {
        self.registry
            .servers()
            .into_iter()
            .map(|(name, enabled)| ServerStatus { name, enabled })
            .collect()
    }

    /// Set a tool's own flag.
    pub fn set_tool_enabled(&self, tool: &str, enabled: bool) -> Result<(), RegistryError> {
        if self.registry.set_tool_enabled(tool, enabled) {
            Ok(())
        } else {
            Err(RegistryError::UnknownTool {
                name: tool.to_string(),
            })
        }
    }

    /// A tool's own flag, regardless of its server's flag.
    pub fn tool_status(&self, tool: &str) -> Result<bool, RegistryError> {
        self.registry.is_tool_enabled(tool)
    }

    pub fn set_server_enabled(&self, server: &str, enabled: bool) -> Result<(), RegistryError> {
        if self.registry.set_server_enabled(server, enabled) {
            Ok(())
        } else {
            Err(RegistryError::UnknownServer {
                name: server.to_string(),
            })
        }
    }

    /// Close every MCP connection.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_types::{
        ApiError, BoxFuture, ChatCompletionResponse, CompletionRecord, InteractionLog, LogError,
        Provider, ToolCallRecord,
    };

    struct NoProvider;

    impl Provider for NoProvider {
        fn create_chat_completion<'a>(
            &'a self,
            _request: &'a ChatCompletionRequest,
        ) -> BoxFuture<'a, Result<ChatCompletionResponse, ApiError>> {
            Box::pin(async { Err(ApiError::Network("offline".to_string())) })
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    struct NoLog;

    impl InteractionLog for NoLog {
        fn record_completion<'a>(
            &'a self,
            _record: &'a CompletionRecord,
        ) -> BoxFuture<'a, Result<(), LogError>> {
            Box::pin(async { Ok(()) })
        }

        fn record_tool_call<'a>(
            &'a self,
            _record: &'a ToolCallRecord,
        ) -> BoxFuture<'a, Result<(), LogError>> {
            Box::pin(async { Ok(()) })
        }

        fn finalize_completion<'a>(
            &'a self,
            _completion_id: &'a str,
            _final_response: &'a serde_json::Value,
        ) -> BoxFuture<'a, Result<(), LogError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn service() -> BridgeService {
        let registry = Arc::new(ClientRegistry::new());
        let orchestrator =
            Orchestrator::new(Arc::new(NoProvider), Arc::clone(&registry), Arc::new(NoLog));
        BridgeService::new(orchestrator, registry)
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let svc = service();
        let err = svc.set_tool_enabled("nope", true).unwrap_err();
        assert!(err.is_not_found());
        assert!(svc.tool_status("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn unknown_server_is_not_found() {
        let svc = service();
        assert_eq!(
            svc.set_server_enabled("ghost", false),
            Err(RegistryError::UnknownServer {
                name: "ghost".to_string()
            })
        );
    }

    #[tokio::test]
    async fn empty_registry_lists_nothing() {
        let svc = service();
        assert!(svc.list_tools().await.is_empty());
        assert!(svc.list_resources().await.is_empty());
        assert!(svc.enabled_servers().is_empty());
        assert!(svc.all_servers().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_as_api_error() {
        let svc = service();
        let request = ChatCompletionRequest::new("m", vec![]);
        let result = svc
            .chat_completion(request, CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(result, Err(BridgeError::Api(ApiError::Network(_)))));
    }

    #[test]
    fn server_status_serializes() {
        let status = ServerStatus {
            name: "fetch".to_string(),
            enabled: false,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"name": "fetch", "enabled": false})
        );
    }
}
