//! The multi-turn loop that drives a conversation against the inference
//! server and routes its tool calls to MCP servers.

use bridge_mcp::{ClientRegistry, McpError, McpToolResult, to_function_schema, to_tool_message};
use bridge_types::{
    ApiError, BoxFuture, BridgeError, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    ChatTool, CompletionRecord, InteractionLog, LogError, Provider, RegistryError, ToolCall,
    ToolCallRecord, Usage, util::preview,
};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Where a conversation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingResponse,
    DispatchingTools,
    Done,
    Failed,
}

/// Knobs for the loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fail the conversation after this many inference requests. `None`
    /// loops until the inference server signals a terminal finish.
    pub max_turns: Option<usize>,
    /// Per tool call, on top of the MCP request timeout.
    pub tool_timeout: Option<Duration>,
    /// Run the tool calls of one turn concurrently.
    pub parallel_tool_calls: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: None,
            tool_timeout: None,
            parallel_tool_calls: true,
        }
    }
}

/// Events emitted while a conversation runs.
#[derive(Debug)]
pub enum ConversationEvent {
    Phase(Phase),
    /// The inference server replied.
    AssistantMessage { text: String, tool_calls: usize },
    /// A tool call is about to be dispatched.
    ToolStart { name: String, arguments: String },
    /// A tool call produced a result.
    ToolEnd {
        name: String,
        output: String,
        is_error: bool,
    },
    /// A tool call was dropped from the turn.
    ToolSkipped { name: String, reason: String },
    Usage(Usage),
    Done,
    Cancelled,
    Error(String),
}

/// Why a single tool call produced no result. None of these end the
/// conversation; the call is left out of the turn.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Unroutable(#[from] RegistryError),

    #[error("Invalid arguments for '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    #[error(transparent)]
    Transport(#[from] McpError),

    #[error("Tool call '{name}' timed out after {timeout_ms}ms")]
    TimedOut { name: String, timeout_ms: u64 },
}

/// The settled outcome of a conversation.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Key under which the conversation was logged.
    pub completion_id: String,
    /// The terminal reply, returned to the caller as-is.
    pub response: ChatCompletionResponse,
    /// Every message exchanged, starting with the caller's.
    pub messages: Vec<ChatMessage>,
    /// Number of inference requests made.
    pub turns: usize,
    /// Usage summed over all turns.
    pub usage: Usage,
}

/// Append-only message history plus loop bookkeeping.
#[derive(Debug)]
pub(crate) struct Conversation {
    messages: Vec<ChatMessage>,
    turns: usize,
    phase: Phase,
}

impl Conversation {
    pub(crate) fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            turns: 0,
            phase: Phase::AwaitingResponse,
        }
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    fn enter<F: FnMut(ConversationEvent)>(&mut self, phase: Phase, on_event: &mut F) {
        if self.phase != phase {
            tracing::trace!("conversation {:?} -> {phase:?}", self.phase);
        }
        self.phase = phase;
        on_event(ConversationEvent::Phase(phase));
    }
}

/// Drives conversations. One instance serves any number of concurrent
/// conversations; each `run` call owns its own state.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ClientRegistry>,
    log: Arc<dyn InteractionLog>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ClientRegistry>,
        log: Arc<dyn InteractionLog>,
    ) -> Self {
        Self {
            provider,
            registry,
            log,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the conversation loop: send messages, dispatch tool calls, repeat
    /// until the inference server signals a terminal finish.
    ///
    /// The callback receives events as they occur. The `cancel` token aborts
    /// the loop at any suspension point.
    pub async fn run<F>(
        &self,
        request: ChatCompletionRequest,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<Completion, BridgeError>
    where
        F: FnMut(ConversationEvent),
    {
        let completion_id = uuid::Uuid::new_v4().to_string();
        let injected = tokio::select! {
            _ = cancel.cancelled() => None,
            request = self.with_tools(request) => Some(request),
        };
        let Some(mut request) = injected else {
            on_event(ConversationEvent::Phase(Phase::Failed));
            on_event(ConversationEvent::Cancelled);
            return Err(BridgeError::Cancelled);
        };
        let mut conversation = Conversation::new(std::mem::take(&mut request.messages));
        let mut total_usage = Usage::default();
        let mut recorded = false;

        tracing::debug!(
            "conversation {completion_id} started with {} tools",
            request.tools.as_ref().map_or(0, Vec::len)
        );

        loop {
            if let Some(limit) = self.config.max_turns {
                if conversation.turns >= limit {
                    conversation.enter(Phase::Failed, &mut on_event);
                    on_event(ConversationEvent::Error(format!(
                        "Turn limit of {limit} reached"
                    )));
                    return Err(BridgeError::TurnLimitExceeded { limit });
                }
            }

            conversation.enter(Phase::AwaitingResponse, &mut on_event);
            conversation.turns += 1;
            tracing::debug!("conversation {completion_id} turn {}", conversation.turns);

            request.messages = std::mem::take(&mut conversation.messages);
            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.provider.create_chat_completion(&request) => Some(result),
            };
            // Snapshot the request for the log before handing the messages back
            let request_snapshot = match (&result, recorded) {
                (Some(Ok(_)), false) => serde_json::to_value(&request).ok(),
                _ => None,
            };
            conversation.messages = std::mem::take(&mut request.messages);

            let Some(result) = result else {
                conversation.enter(Phase::Failed, &mut on_event);
                on_event(ConversationEvent::Cancelled);
                return Err(BridgeError::Cancelled);
            };

            let response = match result.and_then(|r| {
                if r.choices.is_empty() {
                    Err(ApiError::MissingChoice)
                } else {
                    Ok(r)
                }
            }) {
                Ok(response) => response,
                Err(e) => {
                    conversation.enter(Phase::Failed, &mut on_event);
                    on_event(ConversationEvent::Error(e.to_string()));
                    return Err(e.into());
                }
            };
            let choice = response.choices[0].clone();

            if let Some(usage) = &response.usage {
                total_usage.add(usage);
            }

            if !recorded {
                recorded = true;
                let record = CompletionRecord {
                    completion_id: completion_id.clone(),
                    model: response.model.clone(),
                    request: request_snapshot.unwrap_or_default(),
                    response: serde_json::to_value(&choice.message).unwrap_or_default(),
                    tokens: response.usage.unwrap_or_default().into(),
                };
                self.notify("completion", self.log.record_completion(&record))
                    .await;
            }

            let tool_calls = choice.message.tool_calls().to_vec();
            on_event(ConversationEvent::AssistantMessage {
                text: choice.message.text(),
                tool_calls: tool_calls.len(),
            });
            conversation.push(ChatMessage::assistant(
                choice.message.content.clone(),
                tool_calls.clone(),
            ));

            let finish = choice.finish_reason;
            if finish.is_some_and(|f| f.is_terminal()) {
                let final_message = serde_json::to_value(&choice.message).unwrap_or_default();
                self.notify(
                    "final response",
                    self.log.finalize_completion(&completion_id, &final_message),
                )
                .await;

                tracing::debug!(
                    "conversation {completion_id} settled after {} turns, {} messages",
                    conversation.turns,
                    conversation.len()
                );
                conversation.enter(Phase::Done, &mut on_event);
                on_event(ConversationEvent::Usage(total_usage));
                on_event(ConversationEvent::Done);
                return Ok(Completion {
                    completion_id,
                    response,
                    messages: conversation.messages,
                    turns: conversation.turns,
                    usage: total_usage,
                });
            }

            if tool_calls.is_empty() {
                let err = ApiError::Protocol(format!(
                    "finish reason {finish:?} without tool calls"
                ));
                conversation.enter(Phase::Failed, &mut on_event);
                on_event(ConversationEvent::Error(err.to_string()));
                return Err(err.into());
            }

            conversation.enter(Phase::DispatchingTools, &mut on_event);
            for call in &tool_calls {
                on_event(ConversationEvent::ToolStart {
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                });
            }

            let outcomes = tokio::select! {
                _ = cancel.cancelled() => None,
                outcomes = self.dispatch_all(&tool_calls) => Some(outcomes),
            };
            let Some(outcomes) = outcomes else {
                conversation.enter(Phase::Failed, &mut on_event);
                on_event(ConversationEvent::Cancelled);
                return Err(BridgeError::Cancelled);
            };

            // Outcomes line up with the calls, so tool messages keep call order
            for (call, outcome) in tool_calls.iter().zip(outcomes) {
                let name = call.function.name.clone();
                let result = match outcome {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!("Skipping tool call '{name}': {e}");
                        on_event(ConversationEvent::ToolSkipped {
                            name,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let record = ToolCallRecord {
                    id: call.id.clone(),
                    completion_id: completion_id.clone(),
                    tool_name: name.clone(),
                    arguments: call.function.arguments.clone(),
                    result: serde_json::to_value(&result).unwrap_or_default(),
                };
                self.notify("tool call", self.log.record_tool_call(&record))
                    .await;

                let message = to_tool_message(&result, &call.id);
                on_event(ConversationEvent::ToolEnd {
                    name,
                    output: preview(&message.text(), 200),
                    is_error: result.is_error,
                });
                conversation.push(message);
            }
        }
    }

    /// Append the routable MCP tools to whatever tools the caller supplied.
    /// The caller's definition wins on a name clash.
    async fn with_tools(&self, mut request: ChatCompletionRequest) -> ChatCompletionRequest {
        let mcp_tools: Vec<ChatTool> = self
            .registry
            .routable_tools()
            .await
            .iter()
            .map(to_function_schema)
            .collect();

        let mut tools = request.tools.take().unwrap_or_default();
        let mut names: HashSet<String> = tools.iter().map(|t| t.function.name.clone()).collect();
        for tool in mcp_tools {
            if names.insert(tool.function.name.clone()) {
                tools.push(tool);
            }
        }

        request.tools = if tools.is_empty() { None } else { Some(tools) };
        request
    }

    async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<Result<McpToolResult, DispatchError>> {
        if self.config.parallel_tool_calls {
            join_all(calls.iter().map(|c| self.dispatch(c))).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                outcomes.push(self.dispatch(call).await);
            }
            outcomes
        }
    }

    /// Route one tool call to its owner and run it.
    async fn dispatch(&self, call: &ToolCall) -> Result<McpToolResult, DispatchError> {
        let name = &call.function.name;
        let owner = self.registry.resolve_tool_owner(name)?;
        let arguments = parse_arguments(name, &call.function.arguments)?;

        tracing::debug!("tool call: {name} on '{}'", owner.name());
        let invocation = owner.call_tool(name, arguments);
        let result = match self.config.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, invocation).await.map_err(|_| {
                DispatchError::TimedOut {
                    name: name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }
            })??,
            None => invocation.await?,
        };
        tracing::debug!("tool call result for {name}: {} parts", result.content.len());
        Ok(result)
    }

    /// Await a log-sink operation, discarding any failure.
    async fn notify(&self, what: &str, op: BoxFuture<'_, Result<(), LogError>>) {
        if let Err(e) = op.await {
            tracing::error!("Failed to store {what}: {e}");
        }
    }
}

/// Decode the JSON-encoded arguments of a tool call. MCP expects an object;
/// an empty string means no arguments.
fn parse_arguments(name: &str, raw: &str) -> Result<serde_json::Value, DispatchError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    let invalid = |message: String| DispatchError::InvalidArguments {
        name: name.to_string(),
        message,
    };
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        Ok(other) => Err(invalid(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(invalid(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_unbounded_and_parallel() {
        let config = OrchestratorConfig::default();
        assert!(config.max_turns.is_none());
        assert!(config.tool_timeout.is_none());
        assert!(config.parallel_tool_calls);
    }

    #[test]
    fn parse_arguments_object() {
        let value = parse_arguments("t", r#"{"path": "/tmp"}"#).unwrap();
        assert_eq!(value["path"], "/tmp");
    }

    #[test]
    fn parse_arguments_empty_is_empty_object() {
        assert_eq!(parse_arguments("t", "  ").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn parse_arguments_rejects_non_object() {
        assert!(matches!(
            parse_arguments("t", "[1, 2]"),
            Err(DispatchError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn parse_arguments_rejects_garbage() {
        match parse_arguments("fetch", "{not json") {
            Err(DispatchError::InvalidArguments { name, .. }) => assert_eq!(name, "fetch"),
            other => panic!("Expected InvalidArguments, got {other:?}"),
        }
    }

    #[test]
    fn conversation_only_grows() {
        let mut conv = Conversation::new(vec![ChatMessage::user("hi")]);
        assert_eq!(conv.len(), 1);
        conv.push(ChatMessage::assistant(None, vec![]));
        conv.push(ChatMessage::tool("c1", vec![]));
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.messages[0], ChatMessage::user("hi"));
    }

    #[test]
    fn phase_transitions_are_reported() {
        let mut conv = Conversation::new(vec![]);
        let mut seen = Vec::new();
        conv.enter(Phase::DispatchingTools, &mut |e| {
            if let ConversationEvent::Phase(p) = e {
                seen.push(p)
            }
        });
        assert_eq!(seen, vec![Phase::DispatchingTools]);
        assert_eq!(conv.phase, Phase::DispatchingTools);
    }

    #[test]
    fn dispatch_error_messages() {
        let err = DispatchError::from(RegistryError::UnknownTool {
            name: "x".to_string(),
        });
        assert_eq!(err.to_string(), "Tool 'x' not found");
        let err = DispatchError::TimedOut {
            name: "slow".to_string(),
            timeout_ms: 50,
        };
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn conversation_event_cancelled_debug() {
        assert_eq!(format!("{:?}", ConversationEvent::Cancelled), "Cancelled");
    }
}
