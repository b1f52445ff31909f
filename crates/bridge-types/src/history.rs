//! The interaction-log seam.
//!
//! The orchestrator reports each conversation to an [`InteractionLog`] at three
//! points: after the first inference reply, after every successful tool call,
//! and once the conversation settles. Implementations live in `bridge-log`.

use crate::util::BoxFuture;
use crate::{LogError, Usage};
use serde::{Deserialize, Serialize};

/// Token counters recorded with a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<Usage> for TokenCounts {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Snapshot taken when the first inference reply of a conversation arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub completion_id: String,
    pub model: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub tokens: TokenCounts,
}

/// One successful tool invocation, keyed to its completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// The tool-call id emitted by the inference server.
    pub id: String,
    pub completion_id: String,
    pub tool_name: String,
    /// Arguments exactly as the inference server encoded them.
    pub arguments: String,
    pub result: serde_json::Value,
}

/// Best-effort sink for conversation history.
///
/// Failures are reported through `LogError` so implementations can be tested,
/// but the orchestrator discards them: history never affects a conversation.
pub trait InteractionLog: Send + Sync {
    fn record_completion<'a>(
        &'a self,
        record: &'a CompletionRecord,
    ) -> BoxFuture<'a, Result<(), LogError>>;

    fn record_tool_call<'a>(
        &'a self,
        record: &'a ToolCallRecord,
    ) -> BoxFuture<'a, Result<(), LogError>>;

    fn finalize_completion<'a>(
        &'a self,
        completion_id: &'a str,
        final_response: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), LogError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn token_counts_from_usage() {
        let counts = TokenCounts::from(Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            total_tokens: 10,
        });
        assert_eq!(counts.prompt_tokens, 7);
        assert_eq!(counts.total_tokens, 10);
    }

    #[test]
    fn arc_log_is_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        _assert_send_sync::<Arc<dyn InteractionLog>>();
    }
}
