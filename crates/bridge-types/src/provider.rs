//! Provider trait for inference servers.

use crate::util::BoxFuture;
use crate::{ApiError, ChatCompletionRequest, ChatCompletionResponse};

/// An OpenAI-compatible inference server.
///
/// Dyn-compatible so the orchestrator works with `Arc<dyn Provider>`.
pub trait Provider: Send + Sync {
    /// Send one non-streaming chat-completion request.
    fn create_chat_completion<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> BoxFuture<'a, Result<ChatCompletionResponse, ApiError>>;

    /// Provider name for logging/display.
    fn name(&self) -> &str;
}
