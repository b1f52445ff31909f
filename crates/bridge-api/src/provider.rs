//! OpenAI-compatible provider implementation.

use crate::client::ApiClient;
use bridge_types::{ApiError, BoxFuture, ChatCompletionRequest, ChatCompletionResponse, Provider};
use std::time::Duration;

/// An OpenAI-compatible inference server.
///
/// Wraps `ApiClient` and implements the `Provider` trait, delegating all
/// calls to the underlying client.
#[derive(Clone)]
pub struct InferenceProvider {
    client: ApiClient,
}

impl InferenceProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: ApiClient::new(api_key, base_url, timeout)?,
        })
    }
}

impl Provider for InferenceProvider {
    fn create_chat_completion<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> BoxFuture<'a, Result<ChatCompletionResponse, ApiError>> {
        Box::pin(self.client.create_chat_completion(request))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
