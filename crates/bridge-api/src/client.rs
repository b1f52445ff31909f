//! Chat-completion client for an OpenAI-compatible inference server.

use std::time::Duration;

use bridge_types::{ApiError, ChatCompletionRequest, ChatCompletionResponse, util::preview};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

/// Default HTTP timeout for one inference request.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Client for the `/chat/completions` endpoint.
///
/// Each call makes exactly one HTTP request. Failures are returned as-is:
/// the orchestrator treats them as fatal, so nothing here retries.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
                ApiError::Auth {
                    message: "Invalid API key format".into(),
                }
            })?,
        );
        Ok(headers)
    }

    /// Send a non-streaming chat-completion request.
    pub async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::to_string(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        tracing::debug!("POST {url} ({} messages)", request.messages.len());

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .body(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport_error)?;
        tracing::debug!("Inference server replied {status}: {}", preview(&text, 2000));

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text));
        }

        parse_response(&text)
    }
}

/// Parse a successful reply body.
fn parse_response(text: &str) -> Result<ChatCompletionResponse, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::InvalidResponse {
        message: format!("{e}: {}", preview(text, 200)),
    })
}

fn classify_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(e.to_string())
    }
}

/// Classify an HTTP error response into a typed ApiError.
fn classify_error(status: u16, body: &str) -> ApiError {
    // OpenAI-style servers wrap the message as {"error": {"message": ...}}
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 | 404 | 422 => ApiError::BadRequest { message },
        _ => ApiError::Server { status, message },
    }
}
