//! Integration tests for `ApiClient::create_chat_completion()`.
//!
//! Uses a raw TCP test server with canned HTTP responses to check parsing,
//! error classification, and that every call makes exactly one request.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bridge_api::ApiClient;
use bridge_types::{ApiError, ChatCompletionRequest, ChatMessage, FinishReason};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const COMPLETION_BODY: &str = r#"{"id":"chatcmpl-1","object":"chat.completion","created":1700000000,"model":"test-model","choices":[{"index":0,"message":{"role":"assistant","content":"Hello there"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#;

const TOOL_CALL_BODY: &str = r#"{"id":"chatcmpl-2","object":"chat.completion","created":1700000000,"model":"test-model","choices":[{"index":0,"message":{"role":"assistant","content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"fetch","arguments":"{\"url\":\"https://example.com\"}"}}]},"finish_reason":"tool_calls"}]}"#;

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

/// Start a test TCP server that returns pre-configured responses.
/// `responses` is a list of HTTP response strings, one per incoming connection.
/// Returns the server address, the request counter, and the raw requests seen.
async fn start_test_server(
    responses: Vec<String>,
) -> (String, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = Arc::clone(&counter);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let requests_clone = Arc::clone(&requests);

    tokio::spawn(async move {
        let responses = Arc::new(responses);
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let idx = counter_clone.fetch_add(1, Ordering::SeqCst);
            let responses = Arc::clone(&responses);
            let requests = Arc::clone(&requests_clone);

            tokio::spawn(async move {
                // Read until the end of the headers so they can be inspected
                let mut raw = Vec::new();
                let mut buf = vec![0u8; 8192];
                while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => raw.extend_from_slice(&buf[..n]),
                    }
                }
                requests
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&raw).into_owned());

                if idx < responses.len() {
                    let _ = socket.write_all(responses[idx].as_bytes()).await;
                    let _ = socket.flush().await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/v1"), counter, requests)
}

fn make_client(base_url: &str) -> ApiClient {
    ApiClient::new("test-key", base_url, Duration::from_secs(5)).unwrap()
}

fn test_request() -> ChatCompletionRequest {
    let mut request = ChatCompletionRequest::new("test-model", vec![ChatMessage::user("hi")]);
    request
        .extra
        .insert("temperature".to_string(), serde_json::json!(0.1));
    request
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_success() {
    let (base_url, counter, requests) =
        start_test_server(vec![http_response("200 OK", COMPLETION_BODY)]).await;

    let response = make_client(&base_url)
        .create_chat_completion(&test_request())
        .await
        .unwrap();

    assert_eq!(response.id, "chatcmpl-1");
    let choice = response.first_choice().unwrap();
    assert_eq!(choice.message.text(), "Hello there");
    assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
    assert_eq!(response.usage.unwrap().total_tokens, 7);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let seen = requests.lock().unwrap();
    let head = seen[0].to_ascii_lowercase();
    assert!(head.starts_with("post /v1/chat/completions "), "{head}");
    assert!(head.contains("authorization: bearer test-key"), "{head}");
}

#[tokio::test]
async fn tool_call_reply_parses() {
    let (base_url, _, _) = start_test_server(vec![http_response("200 OK", TOOL_CALL_BODY)]).await;

    let response = make_client(&base_url)
        .create_chat_completion(&test_request())
        .await
        .unwrap();

    let choice = response.first_choice().unwrap();
    assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
    let calls = choice.message.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].function.name, "fetch");
    assert!(response.usage.is_none());
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let (base_url, counter, _) =
        start_test_server(vec![http_response("200 OK", "{\"choices\": oops")]).await;

    let result = make_client(&base_url)
        .create_chat_completion(&test_request())
        .await;
    match result {
        Err(ApiError::InvalidResponse { .. }) => {}
        Err(e) => panic!("expected InvalidResponse, got: {e:?}"),
        Ok(_) => panic!("expected error, got Ok"),
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

/// Server errors are returned immediately; the second canned reply is never
/// requested.
#[tokio::test]
async fn server_error_is_not_retried() {
    let (base_url, counter, _) = start_test_server(vec![
        http_response(
            "500 Internal Server Error",
            r#"{"error":{"message":"internal error"}}"#,
        ),
        http_response("200 OK", COMPLETION_BODY),
    ])
    .await;

    let result = make_client(&base_url)
        .create_chat_completion(&test_request())
        .await;
    match result {
        Err(ApiError::Server { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "internal error");
        }
        Err(e) => panic!("expected Server error, got: {e:?}"),
        Ok(_) => panic!("expected error, got Ok"),
    }
    assert_eq!(
        counter.load(Ordering::SeqCst),
        1,
        "should have made only 1 request (no retry)"
    );
}

#[tokio::test]
async fn unauthorized_is_auth_error() {
    let (base_url, counter, _) = start_test_server(vec![http_response(
        "401 Unauthorized",
        r#"{"error":{"message":"invalid api key"}}"#,
    )])
    .await;

    let result = make_client(&base_url)
        .create_chat_completion(&test_request())
        .await;
    assert!(matches!(result, Err(ApiError::Auth { .. })));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    // Bind then drop to get a port nothing listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let result = make_client(&format!("http://{addr}"))
        .create_chat_completion(&test_request())
        .await;
    assert!(matches!(result, Err(ApiError::Network(_))), "{result:?}");
}
