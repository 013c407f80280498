use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use llm_cell::{ChatCompletion, ChatMessage, ChatRequest, LlmError, OpenAiChatClient};

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "role": "assistant", "content": content }
        }]
    })
}

#[tokio::test]
async fn completes_a_simple_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello!")))
        .mount(&server)
        .await;

    let client = OpenAiChatClient::with_base_url("test-key", &server.uri());
    let response = client
        .complete(ChatRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::user("hi")],
        ))
        .await
        .unwrap();

    assert_eq!(response.content, "Hello!");
    assert!(!response.has_tool_calls());
}

struct RateLimitThenSuccess;

impl Respond for RateLimitThenSuccess {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        // First call rate-limited, every later call succeeds. Wiremock gives
        // no per-mock call index, so key off the shared expectation order by
        // counting through a static.
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let _ = request;
        if CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
            ResponseTemplate::new(429).set_body_string("rate limited")
        } else {
            ResponseTemplate::new(200).set_body_json(completion_body("Recovered"))
        }
    }
}

#[tokio::test]
async fn rate_limits_retry_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(RateLimitThenSuccess)
        .mount(&server)
        .await;

    let client = OpenAiChatClient::with_base_url("test-key", &server.uri());
    let started = std::time::Instant::now();
    let response = client
        .complete(ChatRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::user("hi")],
        ))
        .await
        .unwrap();

    assert_eq!(response.content, "Recovered");
    // One retry on the chat schedule waits a second.
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn non_retryable_errors_abort_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiChatClient::with_base_url("test-key", &server.uri());
    let result = client
        .complete(ChatRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::user("hi")],
        ))
        .await;

    assert!(matches!(result, Err(LlmError::Api(_))));
}
