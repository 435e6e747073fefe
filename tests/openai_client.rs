// HTTP behaviour of the OpenAI compatible clients against a mock server.

use align_eval::benchmarks::drawbench::{
    HttpImageScorer, ImageGenerator, ImageScorer, OpenAiImageGenerator,
};
use align_eval::client::{CompletionBackend, Credentials, OpenAiClient};
use align_eval::error::CompletionError;
use align_eval::models::{ChatMessage, ModelParams, Outcome};
use align_eval::retry::RetryPolicy;
use align_eval::worker::Batcher;
use base64::Engine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn client(server: &MockServer) -> OpenAiClient {
    let credentials =
        Credentials::resolve(Some("sk-test".to_string()), Some(format!("{}/v1", server.uri())))
            .unwrap();
    OpenAiClient::new(credentials, Duration::from_secs(5)).unwrap()
}

fn completion_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "model": "deepseek-chat",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
    })
}

#[tokio::test]
async fn sends_bearer_auth_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "deepseek-chat",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 2048,
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
        .expect(1)
        .mount(&server)
        .await;

    let request = ModelParams::new("deepseek-chat").request(vec![ChatMessage::user("hi")]);
    let response = client(&server).complete(&request).await.unwrap();
    assert_eq!(response.text(), Some("hello"));
    assert_eq!(response.usage.map(|u| u.total_tokens), Some(11));
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let request = ModelParams::new("m").request(vec![ChatMessage::user("hi")]);
    let err = client(&server).complete(&request).await.unwrap_err();
    match &err {
        CompletionError::Status { status, body } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"oops\": true}"))
        .mount(&server)
        .await;

    let request = ModelParams::new("m").request(vec![ChatMessage::user("hi")]);
    let err = client(&server).complete(&request).await.unwrap_err();
    assert!(matches!(err, CompletionError::Decode(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn batcher_retries_against_the_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let outcomes = Batcher::new(Arc::new(client(&server)))
        .with_retry(RetryPolicy::new(2, Duration::ZERO))
        .run_messages("http", &ModelParams::new("m"), vec![vec![ChatMessage::user("hi")]])
        .await
        .unwrap();
    assert!(matches!(outcomes[0], Outcome::Failed { attempts: 2, .. }));
}

#[tokio::test]
async fn image_generation_decodes_b64() {
    let server = MockServer::start().await;
    let png = b"\x89PNG fake";
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(body_partial_json(serde_json::json!({
            "model": "stabilityai/stable-diffusion-2-1",
            "prompt": "a red cube"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"b64_json": base64::engine::general_purpose::STANDARD.encode(png)}]
        })))
        .mount(&server)
        .await;

    let generator = OpenAiImageGenerator::new(client(&server), "stabilityai/stable-diffusion-2-1");
    let bytes = generator.generate("a red cube").await.unwrap();
    assert_eq!(bytes, png);
}

#[tokio::test]
async fn scorer_posts_prompt_and_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .and(body_partial_json(serde_json::json!({
            "prompt": "a red cube",
            "image_path": "images/image_1.png"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"score": 0.42})))
        .mount(&server)
        .await;

    let scorer = HttpImageScorer::new(reqwest::Client::new(), format!("{}/score", server.uri()));
    let score = scorer
        .score(Path::new("images/image_1.png"), "a red cube")
        .await
        .unwrap();
    assert_eq!(score, 0.42);
}
