use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ct_rater_harness::gateway::gemini::GeminiAdapter;
use ct_rater_harness::gateway::openai::{ChatProvider, OpenAiCompatAdapter};
use ct_rater_harness::gateway::usage::{CallStatus, ProviderCallRecord};
use ct_rater_harness::gateway::{
    Attribution, ChatModel, ChatRequest, FinishReason, GatewayConfig, Message, ProviderError,
    ProviderGateway, ProviderKind, UsageSink,
};
use ct_rater_harness::images::ImagePayload;
use ct_rater_harness::retry::RetryPolicy;
use ct_rater_harness::runner::{ClassificationRunner, RequestOutcome};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn multimodal_request(kind: ProviderKind) -> ChatRequest {
    ChatRequest::new(
        ChatModel::default_for(kind),
        vec![Message::user_with_images(
            "classify",
            &[ImagePayload::jpeg(vec![1, 2, 3])],
        )],
        Attribution::new("test").with_subject("7"),
    )
    .with_provider_defaults()
}

fn chat_completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 34 }
    }))
}

fn openai_at(server: &MockServer) -> OpenAiCompatAdapter {
    OpenAiCompatAdapter::with_config(
        ProviderKind::OpenAi,
        "sk-test",
        server.uri(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn fast_gateway<P: ChatProvider + 'static, U: UsageSink>(
    provider: P,
    sink: Arc<U>,
) -> ProviderGateway<U> {
    ProviderGateway::with_config(
        Arc::new(provider),
        sink,
        GatewayConfig {
            retry: RetryPolicy::new(3, Duration::ZERO),
        },
    )
}

/// Replays a fixed list of responses, repeating the last one.
#[derive(Clone)]
struct SequenceResponder {
    calls: Arc<AtomicUsize>,
    responses: Vec<ResponseTemplate>,
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ProviderCallRecord>>,
}

#[async_trait]
impl UsageSink for RecordingSink {
    async fn record(&self, record: ProviderCallRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[tokio::test]
async fn openai_sends_image_parts_and_parses_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(chat_completion("Likert: 4"))
        .mount(&server)
        .await;

    let resp = openai_at(&server)
        .chat(&multimodal_request(ProviderKind::OpenAi))
        .await
        .unwrap();
    assert_eq!(resp.content, "Likert: 4");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!((resp.input_tokens, resp.output_tokens), (12, 34));

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = received[0].body_json().unwrap();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["max_tokens"], 1000);
    assert!(body.get("temperature").is_none());
    assert_eq!(body["messages"][0]["content"][1]["type"], "image_url");
    assert_eq!(
        body["messages"][0]["content"][1]["image_url"]["url"],
        "data:image/jpeg;base64,AQID"
    );
}

#[tokio::test]
async fn multibyte_content_is_kept_whole_and_oversized_bodies_fail_cleanly() {
    let server = MockServer::start().await;
    let near_limit = "é".repeat(400_000);
    let oversized = "é".repeat(600_000);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(SequenceResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            responses: vec![chat_completion(&near_limit), chat_completion(&oversized)],
        })
        .mount(&server)
        .await;
    let adapter = openai_at(&server);

    let resp = adapter
        .chat(&multimodal_request(ProviderKind::OpenAi))
        .await
        .unwrap();
    assert_eq!(resp.content.chars().count(), 400_000);

    let err = adapter
        .chat(&multimodal_request(ProviderKind::OpenAi))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("Response too large"), "{err}");
}

#[tokio::test]
async fn client_timeouts_surface_as_retryable_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_completion("Likert: 3").set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let adapter = OpenAiCompatAdapter::with_config(
        ProviderKind::OpenAi,
        "sk-test",
        server.uri(),
        Duration::from_millis(200),
    )
    .unwrap();

    let err = adapter
        .chat(&multimodal_request(ProviderKind::OpenAi))
        .await
        .unwrap_err();
    assert!(matches!(&err, ProviderError::Http(e) if e.is_timeout()), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(err.code(), "http_error");
}

#[tokio::test]
async fn openai_classifies_http_429_as_rate_limit_and_keeps_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "abc123")
                .insert_header("retry-after", "7")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let err = openai_at(&server)
        .chat(&multimodal_request(ProviderKind::OpenAi))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    match err {
        ProviderError::RateLimited {
            provider,
            retry_after,
            context,
        } => {
            assert_eq!(provider, "openai");
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
            let ctx = context.expect("expected error context");
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(ctx.request_id.as_deref(), Some("abc123"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn client_errors_are_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "invalid image", "code": "invalid_image_format" }
        })))
        .mount(&server)
        .await;

    let gateway = fast_gateway(openai_at(&server), Arc::new(RecordingSink::default()));
    let out = gateway
        .chat_with_retries(&multimodal_request(ProviderKind::OpenAi))
        .await;

    assert_eq!(out.attempts, 1);
    assert_eq!(out.waits, 0);
    let err = out.result.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("invalid image"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn grok_uses_its_model_and_sampling_defaults() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer xai-test"))
        .respond_with(chat_completion("confidence: 2"))
        .mount(&server)
        .await;

    let adapter = OpenAiCompatAdapter::with_config(
        ProviderKind::Grok,
        "xai-test",
        format!("{}/", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap();
    let resp = adapter
        .chat(&multimodal_request(ProviderKind::Grok))
        .await
        .unwrap();
    assert_eq!(resp.content, "confidence: 2");

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = received[0].body_json().unwrap();
    assert_eq!(body["model"], "grok-4-fast-reasoning");
    assert_eq!(body["max_tokens"], 2000);
    assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
}

#[tokio::test]
async fn gemini_sends_inline_data_and_joins_text_parts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-pro:generateContent"))
        .and(header("x-goog-api-key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Likert: 2" }, { "text": " Likert: 5" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 100, "candidatesTokenCount": 7 }
        })))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::with_config("g-test", server.uri(), Duration::from_secs(5)).unwrap();
    let resp = adapter
        .chat(&multimodal_request(ProviderKind::Gemini))
        .await
        .unwrap();
    assert_eq!(resp.content, "Likert: 2 Likert: 5");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!((resp.input_tokens, resp.output_tokens), (100, 7));

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = received[0].body_json().unwrap();
    assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
    assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
}

#[tokio::test]
async fn gemini_resource_exhausted_is_a_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED" }
        })))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::with_config("g-test", server.uri(), Duration::from_secs(5)).unwrap();
    let err = adapter
        .chat(&multimodal_request(ProviderKind::Gemini))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(
        err.context().and_then(|c| c.provider_code.as_deref()),
        Some("RESOURCE_EXHAUSTED")
    );
}

#[tokio::test]
async fn gemini_blocked_prompt_is_a_permanent_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::with_config("g-test", server.uri(), Duration::from_secs(5)).unwrap();
    let err = adapter
        .chat(&multimodal_request(ProviderKind::Gemini))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("SAFETY"));
}

#[tokio::test]
async fn gateway_recovers_after_two_rate_limits_with_two_waits() {
    let server = MockServer::start().await;
    let limited = ResponseTemplate::new(429).set_body_json(json!({
        "error": { "message": "slow down", "code": "rate_limit_exceeded" }
    }));

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(SequenceResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            responses: vec![limited.clone(), limited, chat_completion("Likert: 1")],
        })
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let gateway = fast_gateway(openai_at(&server), sink.clone());
    let out = gateway
        .chat_with_retries(&multimodal_request(ProviderKind::OpenAi))
        .await;

    assert_eq!(out.attempts, 3);
    assert_eq!(out.waits, 2);
    assert_eq!(out.result.unwrap().content, "Likert: 1");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    let records = sink.records.lock().unwrap();
    let statuses: Vec<_> = records.iter().map(|r| (r.attempt, r.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (1, CallStatus::Error),
            (2, CallStatus::Error),
            (3, CallStatus::Success)
        ]
    );
    assert_eq!(records[0].error_code.as_deref(), Some("rate_limited"));
    assert_eq!(records[2].subject_id.as_deref(), Some("7"));
    assert_eq!(records[2].output_tokens, 34);
}

#[tokio::test]
async fn runner_returns_failure_sentinel_after_three_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": { "message": "overloaded" }
        })))
        .mount(&server)
        .await;

    let gateway = fast_gateway(openai_at(&server), Arc::new(RecordingSink::default()));
    let runner = ClassificationRunner::new(
        Arc::new(gateway),
        ChatModel::default_for(ProviderKind::OpenAi),
    );

    let outcome = runner
        .classify("7", &[ImagePayload::jpeg(vec![1])], Some("hypertension"))
        .await;
    match outcome {
        RequestOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 3);
            assert!(error.to_string().contains("overloaded"));
        }
        RequestOutcome::Response(resp) => panic!("expected failure, got {resp:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
