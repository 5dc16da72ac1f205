use std::time::Duration;

use cortex_inference::{
    InferenceError, InferenceRequest, InferenceRouter, Lane, ProviderKind, RouterConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn lane_for(server: &MockServer, provider: ProviderKind) -> Lane {
    Lane {
        name: "test-lane".into(),
        provider,
        base_url: server.uri(),
        api_key: None,
        models: vec!["test-model".into()],
        default_model: Some("test-model".into()),
    }
}

fn fast_router(lane: Lane) -> InferenceRouter {
    InferenceRouter::new(
        vec![lane],
        RouterConfig {
            default_lane: Some("test-lane".into()),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
        },
    )
}

fn chat_completion_body() -> serde_json::Value {
    serde_json::json!({
        "model": "test-model",
        "choices": [{"message": {"role": "assistant", "content": "All systems nominal."}}],
        "usage": {"prompt_tokens": 4, "completion_tokens": 6, "total_tokens": 10},
    })
}

#[tokio::test]
async fn retries_through_server_errors_and_succeeds_on_the_third_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body()))
        .mount(&server)
        .await;

    let router = fast_router(lane_for(&server, ProviderKind::OpenaiCompatible));
    let response = router
        .infer(InferenceRequest::new("status?"))
        .await
        .expect("third attempt succeeds");

    assert_eq!(response.content, "All systems nominal.");
    assert_eq!(response.model, "test-model");
    assert_eq!(response.tokens, 10);
    assert_eq!(response.lane, "test-lane");

    let metrics = &router.metrics_snapshot()[0];
    assert_eq!(metrics.attempts, 3);
    assert_eq!(metrics.failures, 2);
    assert_eq!(metrics.server_failures, 2);
    assert_eq!(metrics.total_tokens, 10);
}

#[tokio::test]
async fn client_errors_fail_immediately_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
        .mount(&server)
        .await;

    let router = fast_router(lane_for(&server, ProviderKind::OpenaiCompatible));
    let err = router
        .infer(InferenceRequest::new("status?"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        InferenceError::UpstreamClient { status: 400, .. }
    ));
    let metrics = &router.metrics_snapshot()[0];
    assert_eq!(metrics.attempts, 1);
    assert_eq!(metrics.client_failures, 1);
}

#[tokio::test]
async fn exhausted_retries_wrap_the_last_error_with_the_attempt_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let router = fast_router(lane_for(&server, ProviderKind::OpenaiCompatible));
    let err = router
        .infer(InferenceRequest::new("status?"))
        .await
        .unwrap_err();

    match err {
        InferenceError::Exhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *source,
                InferenceError::UpstreamServer { status: 503, .. }
            ));
        }
        other => panic!("expected Exhausted, got {other}"),
    }
    assert_eq!(router.metrics_snapshot()[0].attempts, 3);
}

#[tokio::test]
async fn ollama_dialect_parses_eval_counts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "qwen2.5",
            "message": {"role": "assistant", "content": "pong"},
            "prompt_eval_count": 3,
            "eval_count": 2,
        })))
        .mount(&server)
        .await;

    let mut lane = lane_for(&server, ProviderKind::Ollama);
    lane.models = vec!["qwen2.5".into()];
    lane.default_model = Some("qwen2.5".into());
    let router = fast_router(lane);

    let response = router.infer(InferenceRequest::new("ping")).await.unwrap();
    assert_eq!(response.content, "pong");
    assert_eq!(response.tokens, 5);
}

#[tokio::test]
async fn anthropic_lanes_send_provider_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(wiremock::matchers::header("x-api-key", "secret"))
        .and(wiremock::matchers::header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body()))
        .mount(&server)
        .await;

    let mut lane = lane_for(&server, ProviderKind::Anthropic);
    lane.api_key = Some("secret".into());
    let router = fast_router(lane);

    let response = router.infer(InferenceRequest::new("hello")).await.unwrap();
    assert_eq!(response.lane, "test-lane");
}

#[tokio::test]
async fn per_request_deadline_is_enforced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_completion_body())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let router = InferenceRouter::new(
        vec![lane_for(&server, ProviderKind::OpenaiCompatible)],
        RouterConfig {
            default_lane: Some("test-lane".into()),
            max_retries: 1,
            retry_base_delay: Duration::from_millis(1),
            request_timeout: Duration::from_millis(100),
        },
    );

    let err = router
        .infer(InferenceRequest::new("slow"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InferenceError::Exhausted { attempts: 1, .. }
    ));
}
