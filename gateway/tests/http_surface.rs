use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cortex_blackboard::{Blackboard, Compactor, ContextItem, HealthEngine, Zone, ZoneLimits};
use cortex_bus::{InMemoryBroker, TaskBus};
use cortex_discovery::{Discovery, DiscoveryConfig};
use cortex_fabric::FabricClient;
use cortex_gateway::collab::CollaboratorClient;
use cortex_gateway::build_router;
use cortex_gateway::state::{AppState, ReadinessState};
use cortex_inference::{InferenceRouter, Lane, ProviderKind, RouterConfig};

fn test_state(lanes: Vec<Lane>, default_lane: Option<&str>, memory_base: Option<String>) -> AppState {
    AppState {
        discovery: Arc::new(Discovery::new(DiscoveryConfig::default(), Vec::new())),
        ring: None,
        bus: TaskBus::new(Arc::new(InMemoryBroker::new()), "gateway-test"),
        inference: Arc::new(InferenceRouter::new(
            lanes,
            RouterConfig {
                default_lane: default_lane.map(String::from),
                max_retries: 3,
                retry_base_delay: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            },
        )),
        fabric: Arc::new(FabricClient::new("ws://127.0.0.1:1", "gateway-test")),
        blackboard: Arc::new(Blackboard::new(ZoneLimits {
            critical: 100,
            supporting: 100,
            actionable: 100,
        })),
        health_engine: Arc::new(HealthEngine::new()),
        compactor: Arc::new(Compactor::default()),
        collaborators: Arc::new(CollaboratorClient::new(memory_base, None)),
        metrics: None,
        readiness: Arc::new(ReadinessState::default()),
        started_at: Instant::now(),
        ws_upstream: None,
    }
}

fn test_router() -> Router {
    build_router(test_state(Vec::new(), None, None))
}

fn lane_for(server: &MockServer) -> Lane {
    Lane {
        name: "local".into(),
        provider: ProviderKind::OpenaiCompatible,
        base_url: server.uri(),
        api_key: None,
        models: vec!["test-model".into()],
        default_model: Some("test-model".into()),
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("router responds");
    collect(response).await
}

async fn post_json(router: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    post_raw(router, uri, payload.to_string()).await
}

async fn post_raw(router: &Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .expect("router responds");
    collect(response).await
}

async fn collect(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body to bytes")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_always_answers_with_a_rollup() {
    let router = test_router();
    let (status, payload) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "ok");
    assert!(payload["subsystems"]["blackboard"]["utilization"].is_number());
    assert_eq!(payload["subsystems"]["discovery"]["peers"], 0);
}

#[tokio::test]
async fn readiness_flips_after_marking() {
    let state = test_state(Vec::new(), None, None);
    let readiness = state.readiness.clone();
    let router = build_router(state);

    let (status, _) = get(&router, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    readiness.mark_ready();
    let (status, _) = get(&router, "/ready").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn status_reports_subsystems_without_failing() {
    let router = test_router();
    let (status, payload) = get(&router, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["agents"]["total"], 0);
    assert_eq!(payload["healthring"]["enabled"], false);
    assert_eq!(payload["inference"]["lanes"], 0);
    assert!(payload["version"].is_string());
}

#[tokio::test]
async fn swarm_listing_and_missing_agent_lookup() {
    let router = test_router();
    let (status, payload) = get(&router, "/api/v1/swarm/agents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload, json!([]));

    let (status, payload) = get(&router, "/api/v1/swarm/agents/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(payload["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn inference_round_trips_through_a_lane() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "choices": [{"message": {"role": "assistant", "content": "hello back"}}],
            "usage": {"total_tokens": 7},
        })))
        .mount(&server)
        .await;

    let router = build_router(test_state(vec![lane_for(&server)], Some("local"), None));
    let (status, payload) =
        post_json(&router, "/api/v1/inference", json!({"prompt": "hello"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["content"], "hello back");
    assert_eq!(payload["lane"], "local");
    assert_eq!(payload["tokens"], 7);
}

#[tokio::test]
async fn unknown_lane_maps_to_bad_request() {
    let router = test_router();
    let (status, payload) = post_json(
        &router,
        "/api/v1/inference",
        json!({"prompt": "hello", "lane": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(payload["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn upstream_client_errors_pass_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad prompt"))
        .mount(&server)
        .await;

    let router = build_router(test_state(vec![lane_for(&server)], Some("local"), None));
    let (status, _) = post_json(&router, "/api/v1/inference", json!({"prompt": "x"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let router = test_router();
    let (status, _) = post_raw(&router, "/api/v1/inference", "{not json".into()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_method_is_rejected_with_405() {
    let router = test_router();
    let (status, _) = get(&router, "/api/v1/inference").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn engines_and_models_reflect_the_lane_table() {
    let server = MockServer::start().await;
    let router = build_router(test_state(vec![lane_for(&server)], Some("local"), None));

    let (status, payload) = get(&router, "/api/v1/inference/engines").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload[0]["name"], "local");
    assert_eq!(payload[0]["default"], true);

    let (_, payload) = get(&router, "/api/v1/inference/models").await;
    assert_eq!(payload[0]["name"], "test-model");
    assert_eq!(payload[0]["lane"], "local");
}

#[tokio::test]
async fn bridge_send_validates_and_accepts() {
    let router = test_router();

    let (status, _) = post_json(
        &router,
        "/api/v1/bridge/send",
        json!({"to": "", "content": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, payload) = post_json(
        &router,
        "/api/v1/bridge/send",
        json!({"to": "worker", "type": "note", "content": {"text": "hi"}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(payload["from"], "gateway-test");
    assert_eq!(payload["to"], "worker");
    assert_eq!(payload["type"], "note");
}

#[tokio::test]
async fn blackboard_surface_supports_stats_health_and_compaction() {
    let state = test_state(Vec::new(), None, None);
    let blackboard = state.blackboard.clone();
    for _ in 0..9 {
        blackboard
            .add(ContextItem::new("seed", "memory", Zone::Supporting, 0.3, 10))
            .unwrap();
    }
    for _ in 0..9 {
        blackboard
            .add(ContextItem::new("seed", "prompt", Zone::Critical, 0.3, 10))
            .unwrap();
    }
    for _ in 0..9 {
        blackboard
            .add(ContextItem::new("seed", "step", Zone::Actionable, 0.3, 10))
            .unwrap();
    }
    let router = build_router(state);

    let (status, payload) = get(&router, "/api/v1/blackboard/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["total_used"], 270);

    let (status, payload) = get(&router, "/api/v1/blackboard/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "critical");

    let (status, payload) = post_json(&router, "/api/v1/blackboard/compact", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(payload["tokens_freed"].as_u64().unwrap() >= 60);
    assert!(payload["utilization_after"].as_f64().unwrap() <= 0.75);

    let (status, _) = post_json(
        &router,
        "/api/v1/blackboard/compact",
        json!({"target_utilization": 1.5}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn memories_surface_forwards_and_degrades() {
    // Unconfigured collaborator: 503 with a JSON error body.
    let router = test_router();
    let (status, payload) = get(&router, "/api/v1/memories/stats").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(payload["error"].is_string());

    // Configured: statuses and bodies pass through, including upstream 4xx.
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/memories/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": [1, 2]})))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/memories/store"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "no space"})))
        .mount(&upstream)
        .await;

    let router = build_router(test_state(Vec::new(), None, Some(upstream.uri())));
    let (status, payload) = get(&router, "/api/v1/memories/search?q=gateway").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["hits"], json!([1, 2]));

    let (status, payload) =
        post_json(&router, "/api/v1/memories/store", json!({"text": "note"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["error"], "no space");
}

#[tokio::test]
async fn sse_mirror_streams_fabric_events_with_standard_framing() {
    let state = test_state(Vec::new(), None, None);
    let registry = state.fabric.registry().clone();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/events/alerts"))
        .send()
        .await
        .expect("sse stream opens");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE.as_str())
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // The subscription is registered once the handler has run; push an
    // event through the local registry as the fabric reader would.
    registry
        .dispatch(&cortex_fabric::Event::broadcast(
            "alerts",
            "test",
            json!({"n": 1}),
        ))
        .await;

    let mut response = response;
    let mut collected = String::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_secs(5), response.chunk()).await {
            Ok(Ok(Some(chunk))) => {
                collected.push_str(&String::from_utf8_lossy(&chunk));
                if collected.contains("\n\n") && collected.contains("event: alerts") {
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(collected.contains("event: alerts"));
    assert!(collected.contains("data: {"));
    // data is single-line JSON followed by the blank-line terminator.
    let data_line = collected
        .lines()
        .find(|line| line.starts_with("data: "))
        .expect("data line present");
    let payload: Value = serde_json::from_str(&data_line["data: ".len()..]).unwrap();
    assert_eq!(payload["type"], "alerts");
}

#[tokio::test]
async fn healthring_endpoints_degrade_when_disabled() {
    let router = test_router();
    let (status, _) = get(&router, "/api/v1/healthring/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn candidate_management_round_trip() {
    let state = test_state(Vec::new(), None, None);
    let discovery = state.discovery.clone();
    let router = build_router(state);

    let (status, _) = post_json(
        &router,
        "/api/v1/swarm/candidates",
        json!({"address": "10.0.0.4:9700"}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(discovery.candidates().len(), 1);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/swarm/candidates")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"address": "10.0.0.4:9700"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, payload) = collect(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["removed"], true);
    assert!(discovery.candidates().is_empty());
}
