use std::borrow::Cow;

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use cortex_blackboard::Trigger;
use cortex_bus::BusError;
use cortex_discovery::PeerStatus;
use cortex_fabric::Event;
use cortex_inference::{InferenceError, InferenceRequest};

use crate::collab::CollabError;
use crate::state::AppState;
use crate::{sse, ws_proxy};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/swarm/agents", get(swarm_agents))
        .route("/api/v1/swarm/agents/:name", get(swarm_agent))
        .route("/api/v1/swarm/scan", post(swarm_scan))
        .route(
            "/api/v1/swarm/candidates",
            post(add_candidate).delete(remove_candidate),
        )
        .route("/api/v1/healthring/status", get(ring_status))
        .route("/api/v1/healthring/:member", get(ring_member))
        .route("/api/v1/inference", post(inference))
        .route("/api/v1/inference/engines", get(engines))
        .route("/api/v1/inference/models", get(models))
        .route("/api/v1/inference/metrics", get(inference_metrics))
        .route("/api/v1/bridge/send", post(bridge_send))
        .route("/api/v1/blackboard/stats", get(blackboard_stats))
        .route("/api/v1/blackboard/health", get(blackboard_health))
        .route("/api/v1/blackboard/compact", post(blackboard_compact))
        .route(
            "/api/v1/blackboard/phase-complete",
            post(blackboard_phase_complete),
        )
        .route("/api/v1/memories/search", get(memories_search))
        .route("/api/v1/memories/recent", get(memories_recent))
        .route("/api/v1/memories/stats", get(memories_stats))
        .route("/api/v1/memories/store", post(memories_store))
        .route(
            "/api/v1/onboarding/*rest",
            get(onboarding_get).post(onboarding_post),
        )
        .route("/api/v1/events/:kind", get(sse::events))
        .route("/ws", get(ws_proxy::ws_proxy))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn record_request(endpoint: &str) {
    counter!("gateway_requests_total", 1, "endpoint" => endpoint.to_string());
}

/// Liveness: answers 200 for as long as the process is up, with a
/// best-effort roll-up of the subsystems underneath.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    record_request("health");
    let peers = state.discovery.list();
    let board = state.blackboard.stats();
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.uptime_seconds(),
        "subsystems": {
            "discovery": {
                "peers": peers.len(),
                "up": peers.iter().filter(|peer| peer.status == PeerStatus::Up).count(),
            },
            "bus": { "agent": state.bus.agent_name() },
            "fabric": { "state": format!("{:?}", state.fabric.state()) },
            "blackboard": {
                "utilization": board.utilization,
                "items": board.count,
            },
        },
    }))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(exporter) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            exporter.render(),
        )
            .into_response(),
        None => ApiError::service_unavailable("metrics exporter not installed").into_response(),
    }
}

/// Detailed status. Degrades per subsystem instead of failing outright.
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    record_request("status");
    let peers = state.discovery.list();
    let up = peers
        .iter()
        .filter(|peer| peer.status == PeerStatus::Up)
        .count();
    let ring = match &state.ring {
        Some(ring) => {
            let status = ring.status();
            json!({ "enabled": true, "healthy": status.healthy, "total": status.total })
        }
        None => json!({ "enabled": false }),
    };
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
        "agents": { "total": peers.len(), "up": up },
        "healthring": ring,
        "inference": { "lanes": state.inference.lane_count() },
        "fabric": { "state": format!("{:?}", state.fabric.state()) },
        "blackboard": state.blackboard.stats(),
    }))
}

async fn swarm_agents(State(state): State<AppState>) -> impl IntoResponse {
    record_request("swarm_agents");
    Json(state.discovery.list())
}

async fn swarm_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    record_request("swarm_agent");
    state
        .discovery
        .get(&name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown agent: {name}")))
}

async fn swarm_scan(State(state): State<AppState>) -> impl IntoResponse {
    record_request("swarm_scan");
    let live = state.discovery.scan().await;
    Json(json!({ "live": live }))
}

#[derive(Debug, Deserialize)]
struct CandidateRequest {
    address: String,
}

async fn add_candidate(
    State(state): State<AppState>,
    Json(payload): Json<CandidateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    record_request("add_candidate");
    if payload.address.trim().is_empty() {
        return Err(ApiError::bad_request("address must not be empty"));
    }
    state.discovery.add_candidate(&payload.address);
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_candidate(
    State(state): State<AppState>,
    Json(payload): Json<CandidateRequest>,
) -> impl IntoResponse {
    record_request("remove_candidate");
    let removed = state.discovery.remove_candidate(&payload.address);
    Json(json!({ "removed": removed }))
}

async fn ring_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    record_request("ring_status");
    match &state.ring {
        Some(ring) => Ok(Json(ring.status())),
        None => Err(ApiError::service_unavailable("health ring disabled")),
    }
}

async fn ring_member(
    State(state): State<AppState>,
    Path(member): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    record_request("ring_member");
    let ring = state
        .ring
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("health ring disabled"))?;
    ring.member(&member)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown ring member: {member}")))
}

async fn inference(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    record_request("inference");
    let response = state.inference.infer(request).await?;
    Ok(Json(response))
}

async fn engines(State(state): State<AppState>) -> impl IntoResponse {
    record_request("engines");
    Json(state.inference.engines())
}

async fn models(State(state): State<AppState>) -> impl IntoResponse {
    record_request("models");
    Json(state.inference.models())
}

async fn inference_metrics(State(state): State<AppState>) -> impl IntoResponse {
    record_request("inference_metrics");
    Json(state.inference.metrics_snapshot())
}

#[derive(Debug, Deserialize)]
struct BridgeSendRequest {
    #[serde(default)]
    from: Option<String>,
    to: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    content: Value,
}

async fn bridge_send(
    State(state): State<AppState>,
    Json(payload): Json<BridgeSendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    record_request("bridge_send");
    if payload.to.trim().is_empty() {
        return Err(ApiError::bad_request("recipient must not be empty"));
    }
    let from = payload
        .from
        .unwrap_or_else(|| state.bus.agent_name().to_string());
    let kind = payload.kind.unwrap_or_else(|| "message".to_string());
    let message = state
        .bus
        .send_message(&from, &payload.to, &kind, payload.content)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(message)))
}

async fn blackboard_stats(State(state): State<AppState>) -> impl IntoResponse {
    record_request("blackboard_stats");
    Json(state.blackboard.stats())
}

async fn blackboard_health(State(state): State<AppState>) -> impl IntoResponse {
    record_request("blackboard_health");
    Json(state.health_engine.classify(&state.blackboard))
}

#[derive(Debug, Default, Deserialize)]
struct CompactRequest {
    #[serde(default)]
    target_utilization: Option<f64>,
}

async fn blackboard_compact(
    State(state): State<AppState>,
    payload: Option<Json<CompactRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    record_request("blackboard_compact");
    let request = payload.map(|Json(inner)| inner).unwrap_or_default();
    let stats = state.blackboard.stats();
    publish_event(
        &state,
        "blackboard.compaction_needed",
        json!({ "utilization": stats.utilization }),
    )
    .await;

    let result = match request.target_utilization {
        Some(target) if !(0.0..=1.0).contains(&target) => {
            return Err(ApiError::bad_request(
                "target_utilization must be within [0, 1]",
            ));
        }
        Some(target) => {
            let target_tokens = (state.blackboard.budget() as f64 * target).floor() as usize;
            state
                .compactor
                .prune_to_target(&state.blackboard, target_tokens)
        }
        None => state.compactor.prune(&state.blackboard),
    };

    let summary = serde_json::to_value(&result).unwrap_or(Value::Null);
    publish_event(&state, "blackboard.compaction_done", summary).await;
    Ok(Json(result))
}

/// External phase-boundary signal: surfaces the `PhaseComplete` trigger to
/// every fabric subscriber.
async fn blackboard_phase_complete(State(state): State<AppState>) -> impl IntoResponse {
    record_request("blackboard_phase_complete");
    let utilization = state.blackboard.stats().utilization;
    publish_event(
        &state,
        &format!("blackboard.{}", Trigger::PhaseComplete.as_str()),
        json!({ "utilization": utilization }),
    )
    .await;
    StatusCode::ACCEPTED
}

async fn publish_event(state: &AppState, kind: &str, payload: Value) {
    let event = Event::broadcast(kind, state.bus.agent_name(), payload);
    if let Err(err) = state.fabric.publish(&event).await {
        warn!(kind = %event.kind, error = %err, "fabric publish skipped");
    }
}

async fn memories_search(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    record_request("memories_search");
    let (status, body) = state
        .collaborators
        .memory_get("/memories/search", query.as_deref())
        .await?;
    Ok(passthrough(status, body))
}

async fn memories_recent(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    record_request("memories_recent");
    let (status, body) = state
        .collaborators
        .memory_get("/memories/recent", query.as_deref())
        .await?;
    Ok(passthrough(status, body))
}

async fn memories_stats(State(state): State<AppState>) -> Result<Response, ApiError> {
    record_request("memories_stats");
    let (status, body) = state
        .collaborators
        .memory_get("/memories/stats", None)
        .await?;
    Ok(passthrough(status, body))
}

async fn memories_store(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    record_request("memories_store");
    let (status, body) = state
        .collaborators
        .memory_post("/memories/store", body)
        .await?;
    Ok(passthrough(status, body))
}

async fn onboarding_get(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    record_request("onboarding");
    let (status, body) = state
        .collaborators
        .onboarding_get(&format!("/onboarding/{rest}"), query.as_deref())
        .await?;
    Ok(passthrough(status, body))
}

async fn onboarding_post(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    record_request("onboarding");
    let (status, body) = state
        .collaborators
        .onboarding_post(&format!("/onboarding/{rest}"), body)
        .await?;
    Ok(passthrough(status, body))
}

fn passthrough(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(body)).into_response()
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: Cow<'static, str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_gateway(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn service_unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.to_string())
    }
}

impl From<BusError> for ApiError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::UnknownPriority(_) | BusError::Parse(_) => {
                Self::bad_request(err.to_string())
            }
            _ => Self::bad_gateway(err.to_string()),
        }
    }
}

impl From<CollabError> for ApiError {
    fn from(err: CollabError) -> Self {
        match err {
            CollabError::Unconfigured(_) => Self::service_unavailable(err.to_string()),
            CollabError::Unreachable(_) => Self::bad_gateway(err.to_string()),
        }
    }
}
