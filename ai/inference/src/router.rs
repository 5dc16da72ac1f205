use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::{LaneAdapter, OllamaAdapter, OpenAiAdapter};
use crate::error::InferenceError;
use crate::lane::{Lane, ProviderKind};
use crate::metrics::{LaneMetrics, LaneMetricsSnapshot};
use crate::types::{InferenceRequest, InferenceResponse};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_lane: Option<String>,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_lane: None,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Lane introspection row for the gateway's engines endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub provider: &'static str,
    pub models: Vec<String>,
    pub default_model: Option<String>,
    pub default: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub lane: String,
}

/// Dispatches requests to the lane that satisfies the caller's intent.
/// Lanes are static for the router's lifetime; reconfiguration builds a
/// new router.
pub struct InferenceRouter {
    lanes: RwLock<HashMap<String, Arc<Lane>>>,
    metrics: HashMap<String, Arc<LaneMetrics>>,
    config: RouterConfig,
    openai: OpenAiAdapter,
    ollama: OllamaAdapter,
}

impl InferenceRouter {
    pub fn new(lanes: Vec<Lane>, config: RouterConfig) -> Self {
        let client = reqwest::Client::new();
        let metrics = lanes
            .iter()
            .map(|lane| (lane.name.clone(), Arc::new(LaneMetrics::default())))
            .collect();
        let lanes = lanes
            .into_iter()
            .map(|lane| (lane.name.clone(), Arc::new(lane)))
            .collect();
        Self {
            lanes: RwLock::new(lanes),
            metrics,
            config,
            openai: OpenAiAdapter::new(client.clone()),
            ollama: OllamaAdapter::new(client),
        }
    }

    fn adapter(&self, provider: ProviderKind) -> &dyn LaneAdapter {
        match provider {
            ProviderKind::Ollama => &self.ollama,
            // Local and anthropic endpoints speak the chat-completions shape.
            ProviderKind::Local | ProviderKind::OpenaiCompatible | ProviderKind::Anthropic => {
                &self.openai
            }
        }
    }

    /// Lane selection: an explicit lane wins, then a model served by
    /// exactly one lane, then the configured default.
    fn select_lane(&self, request: &InferenceRequest) -> Result<Arc<Lane>, InferenceError> {
        let lanes = self.lanes.read().expect("lane table poisoned");

        if let Some(name) = &request.lane {
            return lanes
                .get(name)
                .cloned()
                .ok_or_else(|| InferenceError::LaneUnknown(name.clone()));
        }

        if let Some(model) = &request.model {
            let mut serving: Vec<&Arc<Lane>> = lanes
                .values()
                .filter(|lane| lane.serves_model(model))
                .collect();
            match serving.len() {
                0 => return Err(InferenceError::ModelUnknown(model.clone())),
                1 => return Ok(Arc::clone(serving.remove(0))),
                // Served by several lanes: fall through to the default.
                _ => {}
            }
        }

        let default = self
            .config
            .default_lane
            .as_ref()
            .ok_or(InferenceError::NoDefaultLane)?;
        lanes
            .get(default)
            .cloned()
            .ok_or_else(|| InferenceError::LaneUnknown(default.clone()))
    }

    /// Route a request, retrying transient upstream failures. Attempt N
    /// waits `retry_base_delay × N`; 4xx responses are never retried. The
    /// per-attempt deadline is the router's own, independent of how long
    /// the caller is willing to wait.
    pub async fn infer(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        let lane = self.select_lane(&request)?;
        let model = lane.resolve_model(request.model.as_deref())?;
        let adapter = self.adapter(lane.provider);
        let metrics = self.metrics.get(&lane.name).cloned().unwrap_or_default();

        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            metrics.record_attempt();
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.config.request_timeout,
                adapter.chat(&lane, &model, &request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout(self.config.request_timeout)),
            };

            match outcome {
                Ok(outcome) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    metrics.record_success(outcome.tokens, elapsed_ms);
                    info!(
                        lane = %lane.name,
                        model = %outcome.model,
                        attempt,
                        latency_ms = elapsed_ms,
                        "inference routed"
                    );
                    return Ok(InferenceResponse {
                        content: outcome.content,
                        model: outcome.model,
                        tokens: outcome.tokens,
                        lane: lane.name.clone(),
                        elapsed_ms,
                    });
                }
                Err(error) => {
                    metrics.record_failure(&error);
                    warn!(
                        lane = %lane.name,
                        model = %model,
                        attempt,
                        error = %error,
                        "inference attempt failed"
                    );
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    last_error = Some(error);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_base_delay * attempt).await;
                    }
                }
            }
        }

        Err(InferenceError::Exhausted {
            attempts: max_attempts,
            source: Box::new(last_error.unwrap_or(InferenceError::NoDefaultLane)),
        })
    }

    pub fn engines(&self) -> Vec<EngineInfo> {
        let lanes = self.lanes.read().expect("lane table poisoned");
        let mut engines: Vec<EngineInfo> = lanes
            .values()
            .map(|lane| EngineInfo {
                name: lane.name.clone(),
                provider: lane.provider.as_str(),
                models: lane.models.clone(),
                default_model: lane.default_model.clone(),
                default: self.config.default_lane.as_deref() == Some(lane.name.as_str()),
            })
            .collect();
        engines.sort_by(|a, b| a.name.cmp(&b.name));
        engines
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        let lanes = self.lanes.read().expect("lane table poisoned");
        let mut models: Vec<ModelInfo> = lanes
            .values()
            .flat_map(|lane| {
                lane.models.iter().map(|model| ModelInfo {
                    name: model.clone(),
                    lane: lane.name.clone(),
                })
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.lane.cmp(&b.lane)));
        models
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.read().expect("lane table poisoned").len()
    }

    pub fn metrics_snapshot(&self) -> Vec<LaneMetricsSnapshot> {
        let mut snapshots: Vec<LaneMetricsSnapshot> = self
            .metrics
            .iter()
            .map(|(lane, metrics)| metrics.snapshot(lane))
            .collect();
        snapshots.sort_by(|a, b| a.lane.cmp(&b.lane));
        snapshots
    }
}
