use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical request, independent of any lane dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    /// Extra dialect parameters merged verbatim into the upstream body.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            lane: None,
            params: Map::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }
}

/// Canonical response.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResponse {
    pub content: String,
    pub model: String,
    pub tokens: usize,
    pub lane: String,
    pub elapsed_ms: u64,
}
