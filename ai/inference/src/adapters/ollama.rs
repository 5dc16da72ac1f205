use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{reject_error_status, ChatOutcome, LaneAdapter};
use crate::error::InferenceError;
use crate::lane::Lane;
use crate::types::InferenceRequest;

/// Simplified ollama-style `/api/chat` dialect.
pub struct OllamaAdapter {
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: usize,
    #[serde(default)]
    eval_count: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LaneAdapter for OllamaAdapter {
    async fn chat(
        &self,
        lane: &Lane,
        model: &str,
        request: &InferenceRequest,
    ) -> Result<ChatOutcome, InferenceError> {
        let url = format!("{}/api/chat", lane.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": false,
        });
        if let Value::Object(map) = &mut body {
            for (key, value) in &request.params {
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let response = reject_error_status(self.client.post(&url).json(&body).send().await?).await?;
        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|err| InferenceError::InvalidResponse(err.to_string()))?;

        Ok(ChatOutcome {
            content: parsed.message.content,
            model: if parsed.model.is_empty() {
                model.to_string()
            } else {
                parsed.model
            },
            tokens: parsed.prompt_eval_count + parsed.eval_count,
        })
    }
}
