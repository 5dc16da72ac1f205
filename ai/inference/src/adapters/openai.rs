use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{reject_error_status, ChatOutcome, LaneAdapter};
use crate::error::InferenceError;
use crate::lane::{Lane, ProviderKind};
use crate::types::InferenceRequest;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// OpenAI-compatible chat-completions dialect. Local llama.cpp-style
/// servers and anthropic endpoints both speak this shape here; the
/// difference is confined to auth headers.
pub struct OpenAiAdapter {
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

#[async_trait]
impl LaneAdapter for OpenAiAdapter {
    async fn chat(
        &self,
        lane: &Lane,
        model: &str,
        request: &InferenceRequest,
    ) -> Result<ChatOutcome, InferenceError> {
        let url = format!("{}/v1/chat/completions", lane.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Value::Object(map) = &mut body {
            for (key, value) in &request.params {
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &lane.api_key {
            builder = match lane.provider {
                ProviderKind::Anthropic => builder
                    .header("x-api-key", key)
                    .header("anthropic-version", ANTHROPIC_VERSION),
                _ => builder.bearer_auth(key),
            };
        }

        let response = reject_error_status(builder.send().await?).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| InferenceError::InvalidResponse(err.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::InvalidResponse("no choices in response".into()))?;
        let tokens = if parsed.usage.total_tokens > 0 {
            parsed.usage.total_tokens
        } else {
            parsed.usage.prompt_tokens + parsed.usage.completion_tokens
        };

        Ok(ChatOutcome {
            content: choice.message.content,
            model: if parsed.model.is_empty() {
                model.to_string()
            } else {
                parsed.model
            },
            tokens,
        })
    }
}
