use async_trait::async_trait;

use crate::error::InferenceError;
use crate::lane::Lane;
use crate::types::InferenceRequest;

pub mod ollama;
pub mod openai;

pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

/// What an upstream call yields before the router stamps lane and timing
/// onto it.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub model: String,
    pub tokens: usize,
}

/// Converts the canonical request into one lane dialect. Adapters are
/// interchangeable behind this trait.
#[async_trait]
pub trait LaneAdapter: Send + Sync {
    async fn chat(
        &self,
        lane: &Lane,
        model: &str,
        request: &InferenceRequest,
    ) -> Result<ChatOutcome, InferenceError>;
}

/// Shared status mapping: 4xx surfaces verbatim and is never retried,
/// 5xx is retryable.
pub(crate) async fn reject_error_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(InferenceError::UpstreamClient {
            status: status.as_u16(),
            body,
        });
    }
    if status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(InferenceError::UpstreamServer {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
