use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// Wire dialect a lane speaks. `Local` and `Anthropic` ride the
/// OpenAI-compatible chat-completions shape; anthropic lanes additionally
/// send their provider headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Local,
    OpenaiCompatible,
    Ollama,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::OpenaiCompatible => "openai-compatible",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

/// A named inference backend: provider, endpoint, credential, declared
/// models. Static for the lifetime of a router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lane {
    pub name: String,
    pub provider: ProviderKind,
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

impl Lane {
    pub fn serves_model(&self, model: &str) -> bool {
        self.models.iter().any(|candidate| candidate == model)
    }

    /// Pick the model an upstream call should use: the request's choice,
    /// then the lane default, then the first declared model.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String, InferenceError> {
        if let Some(model) = requested {
            return Ok(model.to_string());
        }
        if let Some(model) = &self.default_model {
            return Ok(model.clone());
        }
        self.models
            .first()
            .cloned()
            .ok_or_else(|| InferenceError::NoModel(self.name.clone()))
    }
}
