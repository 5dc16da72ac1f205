use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("{0} collaborator is not configured")]
    Unconfigured(&'static str),

    #[error("collaborator unreachable: {0}")]
    Unreachable(String),
}

/// Thin forwarding client for the external collaborators the gateway
/// re-exposes. Upstream statuses pass through untouched; only transport
/// failures become gateway-side errors.
pub struct CollaboratorClient {
    client: reqwest::Client,
    memory_base: Option<String>,
    onboarding_base: Option<String>,
}

impl CollaboratorClient {
    pub fn new(memory_base: Option<String>, onboarding_base: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            memory_base: memory_base.map(|base| base.trim_end_matches('/').to_string()),
            onboarding_base: onboarding_base.map(|base| base.trim_end_matches('/').to_string()),
        }
    }

    pub async fn memory_get(
        &self,
        path: &str,
        query: Option<&str>,
    ) -> Result<(u16, Value), CollabError> {
        let base = self
            .memory_base
            .as_deref()
            .ok_or(CollabError::Unconfigured("memory"))?;
        self.forward_get(base, path, query).await
    }

    pub async fn memory_post(&self, path: &str, body: Value) -> Result<(u16, Value), CollabError> {
        let base = self
            .memory_base
            .as_deref()
            .ok_or(CollabError::Unconfigured("memory"))?;
        self.forward_post(base, path, body).await
    }

    pub async fn onboarding_get(
        &self,
        path: &str,
        query: Option<&str>,
    ) -> Result<(u16, Value), CollabError> {
        let base = self
            .onboarding_base
            .as_deref()
            .ok_or(CollabError::Unconfigured("onboarding"))?;
        self.forward_get(base, path, query).await
    }

    pub async fn onboarding_post(
        &self,
        path: &str,
        body: Value,
    ) -> Result<(u16, Value), CollabError> {
        let base = self
            .onboarding_base
            .as_deref()
            .ok_or(CollabError::Unconfigured("onboarding"))?;
        self.forward_post(base, path, body).await
    }

    async fn forward_get(
        &self,
        base: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<(u16, Value), CollabError> {
        let url = match query {
            Some(query) if !query.is_empty() => format!("{base}{path}?{query}"),
            _ => format!("{base}{path}"),
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| CollabError::Unreachable(err.to_string()))?;
        Self::collect(response).await
    }

    async fn forward_post(
        &self,
        base: &str,
        path: &str,
        body: Value,
    ) -> Result<(u16, Value), CollabError> {
        let url = format!("{base}{path}");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| CollabError::Unreachable(err.to_string()))?;
        Self::collect(response).await
    }

    async fn collect(response: reqwest::Response) -> Result<(u16, Value), CollabError> {
        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|err| CollabError::Unreachable(err.to_string()))?;
        let body = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        Ok((status, body))
    }
}
