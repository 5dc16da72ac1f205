use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("unknown lane: {0}")]
    LaneUnknown(String),

    #[error("model {0} is not served by any configured lane")]
    ModelUnknown(String),

    #[error("no default lane configured")]
    NoDefaultLane,

    #[error("lane {0} declares no models and the request named none")]
    NoModel(String),

    #[error("upstream rejected the request ({status}): {body}")]
    UpstreamClient { status: u16, body: String },

    #[error("upstream failed ({status}): {body}")]
    UpstreamServer { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("inference failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<InferenceError>,
    },
}

impl InferenceError {
    /// 5xx, timeouts and transport failures are retried; everything else
    /// surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::UpstreamServer { .. }
                | InferenceError::Timeout(_)
                | InferenceError::Transport(_)
        )
    }

    /// The HTTP status a gateway should translate this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            InferenceError::LaneUnknown(_)
            | InferenceError::ModelUnknown(_)
            | InferenceError::NoDefaultLane
            | InferenceError::NoModel(_) => 400,
            InferenceError::UpstreamClient { status, .. } => *status,
            InferenceError::Exhausted { source, .. } => source.http_status(),
            InferenceError::Timeout(_) => 504,
            _ => 502,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout(Duration::from_secs(0))
        } else {
            InferenceError::Transport(err.to_string())
        }
    }
}
