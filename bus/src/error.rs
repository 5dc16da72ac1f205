use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("unknown task priority: {0}")]
    UnknownPriority(String),

    #[error("malformed wire payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::BrokerUnavailable(err.to_string())
    }
}
