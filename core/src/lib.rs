pub mod config;
pub mod retry;

pub use config::{load, ConfigError, ConfigOverrides, CortexConfig};
pub use retry::Backoff;
