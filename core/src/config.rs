use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_DIR: &str = "config";

/// Top-level configuration for the gateway process. Every section carries
/// serde defaults so a bare `load` succeeds with no file on disk.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CortexConfig {
    pub server: ServerSection,
    pub discovery: DiscoverySection,
    pub bus: BusSection,
    pub inference: InferenceSection,
    pub health_ring: HealthRingSection,
    pub blackboard: BlackboardSection,
    pub compaction: CompactionSection,
    pub fabric: FabricSection,
    pub collaborators: CollaboratorsSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9700,
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerSection {
    pub fn bind_address(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub candidates: Vec<CandidateSection>,
    pub refresh_interval_secs: u64,
    /// Defaults to 3x the refresh interval when absent.
    pub stale_ttl_secs: Option<u64>,
    pub probe_timeout_secs: u64,
    pub candidates_file: Option<PathBuf>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            refresh_interval_secs: 30,
            stale_ttl_secs: None,
            probe_timeout_secs: 2,
            candidates_file: None,
        }
    }
}

impl DiscoverySection {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(
            self.stale_ttl_secs
                .unwrap_or(self.refresh_interval_secs * 3),
        )
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CandidateSection {
    pub name: String,
    pub address: String,
    pub services: BTreeMap<String, u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Broker URL. The scheme `memory://` selects the in-process broker.
    pub broker_address: String,
    pub agent_name: String,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            broker_address: "redis://127.0.0.1:6379".into(),
            agent_name: "cortex-gateway".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    pub default_lane: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub lanes: Vec<LaneSection>,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            default_lane: None,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            lanes: Vec::new(),
        }
    }
}

impl InferenceSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LaneSection {
    pub name: String,
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub models: Vec<String>,
    pub default_model: Option<String>,
    /// Marks this lane as the router default when `inference.default_lane`
    /// is not set explicitly.
    pub default: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthRingSection {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub members: Vec<RingMemberSection>,
}

impl Default for HealthRingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 30,
            members: Vec::new(),
        }
    }
}

impl HealthRingSection {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RingMemberSection {
    pub name: String,
    pub checks: Vec<CheckSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckSection {
    Tcp {
        host: String,
        port: u16,
    },
    Http {
        url: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
    },
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlackboardSection {
    pub zones: ZoneLimitsSection,
}

impl Default for BlackboardSection {
    fn default() -> Self {
        Self {
            zones: ZoneLimitsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZoneLimitsSection {
    pub critical: usize,
    pub supporting: usize,
    pub actionable: usize,
}

impl Default for ZoneLimitsSection {
    fn default() -> Self {
        Self {
            critical: 2000,
            supporting: 4000,
            actionable: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompactionSection {
    pub target_utilization: f64,
    pub min_prune_count: usize,
    pub protect_high_priority: f64,
    pub supporting_first: bool,
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            target_utilization: 0.70,
            min_prune_count: 3,
            protect_high_priority: 0.90,
            supporting_first: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FabricSection {
    pub url: Option<String>,
    pub source: String,
}

impl Default for FabricSection {
    fn default() -> Self {
        Self {
            url: None,
            source: "cortex-gateway".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CollaboratorsSection {
    pub memory_base_url: Option<String>,
    pub onboarding_base_url: Option<String>,
    pub ws_upstream: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    pub log_level: String,
    pub log_format: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "pretty".into(),
            otlp_endpoint: None,
        }
    }
}

/// CLI-sourced overrides applied on top of file and environment sources.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub broker_address: Option<String>,
    pub agent_name: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

impl From<std::net::AddrParseError> for ConfigError {
    fn from(err: std::net::AddrParseError) -> Self {
        ConfigError::Message(err.to_string())
    }
}

/// Resolve the effective configuration. Precedence, lowest to highest:
/// `config/default.{yaml,toml}`, optional profile file, explicit `--config`
/// path, `CORTEX__`-prefixed environment variables, CLI overrides.
pub fn load(overrides: ConfigOverrides) -> std::result::Result<CortexConfig, ConfigError> {
    let mut builder = Config::builder();
    builder = builder.add_source(optional_file(DEFAULT_CONFIG_DIR, "default"));

    if let Some(profile) = overrides.profile.as_deref() {
        builder = builder.add_source(optional_file(DEFAULT_CONFIG_DIR, profile));
    }

    if let Some(path) = overrides.config_path {
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(Environment::with_prefix("CORTEX").separator("__"));

    if let Some(host) = overrides.server_host {
        builder = builder.set_override("server.host", host)?;
    }
    if let Some(port) = overrides.server_port {
        builder = builder.set_override("server.port", port as i64)?;
    }
    if let Some(broker) = overrides.broker_address {
        builder = builder.set_override("bus.broker_address", broker)?;
    }
    if let Some(agent) = overrides.agent_name {
        builder = builder.set_override("bus.agent_name", agent)?;
    }
    if let Some(log_level) = overrides.log_level {
        builder = builder.set_override("observability.log_level", log_level)?;
    }
    if let Some(log_format) = overrides.log_format {
        builder = builder.set_override("observability.log_format", log_format)?;
    }
    if let Some(otlp_endpoint) = overrides.otlp_endpoint {
        builder = builder.set_override("observability.otlp_endpoint", otlp_endpoint)?;
    }

    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}

fn optional_file(dir: &str, name: &str) -> File<config::FileSourceFile, config::FileFormat> {
    File::from(Path::new(dir).join(name)).required(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_without_any_file() {
        let config = load(ConfigOverrides::default()).expect("config loads");
        assert_eq!(config.server.port, 9700);
        assert_eq!(config.discovery.refresh_interval_secs, 30);
        assert_eq!(config.discovery.stale_ttl(), Duration::from_secs(90));
        assert_eq!(config.compaction.target_utilization, 0.70);
        assert_eq!(config.bus.agent_name, "cortex-gateway");
    }

    #[test]
    fn applies_cli_overrides() {
        let overrides = ConfigOverrides {
            server_port: Some(9901),
            log_level: Some("debug".into()),
            broker_address: Some("memory://".into()),
            ..Default::default()
        };
        let config = load(overrides).expect("config loads with overrides");
        assert_eq!(config.server.port, 9901);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.bus.broker_address, "memory://");
    }

    #[test]
    fn reads_yaml_file_with_lanes_and_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cortex.yaml");
        let mut file = std::fs::File::create(&path).expect("create config file");
        write!(
            file,
            r#"
server:
  port: 9800
discovery:
  candidates:
    - name: workshop
      address: "10.0.0.12"
      services:
        ollama: 11434
inference:
  default_lane: local
  lanes:
    - name: local
      provider: openai-compatible
      base_url: "http://127.0.0.1:8080"
      models: ["qwen2.5"]
      default: true
health_ring:
  members:
    - name: broker
      checks:
        - type: tcp
          host: "127.0.0.1"
          port: 6379
        - type: http
          url: "http://127.0.0.1:9700/health"
"#
        )
        .expect("write config");

        let overrides = ConfigOverrides {
            config_path: Some(path),
            ..Default::default()
        };
        let config = load(overrides).expect("yaml config loads");
        assert_eq!(config.server.port, 9800);
        assert_eq!(config.discovery.candidates.len(), 1);
        assert_eq!(
            config.discovery.candidates[0].services.get("ollama"),
            Some(&11434)
        );
        assert_eq!(config.inference.lanes.len(), 1);
        assert!(config.inference.lanes[0].default);
        let member = &config.health_ring.members[0];
        assert_eq!(member.checks.len(), 2);
        assert!(matches!(
            member.checks[1],
            CheckSection::Http {
                expected_status: 200,
                ..
            }
        ));
    }
}
