use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A probe target: stable name, host address, and the services it claims
/// to run. Candidates persist across failed probes; peers do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub services: BTreeMap<String, u16>,
}

impl Candidate {
    pub fn from_address(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
            services: BTreeMap::new(),
        }
    }

    /// Host without any `:port` suffix.
    pub fn host(&self) -> &str {
        match self.address.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host,
            _ => &self.address,
        }
    }

    /// The port probed for base connectivity: an explicit `:port` in the
    /// address wins, otherwise the lowest declared service port.
    pub fn base_port(&self) -> Option<u16> {
        if let Some((_, port)) = self.address.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return Some(port);
            }
        }
        self.services.values().copied().min()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Up,
    Down,
    Unknown,
}

/// A live observation of a candidate. Owned and mutated by discovery only;
/// everything handed out is a snapshot copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub address: String,
    pub services: BTreeMap<String, u16>,
    pub status: PeerStatus,
    pub last_seen: DateTime<Utc>,
    /// Which declared services answered on the last probe.
    pub service_health: BTreeMap<String, bool>,
    /// Capability card fetched from the peer's well-known path, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
}

/// A single health probe owned by a ring member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HealthCheck {
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

impl HealthCheck {
    pub fn describe(&self) -> String {
        match self {
            HealthCheck::Tcp { host, port } => format!("tcp://{host}:{port}"),
            HealthCheck::Http { url, .. } => url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_port_prefers_explicit_address_port() {
        let mut candidate = Candidate::from_address("10.0.0.5:9700");
        candidate.services.insert("ollama".into(), 11434);
        assert_eq!(candidate.host(), "10.0.0.5");
        assert_eq!(candidate.base_port(), Some(9700));
    }

    #[test]
    fn base_port_falls_back_to_lowest_service_port() {
        let mut candidate = Candidate::from_address("10.0.0.5");
        candidate.services.insert("ollama".into(), 11434);
        candidate.services.insert("gateway".into(), 9700);
        assert_eq!(candidate.base_port(), Some(9700));
    }

    #[test]
    fn health_check_yaml_round_trips() {
        let yaml = "type: http\nurl: http://127.0.0.1:9700/health\n";
        let check: HealthCheck = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            check,
            HealthCheck::Http {
                url: "http://127.0.0.1:9700/health".into(),
                expected_status: 200,
            }
        );
    }
}
