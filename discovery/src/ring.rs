use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::peer::HealthCheck;
use crate::probe::{http_probe, tcp_probe};

/// A named member of the health ring and its ordered check list.
#[derive(Debug, Clone)]
pub struct RingMember {
    pub name: String,
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberHealth {
    pub name: String,
    pub healthy: bool,
    pub checks: Vec<CheckResult>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RingStatus {
    pub total: usize,
    pub healthy: usize,
    pub members: Vec<MemberHealth>,
}

/// Runs the configured checks against every member on an interval and
/// keeps the latest roll-up.
pub struct HealthRing {
    members: Vec<RingMember>,
    check_interval: Duration,
    check_timeout: Duration,
    client: reqwest::Client,
    state: RwLock<HashMap<String, MemberHealth>>,
}

impl HealthRing {
    pub fn new(members: Vec<RingMember>, check_interval: Duration) -> Self {
        Self {
            members,
            check_interval,
            check_timeout: Duration::from_secs(2),
            client: reqwest::Client::new(),
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Run every member's checks once and refresh the roll-up.
    pub async fn check_all(&self) -> Vec<MemberHealth> {
        let mut results = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let mut checks = Vec::with_capacity(member.checks.len());
            for check in &member.checks {
                let healthy = match check {
                    HealthCheck::Tcp { host, port } => {
                        tcp_probe(host, *port, self.check_timeout).await
                    }
                    HealthCheck::Http {
                        url,
                        expected_status,
                    } => http_probe(&self.client, url, *expected_status, self.check_timeout).await,
                };
                checks.push(CheckResult {
                    check: check.describe(),
                    healthy,
                });
            }
            let health = MemberHealth {
                name: member.name.clone(),
                healthy: !checks.is_empty() && checks.iter().all(|result| result.healthy),
                checks,
                last_checked: Utc::now(),
            };
            results.push(health);
        }

        let mut state = self.state.write();
        for health in &results {
            state.insert(health.name.clone(), health.clone());
        }
        results
    }

    pub fn status(&self) -> RingStatus {
        let state = self.state.read();
        let mut members: Vec<MemberHealth> = state.values().cloned().collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        RingStatus {
            total: self.members.len(),
            healthy: members.iter().filter(|member| member.healthy).count(),
            members,
        }
    }

    pub fn member(&self, name: &str) -> Option<MemberHealth> {
        self.state.read().get(name).cloned()
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            members = self.members.len(),
            interval_secs = self.check_interval.as_secs(),
            "health ring started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {
                    let results = self.check_all().await;
                    debug!(
                        healthy = results.iter().filter(|member| member.healthy).count(),
                        total = results.len(),
                        "health ring pass"
                    );
                }
            }
        }
        info!("health ring stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_member_goes_healthy_when_port_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ring = HealthRing::new(
            vec![RingMember {
                name: "broker".into(),
                checks: vec![HealthCheck::Tcp {
                    host: "127.0.0.1".into(),
                    port,
                }],
            }],
            Duration::from_secs(30),
        );

        let results = ring.check_all().await;
        assert!(results[0].healthy);
        assert_eq!(ring.status().healthy, 1);
        assert!(ring.member("broker").unwrap().healthy);
        assert!(ring.member("missing").is_none());
    }

    #[tokio::test]
    async fn member_with_no_checks_is_unhealthy() {
        let ring = HealthRing::new(
            vec![RingMember {
                name: "ghost".into(),
                checks: Vec::new(),
            }],
            Duration::from_secs(30),
        );
        let results = ring.check_all().await;
        assert!(!results[0].healthy);
    }
}
