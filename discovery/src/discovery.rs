use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::peer::{Candidate, Peer, PeerStatus};
use crate::probe::probe_candidate;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub probe_timeout: Duration,
    pub refresh_interval: Duration,
    pub stale_ttl: Duration,
    /// Optional YAML file the candidate set is persisted to.
    pub candidates_file: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let refresh_interval = Duration::from_secs(30);
        Self {
            probe_timeout: Duration::from_secs(2),
            refresh_interval,
            stale_ttl: refresh_interval * 3,
            candidates_file: None,
        }
    }
}

/// Authoritative map of reachable peers. Candidates are probed concurrently
/// on every scan; scans are single-flight so concurrent callers cannot
/// duplicate work.
pub struct Discovery {
    config: DiscoveryConfig,
    client: reqwest::Client,
    candidates: RwLock<BTreeMap<String, Candidate>>,
    peers: RwLock<HashMap<String, Peer>>,
    scan_gate: tokio::sync::Mutex<()>,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig, seeds: Vec<Candidate>) -> Self {
        let mut candidates: BTreeMap<String, Candidate> = seeds
            .into_iter()
            .map(|candidate| (candidate.address.clone(), candidate))
            .collect();

        if let Some(path) = &config.candidates_file {
            for candidate in load_candidates(path) {
                candidates
                    .entry(candidate.address.clone())
                    .or_insert(candidate);
            }
        }

        Self {
            config,
            client: reqwest::Client::new(),
            candidates: RwLock::new(candidates),
            peers: RwLock::new(HashMap::new()),
            scan_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Probe every candidate concurrently and merge positive observations
    /// into the peer map. Returns the live peers from this pass.
    pub async fn scan(&self) -> Vec<Peer> {
        let _flight = self.scan_gate.lock().await;
        let candidates: Vec<Candidate> = self.candidates.read().values().cloned().collect();

        let probes = candidates
            .iter()
            .map(|candidate| probe_candidate(&self.client, candidate, self.config.probe_timeout));
        let observed: Vec<Peer> = join_all(probes).await.into_iter().flatten().collect();

        {
            let mut peers = self.peers.write();
            for peer in &observed {
                peers.insert(peer.name.clone(), peer.clone());
            }
        }
        debug!(
            candidates = candidates.len(),
            observed = observed.len(),
            "discovery scan complete"
        );
        observed
            .into_iter()
            .filter(|peer| peer.status == PeerStatus::Up)
            .collect()
    }

    /// Snapshot of the peer map. Peers not seen within the stale TTL are
    /// reported as down; they stay in the candidate set until removed.
    pub fn list(&self) -> Vec<Peer> {
        let ttl = chrono::Duration::from_std(self.config.stale_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(90));
        let now = Utc::now();
        self.peers
            .read()
            .values()
            .cloned()
            .map(|mut peer| {
                if now - peer.last_seen > ttl {
                    peer.status = PeerStatus::Down;
                }
                peer
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Peer> {
        self.list().into_iter().find(|peer| peer.name == name)
    }

    /// Idempotent: adding an address already in the set is a no-op.
    pub fn add_candidate(&self, address: &str) {
        self.add_candidate_full(Candidate::from_address(address));
    }

    pub fn add_candidate_full(&self, candidate: Candidate) {
        let changed = {
            let mut candidates = self.candidates.write();
            match candidates.get(&candidate.address) {
                Some(existing) if *existing == candidate => false,
                _ => {
                    candidates.insert(candidate.address.clone(), candidate);
                    true
                }
            }
        };
        if changed {
            self.persist();
        }
    }

    pub fn remove_candidate(&self, address: &str) -> bool {
        let removed = self.candidates.write().remove(address).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.candidates.read().values().cloned().collect()
    }

    /// Background refresh loop. Runs until the token is cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.refresh_interval.as_secs(),
            "discovery refresh loop started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.refresh_interval) => {
                    let live = self.scan().await;
                    debug!(live = live.len(), "discovery refresh pass");
                }
            }
        }
        info!("discovery refresh loop stopped");
    }

    fn persist(&self) {
        let Some(path) = &self.config.candidates_file else {
            return;
        };
        let candidates: Vec<Candidate> = self.candidates.read().values().cloned().collect();
        match serde_yaml::to_string(&candidates) {
            Ok(rendered) => {
                if let Err(err) = std::fs::write(path, rendered) {
                    warn!(path = %path.display(), error = %err, "failed to persist candidates");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize candidates"),
        }
    }
}

fn load_candidates(path: &PathBuf) -> Vec<Candidate> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_yaml::from_str(&raw) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring malformed candidates file");
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_candidate_is_idempotent() {
        let discovery = Discovery::new(DiscoveryConfig::default(), Vec::new());
        discovery.add_candidate("10.0.0.9:9700");
        discovery.add_candidate("10.0.0.9:9700");
        assert_eq!(discovery.candidates().len(), 1);
        assert!(discovery.remove_candidate("10.0.0.9:9700"));
        assert!(!discovery.remove_candidate("10.0.0.9:9700"));
    }

    #[test]
    fn candidates_persist_and_reload_as_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.yaml");
        let config = DiscoveryConfig {
            candidates_file: Some(path.clone()),
            ..Default::default()
        };
        let discovery = Discovery::new(config.clone(), Vec::new());
        discovery.add_candidate("10.0.0.7:9700");
        drop(discovery);

        let reloaded = Discovery::new(config, Vec::new());
        assert_eq!(reloaded.candidates().len(), 1);
        assert_eq!(reloaded.candidates()[0].address, "10.0.0.7:9700");
    }

    #[test]
    fn seeds_take_precedence_over_persisted_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.yaml");
        std::fs::write(
            &path,
            "- name: stale\n  address: \"10.0.0.7:9700\"\n  services: {}\n",
        )
        .unwrap();
        let config = DiscoveryConfig {
            candidates_file: Some(path),
            ..Default::default()
        };
        let seed = Candidate {
            name: "fresh".into(),
            address: "10.0.0.7:9700".into(),
            services: BTreeMap::new(),
        };
        let discovery = Discovery::new(config, vec![seed]);
        assert_eq!(discovery.candidates()[0].name, "fresh");
    }
}
