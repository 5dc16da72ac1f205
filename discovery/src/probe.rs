use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::peer::{Candidate, Peer, PeerStatus};

/// Services whose health endpoint is the model-listing route rather than
/// a generic `/health`.
const MODEL_SERVING: &[&str] = &["ollama", "models", "inference"];

const CAPABILITY_CARD_PATH: &str = "/.well-known/agent.json";

/// Probe one candidate. Returns a peer on any positive observation and
/// `None` when nothing answered; probe errors are never surfaced.
pub(crate) async fn probe_candidate(
    client: &reqwest::Client,
    candidate: &Candidate,
    timeout: Duration,
) -> Option<Peer> {
    let host = candidate.host();
    let base_port = candidate.base_port()?;

    let base_reachable = tcp_probe(host, base_port, timeout).await;
    trace!(name = %candidate.name, host, base_port, base_reachable, "base probe");

    let mut service_health = BTreeMap::new();
    for (service, port) in &candidate.services {
        let path = if MODEL_SERVING.contains(&service.as_str()) {
            "/api/tags"
        } else {
            "/health"
        };
        let url = format!("http://{host}:{port}{path}");
        let mut live = http_probe(client, &url, 200, timeout).await;
        if !live {
            // HTTP said no (or nothing spoke HTTP): fall back to raw reachability.
            live = tcp_probe(host, *port, timeout).await;
        }
        service_health.insert(service.clone(), live);
    }

    let any_service_live = service_health.values().any(|live| *live);
    let status = if base_reachable && (any_service_live || candidate.services.is_empty()) {
        PeerStatus::Up
    } else if base_reachable || any_service_live {
        PeerStatus::Unknown
    } else {
        debug!(name = %candidate.name, "candidate unreachable");
        return None;
    };

    let capabilities = fetch_capability_card(client, host, base_port, timeout).await;

    Some(Peer {
        name: candidate.name.clone(),
        address: candidate.address.clone(),
        services: candidate.services.clone(),
        status,
        last_seen: Utc::now(),
        service_health,
        capabilities,
    })
}

pub(crate) async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

pub(crate) async fn http_probe(
    client: &reqwest::Client,
    url: &str,
    expected_status: u16,
    timeout: Duration,
) -> bool {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) => response.status().as_u16() == expected_status,
        Err(_) => false,
    }
}

async fn fetch_capability_card(
    client: &reqwest::Client,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Option<serde_json::Value> {
    let url = format!("http://{host}:{port}{CAPABILITY_CARD_PATH}");
    let response = client.get(&url).timeout(timeout).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json().await.ok()
}
