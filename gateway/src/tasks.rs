use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cortex_blackboard::{Compactor, Trigger, TriggerSet};
use cortex_core::retry::{sleep_cancellable, Backoff};
use cortex_fabric::{ConnectionState, Event, FabricClient};

use crate::state::AppState;

const TRIGGER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Spawn every long-lived gateway activity under one cancellation token.
/// Each loop exits promptly on cancel; the caller joins the handles within
/// the shutdown grace period.
pub fn spawn_background(
    state: &AppState,
    cancel: &CancellationToken,
    heartbeat_interval: Duration,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(tokio::spawn(
        Arc::clone(&state.discovery).run(cancel.child_token()),
    ));

    if let Some(ring) = &state.ring {
        handles.push(tokio::spawn(Arc::clone(ring).run(cancel.child_token())));
    }

    handles.push(tokio::spawn(heartbeat_loop(
        state.clone(),
        cancel.child_token(),
        heartbeat_interval,
    )));

    handles.push(tokio::spawn(trigger_loop(
        state.clone(),
        cancel.child_token(),
    )));

    handles
}

/// Keep trying the initial fabric connection; once it succeeds the client's
/// own supervisor takes over reconnects.
pub fn spawn_fabric_connector(
    fabric: Arc<FabricClient>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Backoff::reconnect();
        loop {
            if cancel.is_cancelled() || fabric.state() == ConnectionState::Connected {
                break;
            }
            match fabric.connect().await {
                Ok(()) => {
                    info!("fabric connection established");
                    break;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, retry_in_secs = delay.as_secs(), "fabric connect failed");
                    if !sleep_cancellable(delay, &cancel).await {
                        break;
                    }
                }
            }
        }
    })
}

/// Periodic liveness broadcast so peers observe the gateway itself.
async fn heartbeat_loop(state: AppState, cancel: CancellationToken, interval: Duration) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let peers = state.discovery.list().len();
                let utilization = state.blackboard.stats().utilization;
                let mut data = Map::new();
                data.insert("peers".into(), Value::from(peers));
                data.insert("blackboard_utilization".into(), Value::from(utilization));
                if let Err(err) = state.bus.send_heartbeat("ready", data).await {
                    warn!(error = %err, "heartbeat publish failed");
                }
            }
        }
    }
}

/// Watch blackboard utilization for threshold crossings. Fired triggers go
/// out as fabric events; a `Budget90` crossing additionally runs the
/// health-driven auto-compaction policy.
async fn trigger_loop(state: AppState, cancel: CancellationToken) {
    let mut triggers = TriggerSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(TRIGGER_POLL_INTERVAL) => {
                let utilization = state.blackboard.stats().utilization;
                for trigger in triggers.observe(utilization) {
                    publish(&state, &format!("blackboard.{}", trigger.as_str()),
                        json!({ "utilization": utilization })).await;
                    if trigger == Trigger::Budget90 {
                        auto_compact(&state).await;
                    }
                }
            }
        }
    }
}

async fn auto_compact(state: &AppState) {
    let report = state.health_engine.classify(&state.blackboard);
    publish(
        state,
        "blackboard.compaction_needed",
        json!({ "status": report.status.as_str(), "score": report.score }),
    )
    .await;
    let target = Compactor::target_for(report.status);
    let target_tokens = (state.blackboard.budget() as f64 * target).floor() as usize;
    let result = state
        .compactor
        .prune_to_target(&state.blackboard, target_tokens);
    info!(
        freed = result.tokens_freed,
        removed = result.pruned.len(),
        utilization = result.utilization_after,
        "auto-compaction finished"
    );
    publish(
        state,
        "blackboard.compaction_done",
        serde_json::to_value(&result).unwrap_or(Value::Null),
    )
    .await;
}

async fn publish(state: &AppState, kind: &str, payload: Value) {
    let event = Event::broadcast(kind, state.bus.agent_name(), payload);
    if let Err(err) = state.fabric.publish(&event).await {
        warn!(kind, error = %err, "fabric publish skipped");
    }
}
