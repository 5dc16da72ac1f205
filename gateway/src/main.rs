use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cortex_blackboard::{Blackboard, Compactor, HealthEngine, PruneConfig, ZoneLimits};
use cortex_bus::{Broker, InMemoryBroker, RedisBroker, TaskBus};
use cortex_core::config::{self, CheckSection, ConfigOverrides, CortexConfig};
use cortex_discovery::{Candidate, Discovery, DiscoveryConfig, HealthCheck, HealthRing, RingMember};
use cortex_fabric::FabricClient;
use cortex_gateway::collab::CollaboratorClient;
use cortex_gateway::state::{AppState, ReadinessState};
use cortex_gateway::{build_router, tasks};
use cortex_inference::{InferenceRouter, Lane, ProviderKind, RouterConfig};
use cortex_observability::{self as observability, LogFormat, TracingConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "cortex-gateway", about = "Cortex swarm gateway")]
struct GatewayCli {
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    broker: Option<String>,
    #[arg(long = "agent-name")]
    agent_name: Option<String>,
    #[arg(long = "log-level")]
    log_level: Option<String>,
    #[arg(long = "log-format")]
    log_format: Option<String>,
    #[arg(long = "otlp-endpoint")]
    otlp_endpoint: Option<String>,
}

impl GatewayCli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            profile: self.profile.clone(),
            server_host: self.host.clone(),
            server_port: self.port,
            broker_address: self.broker.clone(),
            agent_name: self.agent_name.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GatewayCli::parse();
    let config = config::load(cli.overrides()).context("failed to load configuration")?;

    let tracing_config = TracingConfig {
        service_name: "cortex-gateway".into(),
        log_format: LogFormat::from_str(&config.observability.log_format)?,
        log_level: config.observability.log_level.clone(),
        otlp_endpoint: config.observability.otlp_endpoint.clone(),
        resource_attributes: vec![("component".into(), "gateway".into())],
    };
    let (_tracing_guard, metrics_exporter) = observability::init(&tracing_config, None)?;

    let state = build_state(&config, Some(metrics_exporter)).await?;
    state.readiness.mark_ready();

    let cancel = CancellationToken::new();
    let mut handles = tasks::spawn_background(
        &state,
        &cancel,
        config.discovery.refresh_interval(),
    );
    if config.fabric.url.is_some() {
        handles.push(tasks::spawn_fabric_connector(
            Arc::clone(&state.fabric),
            cancel.child_token(),
        ));
    }

    let addr = config
        .server
        .bind_address()
        .context("invalid server bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind gateway address {addr}"))?;
    info!(?addr, "starting HTTP gateway server");

    let router = build_router(state.clone());
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    info!("shutting down background tasks");
    cancel.cancel();
    state.fabric.disconnect().await;
    let grace = config.server.shutdown_grace();
    for handle in handles {
        if tokio::time::timeout(grace, handle).await.is_err() {
            error!("background task did not stop within the grace period");
        }
    }

    Ok(())
}

async fn build_state(
    config: &CortexConfig,
    metrics: Option<cortex_observability::MetricsExporter>,
) -> Result<AppState> {
    let discovery = Arc::new(Discovery::new(
        DiscoveryConfig {
            probe_timeout: config.discovery.probe_timeout(),
            refresh_interval: config.discovery.refresh_interval(),
            stale_ttl: config.discovery.stale_ttl(),
            candidates_file: config.discovery.candidates_file.clone(),
        },
        config
            .discovery
            .candidates
            .iter()
            .map(|candidate| Candidate {
                name: candidate.name.clone(),
                address: candidate.address.clone(),
                services: candidate.services.clone(),
            })
            .collect(),
    ));

    let ring = if config.health_ring.enabled && !config.health_ring.members.is_empty() {
        let members = config
            .health_ring
            .members
            .iter()
            .map(|member| RingMember {
                name: member.name.clone(),
                checks: member.checks.iter().map(convert_check).collect(),
            })
            .collect();
        Some(Arc::new(HealthRing::new(
            members,
            config.health_ring.check_interval(),
        )))
    } else {
        None
    };

    let broker: Arc<dyn Broker> = if config.bus.broker_address.starts_with("memory") {
        warn!("using the in-process broker; tasks will not survive restarts");
        Arc::new(InMemoryBroker::new())
    } else {
        Arc::new(
            RedisBroker::connect(&config.bus.broker_address)
                .await
                .with_context(|| {
                    format!("failed to reach broker at {}", config.bus.broker_address)
                })?,
        )
    };
    let bus = TaskBus::new(broker, config.bus.agent_name.clone());

    let lanes: Vec<Lane> = config
        .inference
        .lanes
        .iter()
        .map(|lane| {
            Ok(Lane {
                name: lane.name.clone(),
                provider: parse_provider(&lane.provider)?,
                base_url: lane.base_url.clone(),
                api_key: lane.api_key.clone(),
                models: lane.models.clone(),
                default_model: lane.default_model.clone(),
            })
        })
        .collect::<Result<_>>()?;
    let default_lane = config.inference.default_lane.clone().or_else(|| {
        config
            .inference
            .lanes
            .iter()
            .find(|lane| lane.default)
            .map(|lane| lane.name.clone())
    });
    let inference = Arc::new(InferenceRouter::new(
        lanes,
        RouterConfig {
            default_lane,
            max_retries: config.inference.max_retries,
            retry_base_delay: config.inference.retry_base_delay(),
            request_timeout: config.inference.request_timeout(),
        },
    ));

    let fabric = Arc::new(FabricClient::new(
        config.fabric.url.clone().unwrap_or_default(),
        config.fabric.source.clone(),
    ));

    let blackboard = Arc::new(Blackboard::new(ZoneLimits {
        critical: config.blackboard.zones.critical,
        supporting: config.blackboard.zones.supporting,
        actionable: config.blackboard.zones.actionable,
    }));
    let compactor = Arc::new(Compactor::new(PruneConfig {
        target_utilization: config.compaction.target_utilization,
        min_prune_count: config.compaction.min_prune_count,
        protect_priority: config.compaction.protect_high_priority,
        supporting_first: config.compaction.supporting_first,
    }));

    let collaborators = Arc::new(CollaboratorClient::new(
        config.collaborators.memory_base_url.clone(),
        config.collaborators.onboarding_base_url.clone(),
    ));

    Ok(AppState {
        discovery,
        ring,
        bus,
        inference,
        fabric,
        blackboard,
        health_engine: Arc::new(HealthEngine::new()),
        compactor,
        collaborators,
        metrics,
        readiness: Arc::new(ReadinessState::default()),
        started_at: Instant::now(),
        ws_upstream: config.collaborators.ws_upstream.clone(),
    })
}

fn convert_check(check: &CheckSection) -> HealthCheck {
    match check {
        CheckSection::Tcp { host, port } => HealthCheck::Tcp {
            host: host.clone(),
            port: *port,
        },
        CheckSection::Http {
            url,
            expected_status,
        } => HealthCheck::Http {
            url: url.clone(),
            expected_status: *expected_status,
        },
    }
}

fn parse_provider(value: &str) -> Result<ProviderKind> {
    match value {
        "local" => Ok(ProviderKind::Local),
        "openai-compatible" => Ok(ProviderKind::OpenaiCompatible),
        "ollama" => Ok(ProviderKind::Ollama),
        "anthropic" => Ok(ProviderKind::Anthropic),
        other => anyhow::bail!("unsupported lane provider: {other}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
