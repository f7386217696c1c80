//! Floor Agent - node utilization floor controller
//!
//! This binary runs as a DaemonSet on each Kubernetes node, keeping the
//! node's CPU, memory and network utilization between configured minimums
//! and targets by running synthetic load.

use anyhow::{Context, Result};
use floor_lib::{
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    ControllerBuilder, KubeMetricsSource, LoadPools, PercentileTracker, ProcNetDevSource,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting floor-agent");

    let config = config::AgentConfig::load()?;
    let node_name = config.resolve_node_name()?;
    info!(node_name = %node_name, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONTROLLER).await;
    health_registry.register(components::METRICS_SOURCE).await;
    health_registry.register(components::NETWORK_STATS).await;

    let metrics = AgentMetrics::new();

    let logger = StructuredLogger::new(&node_name);
    logger.log_startup(
        AGENT_VERSION,
        &config.network_interface,
        config.enable_memory_utilization,
    );

    let utilization = KubeMetricsSource::try_default(node_name.clone())
        .await
        .context("Failed to create Kubernetes client")?;
    let network = ProcNetDevSource::new(config.network_interface.clone());

    let pools = Arc::new(LoadPools::new(config.max_memory_mb));
    let tracker = Arc::new(PercentileTracker::default());

    let controller = ControllerBuilder::new()
        .utilization_source(Arc::new(utilization))
        .network_source(Arc::new(network))
        .pools(pools.clone())
        .tracker(tracker.clone())
        .thresholds(config.thresholds())
        .interval(config.monitor_interval())
        .shutdown_grace(config.shutdown_grace())
        .metrics(metrics.clone())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let app_state = Arc::new(api::AppState::new(
        node_name.clone(),
        health_registry.clone(),
        metrics.clone(),
        pools,
        tracker,
    ));

    let shutdown = CancellationToken::new();

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown.clone()));

    let controller_handle = tokio::spawn(controller.run(shutdown.clone()));

    // Mark agent as ready once the controller is running
    health_registry.set_ready(true).await;

    let reason = wait_for_shutdown_signal().await?;
    logger.log_shutdown(reason);
    shutdown.cancel();

    match controller_handle.await {
        Ok(report) => info!(
            units_abandoned = report.units_abandoned,
            "Controller stopped"
        ),
        Err(e) => {
            error!(error = %e, "Controller task failed");
            health_registry
                .set_unhealthy(components::CONTROLLER, e.to_string())
                .await;
        }
    }

    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        Ok("ctrl-c received")
    }
}
