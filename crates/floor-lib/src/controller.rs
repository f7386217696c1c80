//! Controller loop
//!
//! Drives the agent: on every tick it reads node utilization, updates the
//! CPU percentile window, evaluates the scaling policy and applies the
//! resulting adjustments to the load pools. Cancellation moves the loop
//! into shutdown, which drains every pool within a bounded grace window.

use crate::health::{components, HealthRegistry};
use crate::metrics::{NetworkSource, UtilizationSource};
use crate::models::Readings;
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::policy::{Decision, ScalingPolicy, ScalingState, Thresholds};
use crate::pools::{LoadPools, ShutdownReport};
use crate::tracker::PercentileTracker;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Time between ticks (default: 30 seconds)
    pub interval: Duration,
    /// Bound on waiting for load units to stop at shutdown (default: 30 seconds)
    pub shutdown_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    ShuttingDown,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Node utilization could not be read; nothing changed
    MetricsUnavailable,
    Evaluated { readings: Readings, decision: Decision },
}

pub struct Controller {
    utilization: Arc<dyn UtilizationSource>,
    network: Arc<dyn NetworkSource>,
    pools: Arc<LoadPools>,
    tracker: Arc<PercentileTracker>,
    policy: ScalingPolicy,
    scaling: ScalingState,
    config: ControllerConfig,
    state: ControllerState,
    metrics: Option<AgentMetrics>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl Controller {
    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn scaling_state(&self) -> &ScalingState {
        &self.scaling
    }

    pub fn pools(&self) -> &Arc<LoadPools> {
        &self.pools
    }

    pub fn tracker(&self) -> &Arc<PercentileTracker> {
        &self.tracker
    }

    /// Run until `shutdown` is cancelled, then drain the pools
    pub async fn run(mut self, shutdown: CancellationToken) -> ShutdownReport {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting controller loop"
        );

        let toucher_cancel = shutdown.child_token();
        let toucher = self.pools.memory().spawn_toucher(toucher_cancel.clone());

        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down controller loop");
                    break;
                }
                _ = ticker.tick() => {
                    let start = Instant::now();
                    // A hung metrics call must not hold shutdown hostage
                    let outcome = tokio::select! {
                        outcome = self.tick() => Some(outcome),
                        _ = shutdown.cancelled() => None,
                    };
                    let Some(outcome) = outcome else {
                        info!("Shutting down controller loop, abandoning tick in progress");
                        break;
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_tick_latency(start.elapsed().as_secs_f64());
                    }
                    debug!(outcome = ?outcome, "Tick complete");
                }
            }
        }

        self.state = ControllerState::ShuttingDown;
        if let Some(health) = &self.health {
            health.set_ready(false).await;
        }

        toucher_cancel.cancel();
        if tokio::time::timeout(self.config.shutdown_grace, toucher)
            .await
            .is_err()
        {
            warn!("Memory toucher did not stop within the grace window");
        }

        let report = self.pools.shutdown(self.config.shutdown_grace).await;
        if let Some(metrics) = &self.metrics {
            metrics.set_pools(&self.pools.snapshot());
        }
        self.logger.log_shutdown_complete(&report);
        report
    }

    /// Run one monitoring cycle
    pub async fn tick(&mut self) -> TickOutcome {
        let utilization = match self.utilization.current_utilization().await {
            Ok(u) => {
                self.report_success(components::METRICS_SOURCE).await;
                u
            }
            Err(e) => {
                warn!(error = %e, "Failed to get utilization metrics");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_metrics_fetch_errors();
                }
                self.report_degraded(components::METRICS_SOURCE, e.to_string())
                    .await;
                self.logger.log_tick_skipped("metrics_unavailable");
                return TickOutcome::MetricsUnavailable;
            }
        };

        self.tracker.add_sample(utilization.cpu_percent);
        let cpu_p95 = self.tracker.percentile95();

        let network_mbps = match self.network.throughput_mbps().await {
            Ok(mbps) => {
                self.report_success(components::NETWORK_STATS).await;
                mbps
            }
            Err(e) => {
                debug!(error = %e, "Network throughput unavailable, assuming 0");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_network_read_errors();
                }
                self.report_degraded(components::NETWORK_STATS, e.to_string())
                    .await;
                0.0
            }
        };

        let readings = Readings {
            cpu_percent: utilization.cpu_percent,
            cpu_p95,
            memory_percent: utilization.memory_percent,
            network_mbps,
        };
        self.logger.log_sample(&readings, &self.pools.snapshot());

        let now = Instant::now();
        let decision = self.policy.decide(&readings, &self.scaling, now);
        self.apply(&decision).await;
        if let Some(direction) = decision.direction() {
            self.scaling.record(direction, now);
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_readings(&readings);
            metrics.set_pools(&self.pools.snapshot());
        }

        TickOutcome::Evaluated { readings, decision }
    }

    async fn apply(&self, decision: &Decision) {
        match decision {
            Decision::CoolingDown { remaining } => {
                debug!(
                    remaining_secs = remaining.as_secs(),
                    "Within cooldown, no adjustment"
                );
            }
            Decision::EnforceFloors(adjustments) => {
                for adjustment in adjustments {
                    self.logger.log_floor_enforced(adjustment);
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_floor_enforcement(adjustment.resource);
                    }
                    self.pools.apply(adjustment).await;
                }
            }
            Decision::Adjust { adjustments, .. } => {
                for adjustment in adjustments {
                    self.logger.log_target_adjusted(adjustment);
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_target_adjustment(adjustment.resource);
                    }
                    self.pools.apply(adjustment).await;
                }
            }
            Decision::Hold => {}
        }
    }

    async fn report_success(&self, component: &str) {
        if let Some(health) = &self.health {
            health.record_success(component).await;
        }
    }

    async fn report_degraded(&self, component: &str, message: String) {
        if let Some(health) = &self.health {
            health.record_degraded(component, message).await;
        }
    }
}

/// Builder for the controller
pub struct ControllerBuilder {
    utilization: Option<Arc<dyn UtilizationSource>>,
    network: Option<Arc<dyn NetworkSource>>,
    pools: Option<Arc<LoadPools>>,
    tracker: Option<Arc<PercentileTracker>>,
    thresholds: Option<Thresholds>,
    config: ControllerConfig,
    metrics: Option<AgentMetrics>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            utilization: None,
            network: None,
            pools: None,
            tracker: None,
            thresholds: None,
            config: ControllerConfig::default(),
            metrics: None,
            health: None,
            logger: None,
        }
    }

    pub fn utilization_source(mut self, source: Arc<dyn UtilizationSource>) -> Self {
        self.utilization = Some(source);
        self
    }

    pub fn network_source(mut self, source: Arc<dyn NetworkSource>) -> Self {
        self.network = Some(source);
        self
    }

    pub fn pools(mut self, pools: Arc<LoadPools>) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Share a percentile tracker (e.g. with the status endpoint)
    pub fn tracker(mut self, tracker: Arc<PercentileTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<Controller> {
        let utilization = self
            .utilization
            .ok_or_else(|| anyhow::anyhow!("Utilization source is required"))?;
        let network = self
            .network
            .ok_or_else(|| anyhow::anyhow!("Network source is required"))?;
        let pools = self
            .pools
            .ok_or_else(|| anyhow::anyhow!("Load pools are required"))?;
        let thresholds = self
            .thresholds
            .ok_or_else(|| anyhow::anyhow!("Thresholds are required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Monitor interval must be greater than zero");
        }

        Ok(Controller {
            utilization,
            network,
            pools,
            tracker: self.tracker.unwrap_or_default(),
            policy: ScalingPolicy::new(thresholds),
            scaling: ScalingState::new(),
            config: self.config,
            state: ControllerState::Running,
            metrics: self.metrics,
            health: self.health,
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("unknown")),
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
