//! Observability for the controller
//!
//! Provides:
//! - Prometheus metrics (node readings, pool sizes, decisions, tick latency)
//! - Structured JSON event logging with tracing

use crate::models::{PoolSnapshot, Readings, Resource};
use crate::policy::Adjustment;
use crate::pools::ShutdownReport;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick latency (in seconds)
const TICK_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    node_cpu_percent: Gauge,
    node_cpu_p95_percent: Gauge,
    node_memory_percent: Gauge,
    node_network_mbps: Gauge,
    cpu_units: IntGauge,
    network_units: IntGauge,
    memory_bytes: IntGauge,
    floor_enforcements: IntCounterVec,
    target_adjustments: IntCounterVec,
    metrics_fetch_errors: IntCounter,
    network_read_errors: IntCounter,
    tick_latency_seconds: Histogram,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            node_cpu_percent: register_gauge!(
                "floor_agent_node_cpu_percent",
                "Node CPU utilization reported by the metrics API"
            )
            .expect("Failed to register node_cpu_percent"),

            node_cpu_p95_percent: register_gauge!(
                "floor_agent_node_cpu_p95_percent",
                "95th percentile of recent node CPU readings"
            )
            .expect("Failed to register node_cpu_p95_percent"),

            node_memory_percent: register_gauge!(
                "floor_agent_node_memory_percent",
                "Node memory utilization reported by the metrics API"
            )
            .expect("Failed to register node_memory_percent"),

            node_network_mbps: register_gauge!(
                "floor_agent_node_network_mbps",
                "Network throughput on the monitored interface"
            )
            .expect("Failed to register node_network_mbps"),

            cpu_units: register_int_gauge!(
                "floor_agent_cpu_units",
                "Active CPU load units"
            )
            .expect("Failed to register cpu_units"),

            network_units: register_int_gauge!(
                "floor_agent_network_units",
                "Active network load units"
            )
            .expect("Failed to register network_units"),

            memory_bytes: register_int_gauge!(
                "floor_agent_memory_bytes",
                "Bytes held by the synthetic memory buffer"
            )
            .expect("Failed to register memory_bytes"),

            floor_enforcements: register_int_counter_vec!(
                "floor_agent_floor_enforcements_total",
                "Minimum floor enforcements by resource",
                &["resource"]
            )
            .expect("Failed to register floor_enforcements"),

            target_adjustments: register_int_counter_vec!(
                "floor_agent_target_adjustments_total",
                "Target band adjustments by resource",
                &["resource"]
            )
            .expect("Failed to register target_adjustments"),

            metrics_fetch_errors: register_int_counter!(
                "floor_agent_metrics_fetch_errors_total",
                "Ticks skipped because node utilization could not be read"
            )
            .expect("Failed to register metrics_fetch_errors"),

            network_read_errors: register_int_counter!(
                "floor_agent_network_read_errors_total",
                "Network throughput reads that fell back to zero"
            )
            .expect("Failed to register network_read_errors"),

            tick_latency_seconds: register_histogram!(
                "floor_agent_tick_latency_seconds",
                "Time spent evaluating and applying one controller tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),
        }
    }
}

/// Handle to the process-wide controller metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn set_readings(&self, readings: &Readings) {
        let inner = self.inner();
        inner.node_cpu_percent.set(readings.cpu_percent);
        inner.node_cpu_p95_percent.set(readings.cpu_p95);
        inner.node_memory_percent.set(readings.memory_percent);
        inner.node_network_mbps.set(readings.network_mbps);
    }

    pub fn set_pools(&self, snapshot: &PoolSnapshot) {
        let inner = self.inner();
        inner.cpu_units.set(snapshot.cpu_units as i64);
        inner.network_units.set(snapshot.network_units as i64);
        inner.memory_bytes.set(snapshot.memory_bytes as i64);
    }

    pub fn inc_floor_enforcement(&self, resource: Resource) {
        self.inner()
            .floor_enforcements
            .with_label_values(&[resource.as_str()])
            .inc();
    }

    pub fn inc_target_adjustment(&self, resource: Resource) {
        self.inner()
            .target_adjustments
            .with_label_values(&[resource.as_str()])
            .inc();
    }

    pub fn inc_metrics_fetch_errors(&self) {
        self.inner().metrics_fetch_errors.inc();
    }

    pub fn inc_network_read_errors(&self) {
        self.inner().network_read_errors.inc();
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for controller events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_startup(&self, version: &str, interface: &str, memory_enforcement: bool) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            network_interface = %interface,
            memory_enforcement = memory_enforcement,
            "Utilization floor agent started"
        );
    }

    pub fn log_sample(&self, readings: &Readings, pools: &PoolSnapshot) {
        info!(
            event = "utilization_sample",
            node = %self.node_name,
            cpu_percent = readings.cpu_percent,
            cpu_p95 = readings.cpu_p95,
            memory_percent = readings.memory_percent,
            network_mbps = readings.network_mbps,
            cpu_units = pools.cpu_units,
            network_units = pools.network_units,
            memory_mb = pools.memory_mb(),
            "Current utilization"
        );
    }

    pub fn log_floor_enforced(&self, adjustment: &Adjustment) {
        warn!(
            event = "floor_enforced",
            node = %self.node_name,
            resource = %adjustment.resource,
            current = adjustment.current,
            target = adjustment.target,
            "Utilization below minimum, scaling up"
        );
    }

    pub fn log_target_adjusted(&self, adjustment: &Adjustment) {
        info!(
            event = "target_adjusted",
            node = %self.node_name,
            resource = %adjustment.resource,
            current = adjustment.current,
            target = adjustment.target,
            "Utilization outside target band, adjusting"
        );
    }

    pub fn log_tick_skipped(&self, reason: &str) {
        warn!(
            event = "tick_skipped",
            node = %self.node_name,
            reason = %reason,
            "Skipping controller tick"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Utilization floor agent shutting down"
        );
    }

    pub fn log_shutdown_complete(&self, report: &ShutdownReport) {
        info!(
            event = "shutdown_completed",
            node = %self.node_name,
            cpu_units_stopped = report.cpu_units_stopped,
            network_units_stopped = report.network_units_stopped,
            units_abandoned = report.units_abandoned,
            memory_released_bytes = report.memory_released_bytes,
            "Graceful shutdown completed"
        );
    }
}
