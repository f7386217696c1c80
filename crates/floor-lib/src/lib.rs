//! Node utilization floor library
//!
//! This crate provides the core functionality for:
//! - Reading node utilization from the Kubernetes metrics API
//! - Tracking the CPU 95th percentile over a sliding window
//! - Deciding floor enforcement and target adjustments
//! - Running synthetic CPU, memory and network load pools
//! - Health checks and observability

pub mod controller;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod policy;
pub mod pools;
pub mod tracker;

pub use controller::{Controller, ControllerBuilder, ControllerConfig, ControllerState, TickOutcome};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::{
    KubeMetricsSource, MetricsError, MetricsResult, NetworkSource, ProcNetDevSource,
    UtilizationSource,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use policy::{Adjustment, Decision, Direction, ScalingPolicy, ScalingState, Thresholds};
pub use pools::{LoadPools, ShutdownReport};
pub use tracker::PercentileTracker;
