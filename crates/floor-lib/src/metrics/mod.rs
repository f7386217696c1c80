//! Node metrics sources
//!
//! The controller reads utilization through two traits so the Kubernetes
//! and procfs adapters can be swapped for fakes in tests.

mod kubernetes;
mod netdev;
mod quantity;

pub use kubernetes::KubeMetricsSource;
pub use netdev::{parse_interface_bytes, ProcNetDevSource, PROC_NET_DEV};
pub use quantity::{parse_cpu_millicores, parse_memory_bytes};

use crate::models::NodeUtilization;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("{kind} not found for node {node}")]
    NotFound { kind: &'static str, node: String },

    #[error("kubernetes request failed: {0}")]
    Transport(#[source] kube::Error),

    #[error("node {node} reports no {resource} capacity")]
    MissingCapacity { node: String, resource: &'static str },

    #[error("node metrics for {node} carry no {resource} usage")]
    MissingUsage { node: String, resource: &'static str },

    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    #[error("failed to read interface statistics: {0}")]
    Io(#[from] std::io::Error),

    #[error("interface {0} not present in interface statistics")]
    InterfaceNotFound(String),
}

pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

/// Source of node CPU and memory utilization
#[async_trait]
pub trait UtilizationSource: Send + Sync {
    async fn current_utilization(&self) -> MetricsResult<NodeUtilization>;
}

/// Source of node network throughput
#[async_trait]
pub trait NetworkSource: Send + Sync {
    async fn throughput_mbps(&self) -> MetricsResult<f64>;
}
