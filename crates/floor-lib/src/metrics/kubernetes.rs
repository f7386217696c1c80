//! Kubernetes metrics adapter
//!
//! Reads the `metrics.k8s.io/v1beta1` NodeMetrics object for the local node
//! and divides its usage by the capacity in the Node status.

use super::{
    parse_cpu_millicores, parse_memory_bytes, MetricsError, MetricsResult, UtilizationSource,
};
use crate::models::NodeUtilization;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::Value;
use tracing::debug;

const METRICS_GROUP: &str = "metrics.k8s.io";
const METRICS_VERSION: &str = "v1beta1";
const NODE_METRICS_KIND: &str = "NodeMetrics";
const NODE_METRICS_PLURAL: &str = "nodes";

/// CPU in millicores and memory in bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ResourceAmounts {
    pub cpu_millicores: f64,
    pub memory_bytes: f64,
}

/// Utilization source backed by the Kubernetes API
///
/// The client is shared read-only; nothing here mutates after construction.
#[derive(Clone)]
pub struct KubeMetricsSource {
    node_name: String,
    nodes: Api<Node>,
    node_metrics: Api<DynamicObject>,
}

impl KubeMetricsSource {
    pub fn new(client: Client, node_name: impl Into<String>) -> Self {
        let gvk = GroupVersionKind::gvk(METRICS_GROUP, METRICS_VERSION, NODE_METRICS_KIND);
        let resource = ApiResource::from_gvk_with_plural(&gvk, NODE_METRICS_PLURAL);

        Self {
            node_name: node_name.into(),
            nodes: Api::all(client.clone()),
            node_metrics: Api::all_with(client, &resource),
        }
    }

    /// Build from in-cluster configuration, falling back to the local kubeconfig
    pub async fn try_default(node_name: impl Into<String>) -> MetricsResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(MetricsError::Transport)?;
        Ok(Self::new(client, node_name))
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn usage(&self) -> MetricsResult<ResourceAmounts> {
        let metrics = self
            .node_metrics
            .get(&self.node_name)
            .await
            .map_err(|e| self.map_error(e, "node metrics"))?;
        usage_from_node_metrics(&metrics.data, &self.node_name)
    }

    async fn capacity(&self) -> MetricsResult<ResourceAmounts> {
        let node = self
            .nodes
            .get(&self.node_name)
            .await
            .map_err(|e| self.map_error(e, "node"))?;
        capacity_from_node(&node, &self.node_name)
    }

    fn map_error(&self, error: kube::Error, kind: &'static str) -> MetricsError {
        match error {
            kube::Error::Api(response) if response.code == 404 => MetricsError::NotFound {
                kind,
                node: self.node_name.clone(),
            },
            other => MetricsError::Transport(other),
        }
    }
}

#[async_trait]
impl UtilizationSource for KubeMetricsSource {
    async fn current_utilization(&self) -> MetricsResult<NodeUtilization> {
        let usage = self.usage().await?;
        let capacity = self.capacity().await?;

        debug!(
            node = %self.node_name,
            cpu_usage_millicores = usage.cpu_millicores,
            cpu_capacity_millicores = capacity.cpu_millicores,
            memory_usage_bytes = usage.memory_bytes,
            memory_capacity_bytes = capacity.memory_bytes,
            "Fetched node usage and capacity"
        );

        Ok(utilization_from(usage, capacity))
    }
}

/// Extract `usage.cpu` and `usage.memory` from a NodeMetrics payload
pub(crate) fn usage_from_node_metrics(data: &Value, node: &str) -> MetricsResult<ResourceAmounts> {
    let usage = &data["usage"];
    let field = |resource: &'static str| {
        usage[resource]
            .as_str()
            .ok_or_else(|| MetricsError::MissingUsage {
                node: node.to_string(),
                resource,
            })
    };

    Ok(ResourceAmounts {
        cpu_millicores: parse_cpu_millicores(field("cpu")?)?,
        memory_bytes: parse_memory_bytes(field("memory")?)?,
    })
}

/// Extract CPU and memory capacity from a Node's status
pub(crate) fn capacity_from_node(node: &Node, node_name: &str) -> MetricsResult<ResourceAmounts> {
    let capacity = node.status.as_ref().and_then(|s| s.capacity.as_ref());
    let quantity = |resource: &'static str| {
        capacity
            .and_then(|c| c.get(resource))
            .map(|q| q.0.as_str())
            .ok_or_else(|| MetricsError::MissingCapacity {
                node: node_name.to_string(),
                resource,
            })
    };

    let amounts = ResourceAmounts {
        cpu_millicores: parse_cpu_millicores(quantity("cpu")?)?,
        memory_bytes: parse_memory_bytes(quantity("memory")?)?,
    };

    if amounts.cpu_millicores <= 0.0 {
        return Err(MetricsError::MissingCapacity {
            node: node_name.to_string(),
            resource: "cpu",
        });
    }
    if amounts.memory_bytes <= 0.0 {
        return Err(MetricsError::MissingCapacity {
            node: node_name.to_string(),
            resource: "memory",
        });
    }

    Ok(amounts)
}

pub(crate) fn utilization_from(
    usage: ResourceAmounts,
    capacity: ResourceAmounts,
) -> NodeUtilization {
    NodeUtilization {
        cpu_percent: usage.cpu_millicores / capacity.cpu_millicores * 100.0,
        memory_percent: usage.memory_bytes / capacity.memory_bytes * 100.0,
    }
}
