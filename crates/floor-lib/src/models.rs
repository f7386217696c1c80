//! Core data models shared by the controller, policy and pools

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node resource the agent can generate synthetic load for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Network,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Network => "network",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node-level utilization as reported by the metrics collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeUtilization {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Everything the scaling policy looks at in one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    pub cpu_percent: f64,
    pub cpu_p95: f64,
    pub memory_percent: f64,
    pub network_mbps: f64,
}

/// Current size of every load pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub cpu_units: usize,
    pub cpu_capacity: usize,
    pub network_units: usize,
    pub network_capacity: usize,
    pub memory_bytes: usize,
    pub memory_max_bytes: usize,
}

impl PoolSnapshot {
    /// Synthetic memory currently held, in whole megabytes
    pub fn memory_mb(&self) -> usize {
        self.memory_bytes / crate::pools::BYTES_PER_MB
    }
}
