//! Synthetic load pools
//!
//! Three independent pools raise node utilization on demand:
//! - CPU pool: blocking tasks burning cycles on cipher round trips
//! - Memory pool: one owned byte buffer kept resident by a toucher task
//! - Network pool: tasks pushing payloads over loopback TCP
//!
//! Each pool owns its state behind its own lock and exposes only
//! `scale_toward` and `stop_all`. No operation holds more than one pool
//! lock at a time.

mod cpu;
mod memory;
mod network;


pub use cpu::CpuPool;
pub use memory::MemoryPool;
pub use network::NetworkPool;

use crate::models::{PoolSnapshot, Resource};
use crate::policy::Adjustment;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BYTES_PER_MB: usize = 1024 * 1024;

/// Deadband around the CPU target, in percentage points
pub const CPU_DEADBAND: f64 = 10.0;

/// Deadband around the memory target, in percentage points
pub const MEMORY_DEADBAND: f64 = 10.0;

/// Deadband around the network reference, in Mbps
pub const NETWORK_DEADBAND: f64 = 5.0;

/// Hard cap on concurrent network units
pub const NETWORK_CAPACITY: usize = 5;

/// Result of a single `scale_toward` call, in the pool's native unit
/// (units for CPU/network, megabytes for memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    Unchanged,
    ScaledUp { from: usize, to: usize },
    ScaledDown { from: usize, to: usize },
}

impl ScaleOutcome {
    pub fn is_changed(&self) -> bool {
        !matches!(self, ScaleOutcome::Unchanged)
    }
}

/// A running load-generating task and the token that stops it
pub(crate) struct WorkerUnit {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerUnit {
    pub(crate) fn spawn<F>(spawn: F) -> Self
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let cancel = CancellationToken::new();
        let handle = spawn(cancel.clone());
        Self { cancel, handle }
    }
}

/// How many units a deviation translates into
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepRule {
    pub deadband: f64,
    pub up: fn(f64) -> usize,
    pub down: fn(f64) -> usize,
}

/// Counted pool of worker units, shared by the CPU and network pools
///
/// Units live in a stack so scale-down removes the most recently added
/// first. The unit count is the stack length.
pub(crate) struct UnitPool {
    resource: Resource,
    capacity: usize,
    rule: StepRule,
    units: Mutex<Vec<WorkerUnit>>,
}

impl UnitPool {
    pub(crate) fn new(resource: Resource, capacity: usize, rule: StepRule) -> Self {
        Self {
            resource,
            capacity,
            rule,
            units: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.units.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn scale_toward<F>(&self, target: f64, current: f64, spawn: F) -> ScaleOutcome
    where
        F: Fn(CancellationToken) -> JoinHandle<()>,
    {
        let diff = target - current;
        let mut units = self.units.lock();
        let from = units.len();

        if diff > self.rule.deadband && from < self.capacity {
            let add = (self.rule.up)(diff).min(self.capacity - from);
            for _ in 0..add {
                units.push(WorkerUnit::spawn(&spawn));
            }

            info!(
                resource = %self.resource,
                units = units.len(),
                current = current,
                target = target,
                "Scaled up load units"
            );
            return ScaleOutcome::ScaledUp {
                from,
                to: units.len(),
            };
        }

        if diff < -self.rule.deadband && from > 0 {
            let remove = (self.rule.down)(-diff).min(from);
            for _ in 0..remove {
                if let Some(unit) = units.pop() {
                    unit.cancel.cancel();
                }
            }

            info!(
                resource = %self.resource,
                units = units.len(),
                current = current,
                target = target,
                "Scaled down load units"
            );
            return ScaleOutcome::ScaledDown {
                from,
                to: units.len(),
            };
        }

        ScaleOutcome::Unchanged
    }

    /// Cancel every unit and wait for them until `deadline`
    ///
    /// Units still running at the deadline are detached, not killed.
    /// Returns `(stopped, abandoned)`.
    pub(crate) async fn stop_all(&self, deadline: Instant) -> (usize, usize) {
        let drained: Vec<WorkerUnit> = {
            let mut units = self.units.lock();
            units.drain(..).collect()
        };

        for unit in &drained {
            unit.cancel.cancel();
        }

        let mut stopped = 0;
        let mut abandoned = 0;
        for unit in drained {
            match tokio::time::timeout_at(deadline, unit.handle).await {
                Ok(Ok(())) => stopped += 1,
                Ok(Err(e)) => {
                    debug!(resource = %self.resource, error = %e, "Load unit exited abnormally");
                    stopped += 1;
                }
                Err(_) => abandoned += 1,
            }
        }

        if abandoned > 0 {
            warn!(
                resource = %self.resource,
                abandoned = abandoned,
                "Load units did not stop within the grace window"
            );
        }

        (stopped, abandoned)
    }
}

/// Summary of a graceful pool shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cpu_units_stopped: usize,
    pub network_units_stopped: usize,
    pub units_abandoned: usize,
    pub memory_released_bytes: usize,
}

/// The three load pools managed by the controller
pub struct LoadPools {
    cpu: CpuPool,
    memory: Arc<MemoryPool>,
    network: NetworkPool,
}

impl LoadPools {
    /// Pools sized for this machine with the given memory ceiling
    pub fn new(max_memory_mb: usize) -> Self {
        Self {
            cpu: CpuPool::new(),
            memory: Arc::new(MemoryPool::new(max_memory_mb)),
            network: NetworkPool::new(),
        }
    }

    /// Pools with explicit capacities
    pub fn with_capacities(
        cpu_capacity: usize,
        max_memory_mb: usize,
        network_capacity: usize,
    ) -> Self {
        Self {
            cpu: CpuPool::with_capacity(cpu_capacity),
            memory: Arc::new(MemoryPool::new(max_memory_mb)),
            network: NetworkPool::with_capacity(network_capacity),
        }
    }

    pub fn cpu(&self) -> &CpuPool {
        &self.cpu
    }

    pub fn memory(&self) -> &Arc<MemoryPool> {
        &self.memory
    }

    pub fn network(&self) -> &NetworkPool {
        &self.network
    }

    /// Route an adjustment to the pool it targets
    ///
    /// Memory growth allocates and fills on the blocking pool so the
    /// calling task's worker thread stays free.
    pub async fn apply(&self, adjustment: &Adjustment) -> ScaleOutcome {
        let (target, current) = (adjustment.target, adjustment.current);
        match adjustment.resource {
            Resource::Cpu => self.cpu.scale_toward(target, current),
            Resource::Memory => {
                let memory = Arc::clone(&self.memory);
                match tokio::task::spawn_blocking(move || memory.scale_toward(target, current))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(error = %e, "Memory adjustment task failed");
                        ScaleOutcome::Unchanged
                    }
                }
            }
            Resource::Network => self.network.scale_toward(target, current),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            cpu_units: self.cpu.count(),
            cpu_capacity: self.cpu.capacity(),
            network_units: self.network.count(),
            network_capacity: self.network.capacity(),
            memory_bytes: self.memory.allocated_bytes(),
            memory_max_bytes: self.memory.max_bytes(),
        }
    }

    /// Stop every unit within `grace` and release the memory buffer
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now() + grace;

        info!(units = self.cpu.count(), "Stopping CPU units");
        let (cpu_stopped, cpu_abandoned) = self.cpu.stop_all(deadline).await;

        info!(units = self.network.count(), "Stopping network units");
        let (network_stopped, network_abandoned) = self.network.stop_all(deadline).await;

        let released = self.memory.release();
        info!(
            released_mb = released / BYTES_PER_MB,
            "Released synthetic memory"
        );

        ShutdownReport {
            cpu_units_stopped: cpu_stopped,
            network_units_stopped: network_stopped,
            units_abandoned: cpu_abandoned + network_abandoned,
            memory_released_bytes: released,
        }
    }
}
