//! Health tracking for liveness and readiness checks
//!
//! Components report success or failure as the controller runs. A read
//! failure only ever degrades its component, however often it repeats;
//! unhealthy is reserved for components that have stopped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    fn failing(status: ComponentStatus, message: String, consecutive_failures: u32) -> Self {
        Self {
            status,
            message: Some(message),
            consecutive_failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names
pub mod components {
    pub const CONTROLLER: &str = "controller";
    pub const METRICS_SOURCE: &str = "metrics_source";
    pub const NETWORK_STATS: &str = "network_stats";
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn register(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn record_success(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Count a failed read and mark the component degraded
    ///
    /// Never escalates to unhealthy: a failing read is survivable, and the
    /// controller keeps running through it.
    pub async fn record_degraded(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let failures = components
            .get(name)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
            .saturating_add(1);

        components.insert(
            name.to_string(),
            ComponentHealth::failing(ComponentStatus::Degraded, message.into(), failures),
        );
    }

    /// Mark a component unhealthy regardless of its failure count
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let failures = components
            .get(name)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0);
        components.insert(
            name.to_string(),
            ComponentHealth::failing(ComponentStatus::Unhealthy, message.into(), failures),
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("Controller not running".to_string())
        } else if health.status == ComponentStatus::Unhealthy {
            Some("Component unhealthy".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_failure_degrades_component() {
        let registry = HealthRegistry::new();
        registry.register(components::METRICS_SOURCE).await;

        registry
            .record_degraded(components::METRICS_SOURCE, "node metrics not found")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::METRICS_SOURCE].consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_repeated_failures_stay_degraded_and_ready() {
        let registry = HealthRegistry::new();
        registry.register(components::NETWORK_STATS).await;
        registry.set_ready(true).await;

        for _ in 0..50 {
            registry
                .record_degraded(components::NETWORK_STATS, "interface eth9 not present")
                .await;
        }

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::NETWORK_STATS].consecutive_failures,
            50
        );
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let registry = HealthRegistry::new();
        registry.register(components::NETWORK_STATS).await;

        registry.record_degraded(components::NETWORK_STATS, "eth0 missing").await;
        registry.record_degraded(components::NETWORK_STATS, "eth0 missing").await;
        registry.record_success(components::NETWORK_STATS).await;
        registry.record_degraded(components::NETWORK_STATS, "eth0 missing").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::NETWORK_STATS].consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_ready_once_set() {
        let registry = HealthRegistry::new();
        registry.register(components::CONTROLLER).await;
        registry.set_ready(true).await;

        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_set_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::CONTROLLER).await;
        registry.set_unhealthy(components::CONTROLLER, "stopped").await;

        assert!(!registry.health().await.status.is_operational());
    }
}
