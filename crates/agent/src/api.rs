//! HTTP API for health checks, Prometheus metrics and pool status

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use floor_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AgentMetrics,
    LoadPools, PercentileTracker, PoolSnapshot,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub node_name: String,
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    pub pools: Arc<LoadPools>,
    pub tracker: Arc<PercentileTracker>,
}

impl AppState {
    pub fn new(
        node_name: impl Into<String>,
        health_registry: HealthRegistry,
        metrics: AgentMetrics,
        pools: Arc<LoadPools>,
        tracker: Arc<PercentileTracker>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            health_registry,
            metrics,
            pools,
            tracker,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    node: String,
    cpu_p95: f64,
    cpu_samples: usize,
    memory_mb: usize,
    pools: PoolSnapshot,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the controller is running
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Pool sizes move between ticks; refresh them at scrape time
    state.metrics.set_pools(&state.pools.snapshot());

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Current pool sizes and CPU 95th percentile
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pools = state.pools.snapshot();

    Json(StatusResponse {
        node: state.node_name.clone(),
        cpu_p95: state.tracker.percentile95(),
        cpu_samples: state.tracker.len(),
        memory_mb: pools.memory_mb(),
        pools,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use floor_lib::health::components;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            "test-node",
            HealthRegistry::new(),
            AgentMetrics::new(),
            Arc::new(LoadPools::with_capacities(2, 16, 5)),
            Arc::new(PercentileTracker::default()),
        ))
    }

    async fn get_status(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_healthz_returns_200_when_healthy() {
        let state = test_state();
        state.health_registry.register(components::CONTROLLER).await;

        let (status, _) = get_status(create_router(state), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_healthz_returns_200_when_degraded() {
        let state = test_state();
        state
            .health_registry
            .record_degraded(components::METRICS_SOURCE, "node metrics not found")
            .await;

        let (status, body) = get_status(create_router(state), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn test_healthz_returns_503_when_unhealthy() {
        let state = test_state();
        state
            .health_registry
            .set_unhealthy(components::CONTROLLER, "controller stopped")
            .await;

        let (status, _) = get_status(create_router(state), "/healthz").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_before_and_after_start() {
        let state = test_state();

        let (status, _) = get_status(create_router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.health_registry.set_ready(true).await;
        let (status, _) = get_status(create_router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_pool_gauges() {
        let (status, body) = get_status(create_router(test_state()), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("floor_agent_cpu_units"));
    }

    #[tokio::test]
    async fn test_status_reports_pools_and_p95() {
        let state = test_state();
        for value in [10.0, 20.0, 30.0] {
            state.tracker.add_sample(value);
        }

        let (status, body) = get_status(create_router(state), "/status").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["node"], "test-node");
        assert_eq!(json["cpu_p95"], 30.0);
        assert_eq!(json["cpu_samples"], 3);
        assert_eq!(json["pools"]["cpu_units"], 0);
        assert_eq!(json["pools"]["network_capacity"], 5);
    }
}
