//! Health check handlers for workers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::time::Instant;

use crate::metrics;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// This worker instance's id.
    pub worker_id: String,
    /// Process start time, for the uptime field.
    started_at: Instant,
}

impl HealthState {
    /// Create a new health state.
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            worker_id: worker_id.into(),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the worker started.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: &'static str,
    /// Seconds since startup.
    pub uptime: u64,
    /// Worker instance id.
    pub worker_id: String,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
/// Use this for Kubernetes liveness probes.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        uptime: state.uptime_secs(),
        worker_id: state.worker_id,
        name: state.app_name,
        version: state.app_version,
    })
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::get_metrics_handle() {
        Some(handle) => {
            let metrics_output = handle.render();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                metrics_output,
            )
                .into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a standard health router.
///
/// This creates an Axum router with standard endpoints:
/// - `/health` - Liveness probe
/// - `/healthz` - Liveness probe (K8s style)
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            uptime: 12,
            worker_id: "worker-1".to_string(),
            name: "image-worker".to_string(),
            version: "1.0.0".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime\":12"));
        assert!(json.contains("\"workerId\":\"worker-1\""));
    }

    #[tokio::test]
    async fn test_health_handler() {
        let state = HealthState::new("image-worker", "1.0.0", "worker-1");
        let Json(response) = health_handler(State(state)).await;

        assert_eq!(response.status, "healthy");
        assert_eq!(response.worker_id, "worker-1");
        assert_eq!(response.name, "image-worker");
    }
}
