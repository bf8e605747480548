//! HTTP handlers for the AI-CORE Adaptive Sync Service
//!
//! Health probes, a diagnostics view and the Prometheus scrape endpoint.

use crate::service::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

/// Create all routes for the adaptive sync service
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/diagnostics", get(diagnostics))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Resource health and coordinator state. Degraded resources answer 503.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Health check requested");

    let report = state.monitor.latest_report();
    let healthy = report.as_ref().map_or(true, |report| report.is_healthy());
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "coordinator": state.coordinator.state(),
            "violations": report
                .map(|report| report.health.violated_metrics())
                .unwrap_or_default(),
        })),
    )
}

async fn liveness_check() -> impl IntoResponse {
    Json(json!({
        "status": "alive",
        "version": crate::VERSION,
    }))
}

async fn diagnostics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.diagnostics())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            text,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, SyncConfig, TelemetryConfig};
    use crate::metrics::ServiceMetrics;
    use crate::models::{RequestDescriptor, ResponsePayload};
    use crate::scheduler::{RequestScheduler, Transport};
    use crate::sync::{LifecycleCoordinator, MemorySnapshotStore};
    use crate::telemetry::{RawReading, ResourceMonitor, ResourceSampler};
    use crate::AdaptiveSyncResult;
    use async_trait::async_trait;
    use axum_test::TestServer;
    use serde_json::Value;

    struct FixedSampler(f64);

    impl ResourceSampler for FixedSampler {
        fn sample(&mut self) -> AdaptiveSyncResult<RawReading> {
            Ok(RawReading {
                cpu_usage: Some(self.0),
                memory_usage: Some(30.0),
                battery_drain_rate: Some(1.0),
                temperature: Some(25.0),
            })
        }
    }

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn execute(&self, _request: &RequestDescriptor) -> AdaptiveSyncResult<ResponsePayload> {
            Ok(ResponsePayload::new(204, ""))
        }
    }

    fn create_test_state(cpu: f64) -> Arc<AppState> {
        let metrics = Arc::new(ServiceMetrics::new("adaptive_sync_handlers").unwrap());
        let monitor = Arc::new(
            ResourceMonitor::new(TelemetryConfig::default(), Box::new(FixedSampler(cpu)))
                .with_metrics(metrics.clone()),
        );
        let scheduler = RequestScheduler::new(
            SchedulerConfig::default(),
            Arc::new(NoopTransport),
            monitor.clone(),
            Some(metrics.clone()),
        );
        let coordinator = Arc::new(LifecycleCoordinator::new(
            SyncConfig::default(),
            scheduler.clone(),
            monitor.clone(),
            Arc::new(MemorySnapshotStore::new()),
        ));
        monitor.sample_now();

        Arc::new(AppState {
            metrics,
            monitor,
            scheduler,
            coordinator,
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = TestServer::new(create_routes(create_test_state(20.0))).unwrap();

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), 200);

        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["coordinator"], "idle");
    }

    #[tokio::test]
    async fn test_health_check_reports_pressure() {
        let server = TestServer::new(create_routes(create_test_state(95.0))).unwrap();

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), 503);

        let body: Value = response.json();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["violations"][0], "cpu");
    }

    #[tokio::test]
    async fn test_liveness_check() {
        let server = TestServer::new(create_routes(create_test_state(20.0))).unwrap();

        let body: Value = server.get("/health/live").await.json();
        assert_eq!(body["status"], "alive");
    }

    #[tokio::test]
    async fn test_diagnostics() {
        let server = TestServer::new(create_routes(create_test_state(20.0))).unwrap();

        let body: Value = server.get("/diagnostics").await.json();
        assert_eq!(body["service"], crate::SERVICE_NAME);
        assert_eq!(body["telemetry"]["samples_taken"], 1);
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let server = TestServer::new(create_routes(create_test_state(85.0))).unwrap();

        let response = server.get("/metrics").await;
        assert_eq!(response.status_code(), 200);

        let text = response.text();
        assert!(text.contains("adaptive_sync_handlers_resource_usage{metric=\"cpu\"} 85"));
        assert!(text.contains("adaptive_sync_handlers_resource_healthy 0"));
    }
}
