//! Service composition for the AI-CORE Adaptive Sync Service
//!
//! Builds the resource monitor, request scheduler and lifecycle coordinator,
//! wires them to each other explicitly and ties their background tasks to
//! the service lifetime.

use crate::config::AdaptiveSyncConfig;
use crate::error::{AdaptiveSyncError, AdaptiveSyncResult};
use crate::handlers::create_routes;
use crate::metrics::ServiceMetrics;
use crate::scheduler::{HttpTransport, RequestScheduler, Transport};
use crate::sync::{FileSnapshotStore, LifecycleCoordinator, SnapshotStore};
use crate::telemetry::{ResourceMonitor, ResourceSampler, SysinfoSampler};
use axum::serve;
use parking_lot::Mutex;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Components shared with the HTTP handlers
pub struct AppState {
    pub metrics: Arc<ServiceMetrics>,
    pub monitor: Arc<ResourceMonitor>,
    pub scheduler: Arc<RequestScheduler>,
    pub coordinator: Arc<LifecycleCoordinator>,
}

impl AppState {
    /// Point-in-time view of every component
    pub fn diagnostics(&self) -> serde_json::Value {
        let snapshot = self.coordinator.snapshot();
        json!({
            "service": crate::SERVICE_NAME,
            "version": crate::VERSION,
            "coordinator": {
                "state": self.coordinator.state(),
                "online": self.coordinator.is_online(),
                "unpersisted_changes": self.coordinator.has_unpersisted_changes(),
                "pending_operations": snapshot.pending_operations.len(),
                "last_sync_date": snapshot.last_sync_date,
            },
            "telemetry": {
                "monitoring": self.monitor.is_monitoring(),
                "samples_taken": self.monitor.samples_taken(),
                "failed_samples": self.monitor.failed_samples(),
                "latest": self.monitor.latest_report().map(|report| json!({
                    "sample": report.sample,
                    "healthy": report.is_healthy(),
                    "violations": report.health.violated_metrics(),
                })),
            },
            "scheduler": self.scheduler.diagnostics(),
        })
    }
}

/// Main adaptive sync service
pub struct AdaptiveSyncService {
    config: AdaptiveSyncConfig,
    state: Arc<AppState>,
    metrics_server: Mutex<Option<(SocketAddr, CancellationToken)>>,
}

impl AdaptiveSyncService {
    /// Create the service with the device sampler, HTTP transport and file store
    pub fn new(config: AdaptiveSyncConfig) -> AdaptiveSyncResult<Self> {
        let transport = HttpTransport::new(&config.scheduler.user_agent)?;
        let store = FileSnapshotStore::new(&config.sync.state_dir, &config.sync.state_key);
        info!(path = %store.path().display(), "Using file snapshot store");

        Self::with_components(
            config,
            Box::new(SysinfoSampler::new()),
            Arc::new(transport),
            Arc::new(store),
        )
    }

    /// Create the service around caller-supplied collaborators
    pub fn with_components(
        config: AdaptiveSyncConfig,
        sampler: Box<dyn ResourceSampler>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SnapshotStore>,
    ) -> AdaptiveSyncResult<Self> {
        info!("Initializing AI-CORE Adaptive Sync Service");

        config.validate().map_err(AdaptiveSyncError::configuration)?;

        let metrics = Arc::new(ServiceMetrics::new(&config.observability.metrics_namespace)?);

        let monitor = Arc::new(
            ResourceMonitor::new(config.telemetry.clone(), sampler).with_metrics(metrics.clone()),
        );

        let scheduler = RequestScheduler::new(
            config.scheduler.clone(),
            transport,
            monitor.clone(),
            Some(metrics.clone()),
        );

        let coordinator = Arc::new(
            LifecycleCoordinator::new(
                config.sync.clone(),
                scheduler.clone(),
                monitor.clone(),
                store,
            )
            .with_metrics(metrics.clone()),
        );

        Ok(Self {
            config,
            state: Arc::new(AppState {
                metrics,
                monitor,
                scheduler,
                coordinator,
            }),
            metrics_server: Mutex::new(None),
        })
    }

    /// Start sampling, dispatching and health watching
    pub async fn start(&self) -> AdaptiveSyncResult<()> {
        info!(
            sampling_interval_ms = self.config.telemetry.sampling_interval_ms,
            max_concurrent = self.config.scheduler.max_concurrent,
            endpoint = %self.config.sync.endpoint,
            "Starting AI-CORE Adaptive Sync Service"
        );

        if let Some(addr) = &self.config.observability.metrics_addr {
            self.start_metrics_server(addr).await?;
        }

        self.state.scheduler.start();
        self.state.coordinator.start().await;
        self.state.monitor.start_monitoring();
        Ok(())
    }

    /// Serve the HTTP routes on `addr` until shutdown
    async fn start_metrics_server(&self, addr: &str) -> AdaptiveSyncResult<()> {
        if self.metrics_server.lock().is_some() {
            return Ok(());
        }

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            AdaptiveSyncError::configuration(format!("Failed to bind metrics listener on {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        let token = CancellationToken::new();
        *self.metrics_server.lock() = Some((local_addr, token.clone()));

        let app = create_routes(self.state.clone());
        tokio::spawn(async move {
            if let Err(e) = serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!("Metrics server error: {}", e);
            }
        });

        info!(addr = %local_addr, "Metrics endpoint listening");
        Ok(())
    }

    /// Address the metrics endpoint is bound to, once started
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_server.lock().as_ref().map(|(addr, _)| *addr)
    }

    /// Stop every background task and persist the snapshot
    pub async fn shutdown(&self) {
        info!("Shutting down AI-CORE Adaptive Sync Service");
        if let Some((_, token)) = self.metrics_server.lock().take() {
            token.cancel();
        }
        self.state.monitor.stop_monitoring();
        self.state.coordinator.shutdown().await;
        self.state.scheduler.stop().await;
    }

    /// Start, wait for Ctrl+C or SIGTERM, then shut down
    pub async fn run_until_signal(&self) -> AdaptiveSyncResult<()> {
        self.start().await?;
        Self::shutdown_signal().await;
        self.shutdown().await;
        Ok(())
    }

    pub fn config(&self) -> &AdaptiveSyncConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        self.state.metrics.clone()
    }

    pub fn monitor(&self) -> Arc<ResourceMonitor> {
        self.state.monitor.clone()
    }

    pub fn scheduler(&self) -> Arc<RequestScheduler> {
        self.state.scheduler.clone()
    }

    pub fn coordinator(&self) -> Arc<LifecycleCoordinator> {
        self.state.coordinator.clone()
    }

    pub fn diagnostics(&self) -> serde_json::Value {
        self.state.diagnostics()
    }

    /// Wait for shutdown signal
    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = terminate => {
                info!("Received terminate signal, shutting down");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CoordinatorState;

    #[tokio::test]
    async fn test_service_creation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AdaptiveSyncConfig::default();
        config.sync.state_dir = dir.path().to_path_buf();

        let service = AdaptiveSyncService::new(config).unwrap();
        let diagnostics = service.diagnostics();
        assert_eq!(diagnostics["service"], crate::SERVICE_NAME);
        assert_eq!(diagnostics["coordinator"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = AdaptiveSyncConfig::default();
        config.scheduler.max_concurrent = 0;

        let result = AdaptiveSyncService::new(config);
        assert!(matches!(
            result,
            Err(AdaptiveSyncError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_and_shutdown_persist_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AdaptiveSyncConfig::default();
        config.sync.state_dir = dir.path().to_path_buf();

        let service = AdaptiveSyncService::new(config).unwrap();
        service.start().await.unwrap();
        assert!(service.monitor().is_monitoring());

        service.coordinator().select_routine("r-9").await;
        service.shutdown().await;

        assert!(!service.monitor().is_monitoring());
        assert_ne!(service.coordinator().state(), CoordinatorState::Syncing);
        assert!(dir.path().join("app_state.json").exists());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AdaptiveSyncConfig::default();
        config.sync.state_dir = dir.path().to_path_buf();
        config.observability.metrics_addr = Some("127.0.0.1:0".to_string());

        let service = AdaptiveSyncService::new(config).unwrap();
        assert_eq!(service.metrics_addr(), None);
        service.start().await.unwrap();

        let addr = service.metrics_addr().unwrap();
        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("adaptive_sync_resource_healthy"));

        service.shutdown().await;
        assert_eq!(service.metrics_addr(), None);
    }
}
