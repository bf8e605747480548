//! # AI-CORE Adaptive Sync Service
//!
//! Resource-aware request scheduling and state synchronization for clients
//! that run on constrained devices.
//!
//! ## Features
//!
//! - **Resource telemetry**: periodic CPU, memory, battery drain and
//!   temperature sampling with threshold-based health classification
//! - **Priority scheduling**: strict priority ordering with FIFO within a
//!   class, bounded concurrency, per-attempt timeouts and retry budgets
//! - **Admission control**: deferrable work is held back under resource
//!   pressure and admitted again once health recovers
//! - **Response caching**: normalized request keys with a configurable
//!   freshness window
//! - **State synchronization**: a durable application snapshot with
//!   pending-operation replay and last-writer-wins reconciliation
//! - **Observability**: structured tracing and Prometheus metrics, served
//!   on `/metrics` next to `/health` when `observability.metrics_addr` is set.
//!   Embedders can read the registry through [`ServiceMetrics::registry`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use adaptive_sync::{AdaptiveSyncConfig, AdaptiveSyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdaptiveSyncConfig::from_env()?;
//!     let service = AdaptiveSyncService::new(config)?;
//!     service.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod service;
pub mod sync;
pub mod telemetry;

// Re-export main types for easier usage
pub use config::{
    AdaptiveSyncConfig, ObservabilityConfig, ResourceThresholds, SchedulerConfig, SyncConfig,
    TelemetryConfig,
};
pub use error::{AdaptiveSyncError, AdaptiveSyncResult};
pub use metrics::ServiceMetrics;
pub use models::{
    CachePolicy, HttpMethod, NetworkOperation, OperationStatus, Priority, RequestDescriptor,
    ResponsePayload,
};
pub use scheduler::{
    EnqueueOutcome, HttpTransport, OperationHandle, RequestScheduler, RetryStrategy,
    SchedulerStats, Transport,
};
pub use service::{AdaptiveSyncService, AppState};
pub use sync::{
    ApplicationStateSnapshot, CoordinatorState, FileSnapshotStore, LifecycleCoordinator,
    LifecycleEvent, MemorySnapshotStore, PendingOperation, ResourceHint, SnapshotStore,
    SyncOutcome, SyncResponse,
};
pub use telemetry::{
    HealthStatus, RawReading, ResourceMetric, ResourceMonitor, ResourceReport, ResourceSample,
    ResourceSampler, SysinfoSampler, ThresholdViolation,
};

/// Version information for the adaptive sync service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "adaptive-sync-service";
