//! Configuration module for the AI-CORE Adaptive Sync Service
//!
//! Thresholds, intervals and limits are all configuration so they can be tuned
//! per device class; the defaults below match the reference device profile.

use crate::models::Priority;
use crate::scheduler::retry::RetryStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Main configuration structure for the Adaptive Sync Service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSyncConfig {
    /// Resource telemetry configuration
    pub telemetry: TelemetryConfig,
    /// Request scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Lifecycle and sync configuration
    pub sync: SyncConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

/// Resource telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sampling interval in milliseconds (default: 5000)
    pub sampling_interval_ms: u64,
    /// Change between two ticks that is reported as a spike (default: 20 points)
    pub spike_delta: f64,
    /// Per-metric health ceilings
    pub thresholds: ResourceThresholds,
}

/// Independent ceiling per metric; reaching any ceiling makes a sample unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    /// CPU usage ceiling in percent
    pub cpu: f64,
    /// Memory usage ceiling in percent
    pub memory: f64,
    /// Battery drain ceiling in percent per hour
    pub battery_drain: f64,
    /// Temperature ceiling in device units
    pub temperature: f64,
}

/// Request scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum operations executing at the same time
    pub max_concurrent: usize,
    /// Maximum operations waiting in the queue
    pub max_queue_size: usize,
    /// Maximum age of a fresh cached response in seconds
    pub cache_max_age_secs: u64,
    /// Interval between stale cache purges in seconds. Stale entries are
    /// kept until an explicit purge when unset.
    pub cache_purge_interval_secs: Option<u64>,
    /// Operations strictly below this priority are deferred while unhealthy
    pub admission_threshold: Priority,
    /// Delay schedule between attempts
    pub retry_strategy: RetryStrategy,
    /// User agent sent by the HTTP transport
    pub user_agent: String,
}

/// Lifecycle and sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote endpoint receiving snapshots
    pub endpoint: String,
    /// Directory holding the persisted snapshot
    pub state_dir: PathBuf,
    /// Stable key the snapshot is stored under
    pub state_key: String,
    /// Age after which data is considered stale on foreground
    pub staleness_window_secs: u64,
    /// Per-attempt timeout for the sync call
    pub sync_timeout_ms: u64,
    /// Additional attempts for the sync call
    pub sync_retry_count: u32,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (json, pretty, compact)
    pub log_format: String,
    /// Prometheus metric namespace
    pub metrics_namespace: String,
    /// `host:port` serving `/metrics` and the health routes. Unset disables
    /// the listener.
    pub metrics_addr: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 5_000,
            spike_delta: 20.0,
            thresholds: ResourceThresholds::default(),
        }
    }
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu: 80.0,
            memory: 80.0,
            battery_drain: 5.0,
            temperature: 40.0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queue_size: 1_000,
            cache_max_age_secs: 300,
            cache_purge_interval_secs: None,
            admission_threshold: Priority::High,
            retry_strategy: RetryStrategy::default(),
            user_agent: format!("AI-CORE-Adaptive-Sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/v1/state/sync".to_string(),
            state_dir: PathBuf::from("./data"),
            state_key: "app_state".to_string(),
            staleness_window_secs: 900,
            sync_timeout_ms: 15_000,
            sync_retry_count: 2,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            metrics_namespace: "adaptive_sync".to_string(),
            metrics_addr: None,
        }
    }
}

impl TelemetryConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

impl SchedulerConfig {
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    pub fn cache_purge_interval(&self) -> Option<Duration> {
        self.cache_purge_interval_secs.map(Duration::from_secs)
    }
}

impl SyncConfig {
    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

impl AdaptiveSyncConfig {
    /// Load configuration from defaults, an optional file and environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&AdaptiveSyncConfig::default())?;
        let mut cfg = config::Config::builder().add_source(defaults);

        // Load from optional config file
        if let Ok(config_path) = std::env::var("ADAPTIVE_SYNC_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_path).required(false));
        }

        cfg = cfg.add_source(
            config::Environment::with_prefix("ADAPTIVE_SYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        cfg.build()?.try_deserialize()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.telemetry.sampling_interval_ms == 0 {
            return Err("Telemetry sampling interval cannot be 0".to_string());
        }

        let thresholds = &self.telemetry.thresholds;
        for (name, value) in [("cpu", thresholds.cpu), ("memory", thresholds.memory)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!(
                    "{} threshold must be between 0 and 100, got {}",
                    name, value
                ));
            }
        }
        if thresholds.battery_drain < 0.0 || thresholds.temperature < 0.0 {
            return Err("Battery drain and temperature thresholds cannot be negative".to_string());
        }

        if self.scheduler.max_concurrent == 0 {
            return Err("Scheduler concurrency limit cannot be 0".to_string());
        }
        if self.scheduler.max_queue_size == 0 {
            return Err("Scheduler queue size cannot be 0".to_string());
        }
        if self.scheduler.cache_purge_interval_secs == Some(0) {
            return Err("Cache purge interval cannot be 0".to_string());
        }

        if self.sync.state_key.trim().is_empty() {
            return Err("Sync state key cannot be empty".to_string());
        }
        if self.sync.sync_timeout_ms == 0 {
            return Err("Sync timeout cannot be 0".to_string());
        }

        if self
            .observability
            .metrics_addr
            .as_ref()
            .is_some_and(|addr| addr.trim().is_empty())
        {
            return Err("Metrics address cannot be empty".to_string());
        }

        Url::parse(&self.sync.endpoint).map_err(|e| format!("Invalid sync endpoint URL: {}", e))?;

        Ok(())
    }
}
