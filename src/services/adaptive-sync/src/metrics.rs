//! Metrics collection module for the adaptive sync service
//!
//! Prometheus collectors for:
//! - Operation admission and terminal outcomes per priority
//! - Network attempts and cache lookups
//! - Queue depth
//! - Latest sampled resource usage and health
//! - Sync outcomes

use crate::error::AdaptiveSyncResult;
use crate::models::Priority;
use crate::telemetry::ResourceReport;
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use tracing::info;

/// Metrics collector shared by the monitor, scheduler and coordinator
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Arc<Registry>,

    // Counters
    operations_total: IntCounterVec,
    attempts_total: IntCounterVec,
    cache_lookups_total: IntCounterVec,
    sync_total: IntCounterVec,

    // Gauges
    queue_depth: IntGaugeVec,
    resource_usage: GaugeVec,
    resource_healthy: IntGauge,

    // Histograms
    operation_duration: HistogramVec,
}

impl ServiceMetrics {
    /// Create a new metrics collector with its own registry
    pub fn new(namespace: &str) -> AdaptiveSyncResult<Self> {
        info!(namespace, "Initializing adaptive sync metrics");

        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "operations_total",
                "Network operations by lifecycle outcome",
            )
            .namespace(namespace),
            &["outcome", "priority"],
        )?;

        let attempts_total = IntCounterVec::new(
            Opts::new("attempts_total", "Network attempts made by the scheduler")
                .namespace(namespace),
            &["priority"],
        )?;

        let cache_lookups_total = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Response cache lookups").namespace(namespace),
            &["result"],
        )?;

        let sync_total = IntCounterVec::new(
            Opts::new("sync_total", "Snapshot synchronizations by outcome").namespace(namespace),
            &["outcome"],
        )?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("queue_depth", "Operations held by the scheduler").namespace(namespace),
            &["state"],
        )?;

        let resource_usage = GaugeVec::new(
            Opts::new("resource_usage", "Latest sampled resource usage").namespace(namespace),
            &["metric"],
        )?;

        let resource_healthy = IntGauge::with_opts(
            Opts::new(
                "resource_healthy",
                "1 when the latest sample is within every threshold",
            )
            .namespace(namespace),
        )?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "operation_duration_seconds",
                "Time from dispatch to terminal result",
            )
            .namespace(namespace)
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["priority", "status"],
        )?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(sync_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(resource_usage.clone()))?;
        registry.register(Box::new(resource_healthy.clone()))?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            operations_total,
            attempts_total,
            cache_lookups_total,
            sync_total,
            queue_depth,
            resource_usage,
            resource_healthy,
            operation_duration,
        })
    }

    /// Record an operation lifecycle outcome (enqueued, deferred, completed, failed, cancelled)
    pub fn record_operation(&self, outcome: &str, priority: Priority) {
        self.operations_total
            .with_label_values(&[outcome, priority.as_str()])
            .inc();
    }

    pub fn record_attempt(&self, priority: Priority) {
        self.attempts_total
            .with_label_values(&[priority.as_str()])
            .inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn record_sync(&self, outcome: &str) {
        self.sync_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_queue_depth(&self, ready: usize, deferred: usize, in_flight: usize) {
        self.queue_depth
            .with_label_values(&["ready"])
            .set(ready as i64);
        self.queue_depth
            .with_label_values(&["deferred"])
            .set(deferred as i64);
        self.queue_depth
            .with_label_values(&["in_flight"])
            .set(in_flight as i64);
    }

    pub fn record_resource_report(&self, report: &ResourceReport) {
        let sample = &report.sample;
        for (metric, value) in [
            ("cpu", sample.cpu_usage),
            ("memory", sample.memory_usage),
            ("battery_drain", sample.battery_drain_rate),
            ("temperature", sample.temperature),
        ] {
            self.resource_usage.with_label_values(&[metric]).set(value);
        }
        self.resource_healthy
            .set(if report.is_healthy() { 1 } else { 0 });
    }

    pub fn observe_operation_duration(&self, priority: Priority, status: &str, seconds: f64) {
        self.operation_duration
            .with_label_values(&[priority.as_str(), status])
            .observe(seconds);
    }

    /// Get Prometheus registry for an external exposition endpoint
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> AdaptiveSyncResult<String> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        Ok(encoder.encode_to_string(&metric_families)?)
    }
}
