//! # Resource Monitor
//!
//! Owns the sampler and the periodic sampling loop, publishes every
//! completed [`ResourceReport`] on a `watch` channel and wakes registered
//! admission gates when health recovers.

use super::{RawReading, ResourceReport, ResourceSample, ResourceSampler};
use crate::config::{ResourceThresholds, TelemetryConfig};
use crate::metrics::ServiceMetrics;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something holding work deferred under resource pressure
pub trait AdmissionGate: Send + Sync {
    /// Admit deferred work after `report` came back healthy. Returns the
    /// number of operations admitted.
    fn resume_deferred(&self, report: &ResourceReport) -> usize;
}

/// Result of [`ResourceMonitor::process_queued_requests`]
#[derive(Debug, Clone)]
pub struct QueueEvaluation {
    pub report: ResourceReport,
    /// Operations admitted by the registered gates
    pub resumed: usize,
}

pub struct ResourceMonitor {
    config: TelemetryConfig,
    sampler: Mutex<Box<dyn ResourceSampler>>,
    latest: watch::Sender<Option<ResourceReport>>,
    gates: RwLock<Vec<Weak<dyn AdmissionGate>>>,
    sampling_task: Mutex<Option<CancellationToken>>,
    metrics: Option<Arc<ServiceMetrics>>,
    samples_taken: AtomicU64,
    failed_samples: AtomicU64,
}

impl ResourceMonitor {
    pub fn new(config: TelemetryConfig, sampler: Box<dyn ResourceSampler>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            config,
            sampler: Mutex::new(sampler),
            latest,
            gates: RwLock::new(Vec::new()),
            sampling_task: Mutex::new(None),
            metrics: None,
            samples_taken: AtomicU64::new(0),
            failed_samples: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn thresholds(&self) -> &ResourceThresholds {
        &self.config.thresholds
    }

    /// Begin periodic sampling. Returns false when already running.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut task = self.sampling_task.lock();
        if task.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return false;
        }

        let token = CancellationToken::new();
        *task = Some(token.clone());
        drop(task);

        let monitor = Arc::clone(self);
        let interval = self.config.sampling_interval();
        info!(interval_ms = interval.as_millis() as u64, "Starting resource monitoring");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.refresh().await;
                    }
                }
            }

            debug!("Resource sampling loop stopped");
        });

        true
    }

    /// Halt periodic sampling. Returns false when it was not running.
    pub fn stop_monitoring(&self) -> bool {
        match self.sampling_task.lock().take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                info!("Stopped resource monitoring");
                true
            }
            _ => false,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.sampling_task
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Latest completed report without sampling
    pub fn latest_report(&self) -> Option<ResourceReport> {
        self.latest.borrow().clone()
    }

    /// Latest report, sampling immediately if none exists yet
    pub fn get_resource_report(&self) -> ResourceReport {
        match self.latest_report() {
            Some(report) => report,
            None => self.sample_now(),
        }
    }

    /// Push-style health subscription
    pub fn subscribe(&self) -> watch::Receiver<Option<ResourceReport>> {
        self.latest.subscribe()
    }

    pub fn register_gate(&self, gate: Weak<dyn AdmissionGate>) {
        self.gates.write().push(gate);
    }

    pub fn samples_taken(&self) -> u64 {
        self.samples_taken.load(Ordering::Relaxed)
    }

    pub fn failed_samples(&self) -> u64 {
        self.failed_samples.load(Ordering::Relaxed)
    }

    /// Take one sample and publish it. A failed sampler call republishes
    /// nothing and returns the previous report.
    pub fn sample_now(&self) -> ResourceReport {
        // Holding the sampler lock serializes read-previous and publish.
        let mut sampler = self.sampler.lock();
        let previous = self.latest.borrow().clone();

        let reading = match sampler.sample() {
            Ok(reading) => reading,
            Err(e) => {
                self.failed_samples.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sampler = sampler.name(),
                    error = %e,
                    "Resource sample failed, keeping previous sample"
                );
                match previous {
                    Some(report) => return report,
                    None => RawReading::default(),
                }
            }
        };

        let sample = ResourceSample::from_reading(
            &reading,
            previous.as_ref().map(|report| &report.sample),
            Utc::now(),
        );
        let report = ResourceReport::new(sample, &self.config.thresholds);
        self.samples_taken.fetch_add(1, Ordering::Relaxed);

        self.log_report(previous.as_ref(), &report);
        if let Some(metrics) = &self.metrics {
            metrics.record_resource_report(&report);
        }

        self.latest.send_replace(Some(report.clone()));
        report
    }

    /// [`Self::process_queued_requests`] on the blocking pool. Sampler
    /// refreshes block on procfs and hwmon reads.
    pub async fn refresh(self: &Arc<Self>) -> QueueEvaluation {
        let monitor = Arc::clone(self);
        match tokio::task::spawn_blocking(move || monitor.process_queued_requests()).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(error = %e, "Sampling task failed");
                QueueEvaluation {
                    report: self.get_resource_report(),
                    resumed: 0,
                }
            }
        }
    }

    /// Re-sample and, when healthy, let every registered gate admit its
    /// deferred work.
    pub fn process_queued_requests(&self) -> QueueEvaluation {
        let report = self.sample_now();
        if !report.is_healthy() {
            debug!(
                violations = ?report.health.violated_metrics(),
                "Still under resource pressure, deferred work stays deferred"
            );
            return QueueEvaluation { report, resumed: 0 };
        }

        let gates: Vec<Arc<dyn AdmissionGate>> = {
            let mut gates = self.gates.write();
            gates.retain(|gate| gate.strong_count() > 0);
            gates.iter().filter_map(Weak::upgrade).collect()
        };

        let resumed: usize = gates
            .iter()
            .map(|gate| gate.resume_deferred(&report))
            .sum();

        if resumed > 0 {
            info!(resumed, "Resources healthy, resumed deferred operations");
        }
        QueueEvaluation { report, resumed }
    }

    fn log_report(&self, previous: Option<&ResourceReport>, report: &ResourceReport) {
        let sample = &report.sample;
        debug!(
            cpu = sample.cpu_usage,
            memory = sample.memory_usage,
            battery_drain = sample.battery_drain_rate,
            temperature = sample.temperature,
            healthy = report.is_healthy(),
            "Resource sample"
        );

        let Some(previous) = previous else {
            return;
        };

        let spike = self.config.spike_delta;
        if sample.cpu_usage - previous.sample.cpu_usage > spike {
            warn!(
                from = previous.sample.cpu_usage,
                to = sample.cpu_usage,
                "CPU usage spike detected"
            );
        }
        if sample.memory_usage - previous.sample.memory_usage > spike {
            warn!(
                from = previous.sample.memory_usage,
                to = sample.memory_usage,
                "Memory usage spike detected"
            );
        }

        match (previous.is_healthy(), report.is_healthy()) {
            (true, false) => {
                let violations: Vec<String> = report
                    .health
                    .violations
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                warn!(violations = ?violations, "Resource thresholds exceeded");
            }
            (false, true) => info!("Resource usage back within thresholds"),
            _ => {}
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(token) = self.sampling_task.get_mut().take() {
            token.cancel();
        }
    }
}
