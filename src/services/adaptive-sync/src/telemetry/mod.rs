//! # Resource Telemetry
//!
//! Periodic sampling of device resource usage (processor load, memory,
//! battery drain and temperature) and the health classification derived from
//! it. The monitor is the only producer of [`ResourceSample`]s; everything
//! else reads the latest completed sample.

pub mod monitor;
pub mod sampler;

pub use monitor::{AdmissionGate, QueueEvaluation, ResourceMonitor};
pub use sampler::{
    BatteryLevelSource, DrainRateEstimator, RawReading, ResourceSampler, SysinfoSampler,
};

use crate::config::ResourceThresholds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric tracked by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMetric {
    Cpu,
    Memory,
    BatteryDrain,
    Temperature,
}

impl ResourceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceMetric::Cpu => "cpu",
            ResourceMetric::Memory => "memory",
            ResourceMetric::BatteryDrain => "battery_drain",
            ResourceMetric::Temperature => "temperature",
        }
    }
}

impl fmt::Display for ResourceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of device resource usage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    /// Processor usage, 0-100
    pub cpu_usage: f64,
    /// Memory usage, 0-100
    pub memory_usage: f64,
    /// Battery drain in percent per hour, never negative
    pub battery_drain_rate: f64,
    /// Device-relative temperature, never negative
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceSample {
    /// Build a sample from a reading. Metrics missing from the reading keep
    /// the value of `previous`; with no previous sample they read as 0.
    pub fn from_reading(
        reading: &RawReading,
        previous: Option<&ResourceSample>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let carry = |value: Option<f64>, last: fn(&ResourceSample) -> f64| {
            value
                .filter(|v| v.is_finite())
                .or_else(|| previous.map(last))
                .unwrap_or(0.0)
        };

        Self {
            cpu_usage: carry(reading.cpu_usage, |s| s.cpu_usage).clamp(0.0, 100.0),
            memory_usage: carry(reading.memory_usage, |s| s.memory_usage).clamp(0.0, 100.0),
            battery_drain_rate: carry(reading.battery_drain_rate, |s| s.battery_drain_rate)
                .max(0.0),
            temperature: carry(reading.temperature, |s| s.temperature).max(0.0),
            timestamp,
        }
    }

    pub fn value(&self, metric: ResourceMetric) -> f64 {
        match metric {
            ResourceMetric::Cpu => self.cpu_usage,
            ResourceMetric::Memory => self.memory_usage,
            ResourceMetric::BatteryDrain => self.battery_drain_rate,
            ResourceMetric::Temperature => self.temperature,
        }
    }

    /// Classify the sample. A single metric at or above its ceiling is enough
    /// to make the whole sample unhealthy.
    pub fn health(&self, thresholds: &ResourceThresholds) -> HealthStatus {
        let ceilings = [
            (ResourceMetric::Cpu, thresholds.cpu),
            (ResourceMetric::Memory, thresholds.memory),
            (ResourceMetric::BatteryDrain, thresholds.battery_drain),
            (ResourceMetric::Temperature, thresholds.temperature),
        ];

        let violations: Vec<ThresholdViolation> = ceilings
            .into_iter()
            .filter_map(|(metric, threshold)| {
                let value = self.value(metric);
                (value >= threshold).then_some(ThresholdViolation {
                    metric,
                    value,
                    threshold,
                })
            })
            .collect();

        HealthStatus {
            healthy: violations.is_empty(),
            violations,
        }
    }
}

/// A metric that reached its configured ceiling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub metric: ResourceMetric,
    pub value: f64,
    pub threshold: f64,
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:.1} (limit {:.1})", self.metric, self.value, self.threshold)
    }
}

/// Health classification derived from a sample; never stored on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub violations: Vec<ThresholdViolation>,
}

impl HealthStatus {
    pub fn is_violated(&self, metric: ResourceMetric) -> bool {
        self.violations.iter().any(|v| v.metric == metric)
    }

    pub fn violated_metrics(&self) -> Vec<ResourceMetric> {
        self.violations.iter().map(|v| v.metric).collect()
    }
}

/// Latest sample together with its health classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub sample: ResourceSample,
    pub health: HealthStatus,
}

impl ResourceReport {
    pub fn new(sample: ResourceSample, thresholds: &ResourceThresholds) -> Self {
        let health = sample.health(thresholds);
        Self { sample, health }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.healthy
    }
}
