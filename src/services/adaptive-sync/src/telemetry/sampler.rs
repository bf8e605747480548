//! Resource samplers feeding the monitor.

use crate::error::{AdaptiveSyncError, AdaptiveSyncResult};
use std::time::Instant;
use sysinfo::{Components, System};
use tracing::debug;

/// One raw reading. A `None` metric could not be read this time and keeps
/// its previous value in the published sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawReading {
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub battery_drain_rate: Option<f64>,
    pub temperature: Option<f64>,
}

/// Source of raw device readings
pub trait ResourceSampler: Send {
    /// Take one reading. An error means nothing could be read at all.
    fn sample(&mut self) -> AdaptiveSyncResult<RawReading>;

    fn name(&self) -> &str {
        "sampler"
    }
}

/// Battery charge level in percent (0-100), `None` when unavailable
pub trait BatteryLevelSource: Send {
    fn battery_level(&mut self) -> Option<f64>;
}

/// Derives a drain rate in percent per hour from successive battery levels.
#[derive(Debug, Default, Clone)]
pub struct DrainRateEstimator {
    last: Option<(f64, Instant)>,
}

impl DrainRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one level reading. Returns `None` until two readings some time
    /// apart exist. Charging reads as a drain of 0.
    pub fn observe(&mut self, level: f64, at: Instant) -> Option<f64> {
        let previous = self.last.replace((level, at));
        let (last_level, last_at) = previous?;

        let hours = at.checked_duration_since(last_at)?.as_secs_f64() / 3600.0;
        if hours <= 0.0 {
            return None;
        }

        Some(((last_level - level) / hours).max(0.0))
    }
}

/// Sampler backed by the `sysinfo` crate.
pub struct SysinfoSampler {
    system: System,
    battery: Option<(Box<dyn BatteryLevelSource>, DrainRateEstimator)>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // The first CPU reading is relative to this refresh
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system,
            battery: None,
        }
    }

    pub fn with_battery_source(mut self, source: Box<dyn BatteryLevelSource>) -> Self {
        self.battery = Some((source, DrainRateEstimator::new()));
        self
    }

    fn hottest_core_temperature() -> Option<f64> {
        let components = Components::new_with_refreshed_list();
        let mut hottest: Option<f64> = None;

        for component in &components {
            let label = component.label().to_lowercase();
            if !(label.contains("cpu") || label.contains("core") || label.contains("package")) {
                continue;
            }
            if let Some(temp) = component.temperature() {
                let temp = f64::from(temp);
                hottest = Some(hottest.map_or(temp, |h| h.max(temp)));
            }
        }

        hottest
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self) -> AdaptiveSyncResult<RawReading> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total_memory = self.system.total_memory();
        if total_memory == 0 && self.system.cpus().is_empty() {
            return Err(AdaptiveSyncError::sampling(
                "system information is unavailable on this platform",
            ));
        }

        let cpu_usage = Some(f64::from(self.system.global_cpu_usage()));
        let memory_usage = (total_memory > 0)
            .then(|| self.system.used_memory() as f64 / total_memory as f64 * 100.0);
        let temperature = Self::hottest_core_temperature();

        let battery_drain_rate = match self.battery.as_mut() {
            Some((source, estimator)) => source
                .battery_level()
                .and_then(|level| estimator.observe(level, Instant::now())),
            None => None,
        };

        let reading = RawReading {
            cpu_usage,
            memory_usage,
            battery_drain_rate,
            temperature,
        };
        debug!(?reading, "sysinfo reading");
        Ok(reading)
    }

    fn name(&self) -> &str {
        "sysinfo"
    }
}
