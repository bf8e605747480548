//! Main binary entry point for the AI-CORE Adaptive Sync Service
//!
//! Runs the resource monitor, request scheduler and lifecycle coordinator
//! until Ctrl+C or SIGTERM, then persists state and exits.

use adaptive_sync::{AdaptiveSyncConfig, AdaptiveSyncService, ObservabilityConfig};
use anyhow::Context;
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env file is the normal case
        if !e.not_found() {
            eprintln!("Failed to read .env file: {}", e);
        }
    }

    // Load configuration
    let config = match AdaptiveSyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Initialize tracing
    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {:#}", e);
        process::exit(1);
    }

    info!(
        "Starting AI-CORE Adaptive Sync Service v{}",
        adaptive_sync::VERSION
    );

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        process::exit(1);
    }

    log_configuration(&config);

    // Create the service
    let service = match AdaptiveSyncService::new(config) {
        Ok(service) => {
            info!("Adaptive sync service initialized successfully");
            service
        }
        Err(e) => {
            error!(code = e.error_code(), "Failed to initialize service: {}", e);
            process::exit(1);
        }
    };

    // Run until a shutdown signal arrives
    if let Err(e) = service.run_until_signal().await {
        error!("Service error: {}", e);
        process::exit(1);
    }

    info!("AI-CORE Adaptive Sync Service shutdown complete");
}

/// Initialize tracing/logging
fn init_tracing(observability: &ObservabilityConfig) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&observability.log_level))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;

    match observability.log_format.as_str() {
        "json" => {
            // JSON formatted logs for production
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("tracing subscriber already set")?;
        }
        "pretty" | "text" => {
            // Pretty formatted logs for development
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(false),
                )
                .try_init()
                .context("tracing subscriber already set")?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()
                .context("tracing subscriber already set")?;
        }
    }

    Ok(())
}

fn log_configuration(config: &AdaptiveSyncConfig) {
    let thresholds = &config.telemetry.thresholds;
    info!(
        cpu = thresholds.cpu,
        memory = thresholds.memory,
        battery_drain = thresholds.battery_drain,
        temperature = thresholds.temperature,
        interval_ms = config.telemetry.sampling_interval_ms,
        "Resource thresholds"
    );
    info!(
        max_concurrent = config.scheduler.max_concurrent,
        max_queue_size = config.scheduler.max_queue_size,
        admission_threshold = %config.scheduler.admission_threshold,
        cache_max_age_secs = config.scheduler.cache_max_age_secs,
        "Scheduler settings"
    );
    info!(
        endpoint = %config.sync.endpoint,
        state_dir = %config.sync.state_dir.display(),
        staleness_window_secs = config.sync.staleness_window_secs,
        "Sync settings"
    );

    match &config.observability.metrics_addr {
        Some(addr) => info!(addr = %addr, "Metrics endpoint enabled"),
        None => info!("Metrics endpoint disabled"),
    }

    if !config.sync.endpoint.starts_with("https://") {
        warn!("Sync endpoint is not using HTTPS");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_accepts_every_format() {
        // Only the first call can install the global subscriber
        for format in ["json", "pretty", "compact"] {
            let observability = ObservabilityConfig {
                log_format: format.to_string(),
                ..ObservabilityConfig::default()
            };
            let _ = init_tracing(&observability);
        }
    }

    #[test]
    fn test_log_configuration() {
        log_configuration(&AdaptiveSyncConfig::default());
    }
}
