//! Error handling module for the AI-CORE Adaptive Sync Service
//!
//! Resource pressure is deliberately absent from this taxonomy: a deferred
//! admission or a degraded coordinator is a scheduling state, not an error.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for adaptive sync operations
pub type AdaptiveSyncResult<T> = Result<T, AdaptiveSyncError>;

/// Error types for the scheduler, telemetry monitor and sync coordinator
#[derive(Error, Debug)]
pub enum AdaptiveSyncError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Configuration loading errors
    #[error("Configuration source error: {source}")]
    ConfigSource {
        #[from]
        source: config::ConfigError,
    },

    /// HTTP client errors
    #[error("HTTP client error: {source}")]
    HttpClient {
        #[from]
        source: reqwest::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Local filesystem errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Metrics registry errors
    #[error("Metrics error: {source}")]
    Metrics {
        #[from]
        source: prometheus::Error,
    },

    /// Remote endpoint answered with a non-success status
    #[error("Transport error for {endpoint}: {status_code} - {message}")]
    Transport {
        endpoint: String,
        status_code: u16,
        message: String,
    },

    /// A single attempt exceeded its timeout
    #[error("Attempt timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// Every attempt of an operation failed
    #[error("Operation {operation_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation_id: Uuid,
        attempts: u32,
        last_error: String,
    },

    /// The operation was cancelled before it could complete
    #[error("Operation {operation_id} was cancelled")]
    Cancelled { operation_id: Uuid },

    /// The pending queue is at capacity
    #[error("Request queue is full ({capacity} operations)")]
    QueueFull { capacity: usize },

    /// Resource sampling errors
    #[error("Resource sampling error: {message}")]
    Sampling { message: String },

    /// Local snapshot persistence errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Remote synchronization errors
    #[error("Sync failed: {message}")]
    SyncFailed { message: String },
}

impl AdaptiveSyncError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S1: Into<String>, S2: Into<String>>(
        endpoint: S1,
        status_code: u16,
        message: S2,
    ) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            status_code,
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(millis: u64) -> Self {
        Self::Timeout { millis }
    }

    /// Create a new retries exhausted error
    pub fn retries_exhausted<S: Into<String>>(
        operation_id: Uuid,
        attempts: u32,
        last_error: S,
    ) -> Self {
        Self::RetriesExhausted {
            operation_id,
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Create a new cancellation error
    pub fn cancelled(operation_id: Uuid) -> Self {
        Self::Cancelled { operation_id }
    }

    /// Create a new queue full error
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Create a new sampling error
    pub fn sampling<S: Into<String>>(message: S) -> Self {
        Self::Sampling {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a new sync failure
    pub fn sync_failed<S: Into<String>>(message: S) -> Self {
        Self::SyncFailed {
            message: message.into(),
        }
    }

    /// Get the error code for this error (for logs and metrics labels)
    pub fn error_code(&self) -> &'static str {
        match self {
            AdaptiveSyncError::Configuration { .. } => "CONFIGURATION_ERROR",
            AdaptiveSyncError::ConfigSource { .. } => "CONFIGURATION_SOURCE_ERROR",
            AdaptiveSyncError::HttpClient { .. } => "HTTP_CLIENT_ERROR",
            AdaptiveSyncError::Serialization { .. } => "SERIALIZATION_ERROR",
            AdaptiveSyncError::Io { .. } => "IO_ERROR",
            AdaptiveSyncError::Metrics { .. } => "METRICS_ERROR",
            AdaptiveSyncError::Transport { .. } => "TRANSPORT_ERROR",
            AdaptiveSyncError::Timeout { .. } => "TIMEOUT",
            AdaptiveSyncError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            AdaptiveSyncError::Cancelled { .. } => "CANCELLED",
            AdaptiveSyncError::QueueFull { .. } => "QUEUE_FULL",
            AdaptiveSyncError::Sampling { .. } => "SAMPLING_ERROR",
            AdaptiveSyncError::Persistence { .. } => "PERSISTENCE_ERROR",
            AdaptiveSyncError::SyncFailed { .. } => "SYNC_FAILED",
        }
    }

    /// Check if this error is a transient failure worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            AdaptiveSyncError::HttpClient { source } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            AdaptiveSyncError::Timeout { .. } | AdaptiveSyncError::Io { .. } => true,
            AdaptiveSyncError::Transport { status_code, .. } => {
                *status_code >= 500 || *status_code == 408 || *status_code == 429
            }
            _ => false,
        }
    }

    /// Check if this error is terminal for the caller (surfaced rather than handled locally)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdaptiveSyncError::RetriesExhausted { .. } | AdaptiveSyncError::Cancelled { .. }
        )
    }
}
