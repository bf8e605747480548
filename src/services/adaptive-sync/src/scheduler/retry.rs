//! # Retry Policy
//!
//! Delay schedules between attempts and the attempt loop that applies a
//! per-attempt timeout. The timeout of one attempt never shortens the next
//! one, and the backoff delay is not counted against any attempt's timeout.

use crate::error::{AdaptiveSyncError, AdaptiveSyncResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Retry strategy enumeration (all delays in milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Fixed delay between attempts
    Fixed { delay_ms: u64 },
    /// Linear backoff (delay increases linearly)
    Linear { initial_delay_ms: u64, increment_ms: u64 },
    /// Exponential backoff with optional jitter
    Exponential {
        initial_delay_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
        jitter: bool,
    },
    /// Explicit schedule; the last entry repeats
    Custom { delays_ms: Vec<u64> },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryStrategy {
    /// No delay between attempts
    pub fn immediate() -> Self {
        Self::Fixed { delay_ms: 0 }
    }

    /// Delay before the attempt following failed attempt number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = match self {
            RetryStrategy::Fixed { delay_ms } => *delay_ms,
            RetryStrategy::Linear {
                initial_delay_ms,
                increment_ms,
            } => initial_delay_ms.saturating_add(increment_ms.saturating_mul(attempt as u64)),
            RetryStrategy::Exponential {
                initial_delay_ms,
                multiplier,
                max_delay_ms,
                jitter,
            } => {
                let exponential = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                let mut delay = exponential.min(*max_delay_ms as f64) as u64;

                if *jitter {
                    // +/-25%
                    use rand::Rng;
                    let factor = rand::thread_rng().gen_range(0.75..=1.25);
                    delay = (delay as f64 * factor) as u64;
                }

                delay
            }
            RetryStrategy::Custom { delays_ms } => delays_ms
                .get(attempt as usize)
                .or_else(|| delays_ms.last())
                .copied()
                .unwrap_or(0),
        };

        Duration::from_millis(delay_ms)
    }
}

/// Parameters of one attempt loop
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    pub operation_id: Uuid,
    /// Total attempts, first one included
    pub max_attempts: u32,
    /// Applied to each attempt separately
    pub timeout: Duration,
    pub strategy: RetryStrategy,
}

/// Successful outcome of an attempt loop
#[derive(Debug)]
pub struct AttemptSuccess<T> {
    pub value: T,
    /// Attempts made, the successful one included
    pub attempts: u32,
}

/// Run `attempt` until it succeeds, a non-retryable error occurs, the plan
/// is exhausted or `cancel` fires. Cancellation is observed between attempts
/// and while an attempt is running; a cancelled operation is never retried.
pub async fn run_attempts<T, F, Fut>(
    plan: &AttemptPlan,
    cancel: &CancellationToken,
    mut attempt: F,
) -> AdaptiveSyncResult<AttemptSuccess<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AdaptiveSyncResult<T>>,
{
    let max_attempts = plan.max_attempts.max(1);
    let mut last_error = String::from("no attempt made");

    for number in 0..max_attempts {
        if cancel.is_cancelled() {
            return Err(AdaptiveSyncError::cancelled(plan.operation_id));
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(AdaptiveSyncError::cancelled(plan.operation_id));
            }
            result = tokio::time::timeout(plan.timeout, attempt(number)) => result,
        };

        let error = match outcome {
            Ok(Ok(value)) => {
                return Ok(AttemptSuccess {
                    value,
                    attempts: number + 1,
                })
            }
            Ok(Err(error)) => error,
            Err(_) => AdaptiveSyncError::timeout(plan.timeout.as_millis() as u64),
        };

        if !error.is_retryable() {
            warn!(
                operation_id = %plan.operation_id,
                attempt = number + 1,
                error = %error,
                "Attempt failed with non-retryable error"
            );
            return Err(error);
        }

        debug!(
            operation_id = %plan.operation_id,
            attempt = number + 1,
            max_attempts,
            error = %error,
            "Attempt failed"
        );
        last_error = error.to_string();

        if number + 1 < max_attempts {
            let delay = plan.strategy.calculate_delay(number);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(AdaptiveSyncError::cancelled(plan.operation_id));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    Err(AdaptiveSyncError::retries_exhausted(
        plan.operation_id,
        max_attempts,
        last_error,
    ))
}
