// Concurrency coordinator - serializable units of work with deterministic
// lock order, bounded exponential backoff, and caller cancellation.

use crate::errors::{Result, TransferEngineError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first; 10 means 11 attempts in total.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 10,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// The order in which user rows must be locked: ascending by id. Locking
/// every involved user in this order is the sole deadlock-prevention
/// mechanism for concurrent writes over overlapping user sets.
pub fn lock_order(users: [Uuid; 2]) -> [Uuid; 2] {
    let [a, b] = users;
    if b < a {
        [b, a]
    } else {
        [a, b]
    }
}

pub struct Coordinator {
    config: RetryConfig,
}

impl Coordinator {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Delay before the nth retry: exponential backoff with jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        // Jitter to prevent thundering herd
        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Run a unit of work, re-running it on serialization conflicts until it
    /// succeeds, fails terminally, or the retry budget is spent.
    ///
    /// `operation` is the entire retried block, idempotency probe included:
    /// a prior attempt may have committed before the conflict reached us, so
    /// every re-run must start from the probe. The backoff sleep and the
    /// in-flight work are both raced against `cancel`; dropping the work
    /// future rolls back whatever transaction it had open.
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation_name: &str,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error: Option<TransferEngineError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt - 1);
                warn!(
                    "Retry attempt {}/{} for {} after {:?}",
                    attempt, self.config.max_retries, operation_name, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferEngineError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if cancel.is_cancelled() {
                return Err(TransferEngineError::Canceled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(TransferEngineError::Canceled),
                outcome = operation() => outcome,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            "Operation {} succeeded on retry attempt {}/{}",
                            operation_name, attempt, self.config.max_retries
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_serialization_conflict() => {
                    warn!(
                        "Attempt {}/{} failed for {}: {}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        operation_name,
                        err
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        let last_error = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "retry budget exhausted".to_string());

        Err(TransferEngineError::Conflict {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}
