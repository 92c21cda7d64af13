//! Exponential-backoff retry for provider calls.

use crate::clock::{Clock, SystemClock};
use crate::config::IngestConfig;
use crate::error::{IngestError, Retryable};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Retries an operation up to `max_retries` extra times, sleeping
/// `min(base_delay * exponential_base^i, max_delay)` before retry `i`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    base_delay: f64,
    max_delay: f64,
    exponential_base: f64,
    clock: Arc<dyn Clock>,
}

impl ExponentialBackoff {
    /// Delays are in seconds.
    pub fn new(
        max_retries: u32,
        base_delay: f64,
        max_delay: f64,
        exponential_base: f64,
    ) -> Result<Self, IngestError> {
        Self::with_clock(
            max_retries,
            base_delay,
            max_delay,
            exponential_base,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        max_retries: u32,
        base_delay: f64,
        max_delay: f64,
        exponential_base: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IngestError> {
        if !(base_delay > 0.0) || !base_delay.is_finite() {
            return Err(IngestError::Configuration(format!(
                "base_delay must be positive, got {base_delay}"
            )));
        }
        if !(max_delay > 0.0) || !max_delay.is_finite() {
            return Err(IngestError::Configuration(format!(
                "max_delay must be positive, got {max_delay}"
            )));
        }
        if !(exponential_base > 1.0) || !exponential_base.is_finite() {
            return Err(IngestError::Configuration(format!(
                "exponential_base must be greater than 1, got {exponential_base}"
            )));
        }
        Ok(Self {
            max_retries,
            base_delay,
            max_delay,
            exponential_base,
            clock,
        })
    }

    pub fn from_config(config: &IngestConfig, clock: Arc<dyn Clock>) -> Result<Self, IngestError> {
        Self::with_clock(
            config.max_retries,
            config.retry_base_delay,
            config.retry_max_delay,
            config.retry_exponential_base,
            clock,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn should_retry<E: Retryable>(&self, err: &E) -> bool {
        err.is_retryable()
    }

    /// Sleep before retry `attempt` (0-indexed). No jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.base_delay * self.exponential_base.powi(exponent)).min(self.max_delay);
        Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(self.max_delay))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// retries run out. The final error is returned as produced.
    ///
    /// `label` identifies the operation in log events (usually a cache key).
    pub fn execute<T, E, F>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation() {
                Ok(value) => {
                    if attempt > 0 {
                        info!(key = label, attempts = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !self.should_retry(&err) {
                        warn!(key = label, error = %err, "non-retryable failure");
                        return Err(err);
                    }
                    if attempt >= self.max_retries {
                        error!(
                            key = label,
                            attempts = attempt + 1,
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        key = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    self.clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
