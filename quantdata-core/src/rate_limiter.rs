//! Token-bucket admission control for outbound provider requests.
//!
//! The bucket starts full. Refill and debit happen together under one lock;
//! a blocked caller sleeps with the lock released so other threads can keep
//! refilling and drawing.

use crate::clock::{Clock, SystemClock};
use crate::config::IngestConfig;
use crate::error::IngestError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Shortest sleep between refill checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: DateTime<Utc>,
}

/// Shared request budget, refilled continuously at `tokens_per_second`.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    tokens_per_second: f64,
    bucket_size: u32,
    bucket: Mutex<Bucket>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(tokens_per_second: f64, bucket_size: u32) -> Result<Self, IngestError> {
        Self::with_clock(tokens_per_second, bucket_size, Arc::new(SystemClock))
    }

    /// Build with an explicit time source.
    pub fn with_clock(
        tokens_per_second: f64,
        bucket_size: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IngestError> {
        if !(tokens_per_second > 0.0) || !tokens_per_second.is_finite() {
            return Err(IngestError::Configuration(format!(
                "tokens_per_second must be positive, got {tokens_per_second}"
            )));
        }
        if bucket_size == 0 {
            return Err(IngestError::Configuration(
                "bucket_size must be positive".into(),
            ));
        }

        let now = clock.now();
        Ok(Self {
            tokens_per_second,
            bucket_size,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(bucket_size),
                last_update: now,
            }),
            clock,
        })
    }

    pub fn from_config(config: &IngestConfig, clock: Arc<dyn Clock>) -> Result<Self, IngestError> {
        Self::with_clock(config.rate_limit_per_second, config.rate_limit_burst, clock)
    }

    pub fn tokens_per_second(&self) -> f64 {
        self.tokens_per_second
    }

    pub fn bucket_size(&self) -> u32 {
        self.bucket_size
    }

    /// Take `tokens` from the bucket.
    ///
    /// Non-blocking calls return `Ok(false)` when the budget is short. Blocking
    /// calls wait until enough tokens accrue; with a `timeout` they give up
    /// with [`IngestError::Timeout`] once it elapses. Requests for zero tokens
    /// or more than the bucket holds are rejected, since they could never be
    /// satisfied meaningfully.
    pub fn acquire(
        &self,
        tokens: u32,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<bool, IngestError> {
        if tokens == 0 || tokens > self.bucket_size {
            return Err(IngestError::Configuration(format!(
                "cannot acquire {tokens} token(s) from a bucket of {}",
                self.bucket_size
            )));
        }

        let needed = f64::from(tokens);
        let started = self.clock.now();

        loop {
            let deficit = {
                let mut bucket = self.lock();
                self.refill(&mut bucket);
                if bucket.tokens >= needed {
                    bucket.tokens -= needed;
                    debug!(tokens, remaining = bucket.tokens, "rate limit tokens acquired");
                    return Ok(true);
                }
                needed - bucket.tokens
            };

            if !blocking {
                return Ok(false);
            }

            let mut wait = Duration::try_from_secs_f64(deficit / self.tokens_per_second)
                .unwrap_or(Duration::MAX)
                .max(MIN_WAIT);

            if let Some(timeout) = timeout {
                let waited = (self.clock.now() - started).to_std().unwrap_or_default();
                if waited >= timeout {
                    return Err(IngestError::Timeout { tokens, waited });
                }
                wait = wait.min(timeout - waited);
            }

            debug!(tokens, wait_ms = wait.as_millis() as u64, "waiting for rate limit tokens");
            self.clock.sleep(wait);
        }
    }

    /// Non-blocking single-token acquisition.
    pub fn try_acquire(&self) -> bool {
        matches!(self.acquire(1, false, None), Ok(true))
    }

    /// Block for one token, then run `op`.
    ///
    /// Tokens are consumed, not held, so nothing is released afterwards.
    pub fn throttle<T>(&self, op: impl FnOnce() -> T) -> Result<T, IngestError> {
        self.acquire(1, true, None)?;
        Ok(op())
    }

    /// Current budget after refill.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Refill the bucket to capacity.
    pub fn reset(&self) {
        let mut bucket = self.lock();
        bucket.tokens = f64::from(self.bucket_size);
        bucket.last_update = self.clock.now();
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = self.clock.now();
        let elapsed_us = (now - bucket.last_update).num_microseconds().unwrap_or(i64::MAX);
        if elapsed_us > 0 {
            let elapsed = elapsed_us as f64 / 1_000_000.0;
            bucket.tokens =
                (bucket.tokens + elapsed * self.tokens_per_second).min(f64::from(self.bucket_size));
            bucket.last_update = now;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|p| p.into_inner())
    }
}
