//! Cache-or-fetch orchestration.
//!
//! One algorithm serves every data kind:
//!
//! 1. derive the cache key from the request;
//! 2. on a cache hit, return it (read failures degrade to a miss);
//! 3. take one rate-limit token;
//! 4. call the provider under the retry strategy, classifying each failure;
//! 5. validate the result (invalid data is never cached nor returned);
//! 6. write it through to the cache (write failures are logged only).
//!
//! A [`DataKind`] supplies the per-kind pieces: request checks, key and
//! metadata construction, the provider call and the validator.

pub mod equity;
pub mod fixed_income;
pub mod options;

pub use equity::{Equity, EquityRequest};
pub use fixed_income::{FixedIncome, TreasuryRequest};
pub use options::{OptionSide, Options, OptionsRequest};

use crate::cache::{CacheMetadata, CacheStore, CacheTable, SqliteCache};
use crate::clock::{Clock, SystemClock};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::payload::{ResultKind, TabularResult};
use crate::provider::{MarketDataProvider, ProviderError, YahooProvider};
use crate::rate_limiter::TokenBucketLimiter;
use crate::retry::ExponentialBackoff;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-kind capabilities plugged into [`Fetcher::get_cached_or_fetch`].
pub trait DataKind {
    type Request: Sync;

    const TABLE: CacheTable;

    /// Variant the provider call produces and the cache must hold.
    const RESULT: ResultKind;

    /// Reject malformed requests before any I/O.
    fn check_request(
        req: &Self::Request,
        config: &IngestConfig,
        today: NaiveDate,
    ) -> Result<(), IngestError>;

    /// Deterministic: equal requests give equal keys.
    fn cache_key(req: &Self::Request) -> String;

    fn metadata(req: &Self::Request) -> CacheMetadata;

    /// Instrument named in not-found errors.
    fn subject(req: &Self::Request) -> String;

    fn ttl_seconds(config: &IngestConfig) -> u64 {
        config.default_ttl_seconds
    }

    /// Raw provider access for one cache miss. Runs under a single
    /// rate-limit token and retry budget, however many provider calls it
    /// makes (a chain with no expiration, one series per treasury symbol).
    fn fetch(
        provider: &dyn MarketDataProvider,
        config: &IngestConfig,
        req: &Self::Request,
    ) -> Result<TabularResult, ProviderError>;

    fn validate(result: &TabularResult, strict: bool) -> Result<(), String>;
}

/// Entry point for consumers: owns the shared cache, limiter, retry policy
/// and provider, all injected at construction.
pub struct Fetcher {
    config: IngestConfig,
    cache: Arc<dyn CacheStore>,
    rate_limiter: Arc<TokenBucketLimiter>,
    retry: ExponentialBackoff,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
}

impl Fetcher {
    pub fn new(
        config: IngestConfig,
        cache: Arc<dyn CacheStore>,
        rate_limiter: Arc<TokenBucketLimiter>,
        retry: ExponentialBackoff,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cache,
            rate_limiter,
            retry,
            provider,
            clock,
        }
    }

    /// Production wiring: SQLite cache under `config.cache_dir`, Yahoo
    /// provider, system clock.
    pub fn from_config(config: IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(SqliteCache::from_config(&config, clock.clone())?);
        let rate_limiter = Arc::new(TokenBucketLimiter::from_config(&config, clock.clone())?);
        let retry = ExponentialBackoff::from_config(&config, clock.clone())?;
        let provider = Arc::new(
            YahooProvider::from_config(&config)
                .map_err(|e| IngestError::Configuration(e.to_string()))?,
        );
        Ok(Self::new(config, cache, rate_limiter, retry, provider, clock))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<TokenBucketLimiter> {
        &self.rate_limiter
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub(crate) fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Serve `req` from the cache or fetch, validate and store it.
    pub fn get_cached_or_fetch<K: DataKind>(
        &self,
        req: &K::Request,
        use_cache: bool,
    ) -> Result<TabularResult, IngestError> {
        K::check_request(req, &self.config, self.today())?;
        let key = K::cache_key(req);

        if use_cache {
            match self.cache.get(&key, K::TABLE) {
                Ok(Some(hit)) if hit.kind() == K::RESULT => {
                    info!(%key, table = %K::TABLE, "cache hit");
                    return Ok(hit);
                }
                Ok(Some(hit)) => warn!(
                    %key,
                    expected = %K::RESULT,
                    found = %hit.kind(),
                    "cached entry has the wrong shape, refetching"
                ),
                Ok(None) => debug!(%key, table = %K::TABLE, "cache miss"),
                Err(e) => warn!(%key, error = %e, "cache read failed, fetching directly"),
            }
        }

        let subject = K::subject(req);
        let result = self.call_provider(&key, &subject, || {
            K::fetch(self.provider.as_ref(), &self.config, req)
        })?;

        if self.config.validate_data {
            let strict = !self.config.allow_partial_data;
            if let Err(reason) = K::validate(&result, strict) {
                let shape = result.shape();
                error!(%key, %shape, %reason, "fetched data failed validation");
                return Err(IngestError::Validation {
                    key,
                    reason,
                    shape: Some(shape),
                });
            }
        }

        if use_cache {
            let ttl = K::ttl_seconds(&self.config);
            if let Err(e) = self.cache.set(&key, &result, K::TABLE, ttl, &K::metadata(req)) {
                warn!(%key, error = %e, "cache write failed, returning uncached result");
            }
        }

        Ok(result)
    }

    /// Delete the cached entry for `req`; storage errors propagate.
    pub fn invalidate<K: DataKind>(&self, req: &K::Request) -> Result<u64, IngestError> {
        let key = K::cache_key(req);
        self.cache.invalidate(Some(&key), Some(K::TABLE))
    }

    /// One rate-limited, retried provider call. Each failed attempt is
    /// classified before the retry decision, so not-found fails fast.
    pub(crate) fn call_provider<T>(
        &self,
        key: &str,
        subject: &str,
        op: impl Fn() -> Result<T, ProviderError>,
    ) -> Result<T, IngestError> {
        self.rate_limiter.throttle(|| {
            self.retry.execute(key, || {
                op().map_err(|e| e.classify(key, subject))
            })
        })?
    }
}

/// Unwrap a result that `K` declares as [`ResultKind::Single`].
pub(crate) fn expect_single<K: DataKind>(
    req: &K::Request,
    result: TabularResult,
) -> Result<DataFrame, IngestError> {
    let kind = result.kind();
    result.into_single().ok_or_else(|| IngestError::Fetch {
        key: K::cache_key(req),
        message: format!("expected a single frame, got a {kind} result"),
    })
}
