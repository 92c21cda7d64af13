//! Shared fixtures: a scripted in-memory provider and a fetcher wired to a
//! temporary SQLite cache and a manual clock.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use polars::prelude::DataFrame;
use quantdata_core::cache::SqliteCache;
use quantdata_core::provider::{
    bars_to_frame, quotes_to_frame, MarketDataProvider, OptionQuote, PriceBar, ProviderError,
};
use quantdata_core::{
    Clock, ExponentialBackoff, Fetcher, IngestConfig, ManualClock, TokenBucketLimiter,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Simulated "today" for every harness.
pub fn today() -> NaiveDate {
    d("2024-06-03")
}

/// Serves queued responses per symbol and counts every call.
///
/// A history request for a symbol with nothing queued fails with `NotFound`.
#[derive(Default)]
pub struct ScriptedProvider {
    history: Mutex<HashMap<String, VecDeque<Result<DataFrame, ProviderError>>>>,
    expirations: Mutex<HashMap<String, Vec<NaiveDate>>>,
    chains: Mutex<HashMap<(String, NaiveDate), (DataFrame, DataFrame)>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn push_history(&self, symbol: &str, response: Result<DataFrame, ProviderError>) {
        self.history
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_expirations(&self, symbol: &str, dates: Vec<NaiveDate>) {
        self.expirations
            .lock()
            .unwrap()
            .insert(symbol.to_string(), dates);
    }

    pub fn set_chain(&self, symbol: &str, expiration: NaiveDate, calls: DataFrame, puts: DataFrame) {
        self.chains
            .lock()
            .unwrap()
            .insert((symbol.to_string(), expiration), (calls, puts));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn history(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _interval: &str,
    ) -> Result<DataFrame, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history
            .lock()
            .unwrap()
            .get_mut(symbol)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ProviderError::NotFound(symbol.to_string())))
    }

    fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.expirations
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(symbol.to_string()))
    }

    fn option_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<(DataFrame, DataFrame), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.chains
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), expiration))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("{symbol} {expiration}")))
    }
}

pub struct Harness {
    pub fetcher: Fetcher,
    pub provider: Arc<ScriptedProvider>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<SqliteCache>,
    _dir: TempDir,
}

pub fn harness() -> Harness {
    harness_with(IngestConfig::default())
}

/// Fetcher over `config` with its cache redirected into a temp dir.
pub fn harness_with(mut config: IngestConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    config.cache_dir = dir.path().to_path_buf();

    let clock = Arc::new(ManualClock::new(
        Utc.from_utc_datetime(&today().and_hms_opt(12, 0, 0).unwrap()),
    ));
    let shared: Arc<dyn Clock> = clock.clone();
    let cache = Arc::new(SqliteCache::from_config(&config, shared.clone()).unwrap());
    let provider = Arc::new(ScriptedProvider::default());
    let fetcher = Fetcher::new(
        config.clone(),
        cache.clone(),
        Arc::new(TokenBucketLimiter::from_config(&config, shared.clone()).unwrap()),
        ExponentialBackoff::from_config(&config, shared.clone()).unwrap(),
        provider.clone(),
        shared,
    );

    Harness {
        fetcher,
        provider,
        clock,
        cache,
        _dir: dir,
    }
}

/// `n` clean daily bars starting at `start`, drifting upwards.
pub fn daily_bars(start: NaiveDate, n: usize) -> DataFrame {
    let bars: Vec<PriceBar> = (0..n)
        .map(|i| {
            let day = start + Duration::days(i as i64);
            let base = 100.0 + i as f64 * 0.1;
            PriceBar {
                timestamp: Utc.from_utc_datetime(&day.and_hms_opt(14, 30, 0).unwrap()),
                open: Some(base),
                high: Some(base + 1.0),
                low: Some(base - 1.0),
                close: Some(base + 0.5),
                adj_close: Some(base + 0.5),
                volume: Some(1_000_000 + i as u64),
            }
        })
        .collect();
    bars_to_frame(&bars).unwrap()
}

/// Daily closes only, as yield indices report them.
pub fn yield_series(points: &[(NaiveDate, f64)]) -> DataFrame {
    let bars: Vec<PriceBar> = points
        .iter()
        .map(|&(day, y)| PriceBar {
            timestamp: Utc.from_utc_datetime(&day.and_hms_opt(14, 30, 0).unwrap()),
            open: Some(y),
            high: Some(y),
            low: Some(y),
            close: Some(y),
            adj_close: Some(y),
            volume: Some(0),
        })
        .collect();
    bars_to_frame(&bars).unwrap()
}

pub fn chain_side(symbol: &str, kind: char, strikes: &[f64]) -> DataFrame {
    let quotes: Vec<OptionQuote> = strikes
        .iter()
        .map(|&strike| OptionQuote {
            contract: format!("{symbol}240614{kind}{:08}", (strike * 1000.0) as u64),
            strike,
            last: 2.5,
            bid: Some(2.4),
            ask: Some(2.6),
            volume: Some(150),
            open_interest: Some(2_000),
            implied_volatility: Some(0.21),
        })
        .collect();
    quotes_to_frame(&quotes).unwrap()
}

pub fn http(status: u16, message: &str) -> ProviderError {
    ProviderError::Http {
        status,
        message: message.to_string(),
    }
}
