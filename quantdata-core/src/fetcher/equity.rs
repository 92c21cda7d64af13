//! Historical OHLCV bars for equities and indices.

use super::{expect_single, DataKind, Fetcher};
use crate::cache::{CacheMetadata, CacheTable};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::payload::{ResultKind, TabularResult};
use crate::provider::{MarketDataProvider, ProviderError};
use crate::validate;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Price history for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EquityRequest {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub interval: String,
}

impl EquityRequest {
    /// Symbols are trimmed and upper-cased so `aapl` and `AAPL` share a key.
    pub fn new(symbol: &str, start: NaiveDate, end: NaiveDate, interval: &str) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            start,
            end,
            interval: interval.trim().to_string(),
        }
    }
}

/// Marker for the equity data kind.
pub struct Equity;

impl DataKind for Equity {
    type Request = EquityRequest;
    const TABLE: CacheTable = CacheTable::Equity;
    const RESULT: ResultKind = ResultKind::Single;

    fn check_request(
        req: &EquityRequest,
        _config: &IngestConfig,
        today: NaiveDate,
    ) -> Result<(), IngestError> {
        validate::validate_symbol(&req.symbol)?;
        validate::validate_date_range(req.start, req.end, today)?;
        validate::validate_interval(&req.interval)
    }

    fn cache_key(req: &EquityRequest) -> String {
        format!(
            "equity:{}:{}:{}:{}",
            req.symbol, req.start, req.end, req.interval
        )
    }

    fn metadata(req: &EquityRequest) -> CacheMetadata {
        CacheMetadata::Equity {
            symbol: req.symbol.clone(),
            start: req.start,
            end: req.end,
            interval: req.interval.clone(),
        }
    }

    fn subject(req: &EquityRequest) -> String {
        req.symbol.clone()
    }

    fn fetch(
        provider: &dyn MarketDataProvider,
        _config: &IngestConfig,
        req: &EquityRequest,
    ) -> Result<TabularResult, ProviderError> {
        let df = provider.history(&req.symbol, req.start, req.end, &req.interval)?;
        info!(symbol = %req.symbol, rows = df.height(), "fetched price history");
        Ok(TabularResult::Single(df))
    }

    fn validate(result: &TabularResult, strict: bool) -> Result<(), String> {
        match result {
            TabularResult::Single(df) => validate::validate_equity(df, strict),
            TabularResult::Paired { .. } => Err("expected a single frame of bars".into()),
        }
    }
}

impl Fetcher {
    /// OHLCV bars for `symbol` over `[start, end]`.
    pub fn fetch_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: &str,
        use_cache: bool,
    ) -> Result<DataFrame, IngestError> {
        let req = EquityRequest::new(symbol, start, end, interval);
        self.get_cached_or_fetch::<Equity>(&req, use_cache)
            .and_then(|result| expect_single::<Equity>(&req, result))
    }

    /// [`fetch_historical`](Self::fetch_historical) for many symbols in
    /// parallel, sharing this fetcher's limiter and cache.
    ///
    /// The first failure (in input order) aborts the batch unless partial data
    /// is allowed, in which case failed symbols are logged and left out.
    pub fn fetch_multiple<S: AsRef<str> + Sync>(
        &self,
        symbols: &[S],
        start: NaiveDate,
        end: NaiveDate,
        interval: &str,
        use_cache: bool,
    ) -> Result<BTreeMap<String, DataFrame>, IngestError> {
        let outcomes: Vec<(String, Result<DataFrame, IngestError>)> = symbols
            .par_iter()
            .map(|symbol| {
                let req = EquityRequest::new(symbol.as_ref(), start, end, interval);
                let outcome = self
                    .get_cached_or_fetch::<Equity>(&req, use_cache)
                    .and_then(|result| expect_single::<Equity>(&req, result));
                (req.symbol, outcome)
            })
            .collect();

        let mut frames = BTreeMap::new();
        let mut failed = 0usize;
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(df) => {
                    frames.insert(symbol, df);
                }
                Err(e) if self.config.allow_partial_data => {
                    warn!(%symbol, error = %e, "skipping symbol");
                    failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            succeeded = frames.len(),
            failed,
            total = symbols.len(),
            "multi-symbol fetch complete"
        );
        Ok(frames)
    }

    /// Drop the cached bars for exactly this request.
    pub fn invalidate_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: &str,
    ) -> Result<u64, IngestError> {
        self.invalidate::<Equity>(&EquityRequest::new(symbol, start, end, interval))
    }
}
