//! Treasury yields, one column per maturity.
//!
//! Maturities map to provider symbols through `IngestConfig::treasury_symbols`.
//! Several maturities may share a symbol; each distinct symbol is fetched once.

use super::{expect_single, DataKind, Fetcher};
use crate::cache::{CacheMetadata, CacheTable};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::payload::{ResultKind, TabularResult};
use crate::provider::{timestamp_dtype, MarketDataProvider, ProviderError};
use crate::validate;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Used when a caller names no maturities.
pub const DEFAULT_MATURITIES: &[&str] = &["10Y", "30Y"];

/// Lookback used when no start date is given.
const DEFAULT_LOOKBACK_DAYS: i64 = 365;

/// Yields for a set of maturities over `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreasuryRequest {
    /// Upper-cased, de-duplicated, in tenor order.
    pub maturities: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TreasuryRequest {
    pub fn new<S: AsRef<str>>(maturities: &[S], start: NaiveDate, end: NaiveDate) -> Self {
        let mut maturities: Vec<String> = maturities
            .iter()
            .map(|m| m.as_ref().trim().to_uppercase())
            .collect();
        sort_by_tenor(&mut maturities);
        maturities.dedup();
        Self {
            maturities,
            start,
            end,
        }
    }
}

/// Tenor in months: `3M` → 3, `10Y` → 120. `None` for anything else.
pub fn tenor_months(maturity: &str) -> Option<u32> {
    let unit = maturity.chars().last()?;
    let count: u32 = maturity[..maturity.len() - unit.len_utf8()].parse().ok()?;
    match unit {
        'M' | 'm' => Some(count),
        'Y' | 'y' => count.checked_mul(12),
        _ => None,
    }
}

/// Shortest tenor first; unparseable labels sort last, alphabetically.
pub fn sort_by_tenor(maturities: &mut [String]) {
    maturities.sort_by(|a, b| {
        let rank = |m: &str| tenor_months(m).unwrap_or(u32::MAX);
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
}

/// Marker for the fixed-income data kind.
pub struct FixedIncome;

impl DataKind for FixedIncome {
    type Request = TreasuryRequest;
    const TABLE: CacheTable = CacheTable::FixedIncome;
    const RESULT: ResultKind = ResultKind::Single;

    fn check_request(
        req: &TreasuryRequest,
        config: &IngestConfig,
        today: NaiveDate,
    ) -> Result<(), IngestError> {
        if req.maturities.is_empty() {
            return Err(IngestError::invalid_request(
                "treasury",
                "at least one maturity is required",
            ));
        }
        let unknown: Vec<&str> = req
            .maturities
            .iter()
            .map(String::as_str)
            .filter(|m| !config.treasury_symbols.contains_key(*m))
            .collect();
        if !unknown.is_empty() {
            let mut known: Vec<String> = config.treasury_symbols.keys().cloned().collect();
            sort_by_tenor(&mut known);
            return Err(IngestError::invalid_request(
                unknown.join(","),
                format!(
                    "unknown maturity, expected one of {}",
                    known.join(", ")
                ),
            ));
        }
        validate::validate_date_range(req.start, req.end, today)
    }

    fn cache_key(req: &TreasuryRequest) -> String {
        format!(
            "fixedincome:{}:{}:{}",
            req.maturities.join(","),
            req.start,
            req.end
        )
    }

    fn metadata(req: &TreasuryRequest) -> CacheMetadata {
        CacheMetadata::FixedIncome {
            instrument: "treasury".to_string(),
            maturity: req.maturities.join(","),
            start: req.start,
            end: req.end,
        }
    }

    fn subject(req: &TreasuryRequest) -> String {
        req.maturities.join(",")
    }

    fn fetch(
        provider: &dyn MarketDataProvider,
        config: &IngestConfig,
        req: &TreasuryRequest,
    ) -> Result<TabularResult, ProviderError> {
        let mut by_symbol: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, maturity) in req.maturities.iter().enumerate() {
            let symbol = config
                .treasury_symbols
                .get(maturity)
                .ok_or_else(|| ProviderError::Other(format!("no symbol for maturity {maturity}")))?;
            by_symbol.entry(symbol.as_str()).or_default().push(idx);
        }

        // timestamp (ms) -> one slot per maturity
        let mut rows: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
        let width = req.maturities.len();
        for (symbol, slots) in &by_symbol {
            let df = match provider.history(symbol, req.start, req.end, "1d") {
                Ok(df) => df,
                Err(ProviderError::NotFound(msg)) => {
                    warn!(%symbol, reason = %msg, "no yield data for symbol, leaving column empty");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let timestamps = df.column("timestamp")?.cast(&DataType::Int64)?;
            let closes = df.column("close")?.cast(&DataType::Float64)?;
            for (ts, close) in timestamps.i64()?.into_iter().zip(closes.f64()?) {
                let Some(ts) = ts else { continue };
                let row = rows.entry(ts).or_insert_with(|| vec![None; width]);
                for &slot in slots {
                    row[slot] = close;
                }
            }
        }

        if rows.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "no treasury data returned for {}",
                req.maturities.join(",")
            )));
        }

        let timestamps: Vec<i64> = rows.keys().copied().collect();
        let mut columns = vec![Column::new("timestamp".into(), timestamps).cast(&timestamp_dtype())?];
        for (slot, maturity) in req.maturities.iter().enumerate() {
            let values: Vec<Option<f64>> = rows.values().map(|row| row[slot]).collect();
            columns.push(Column::new(maturity.as_str().into(), values));
        }
        let df = DataFrame::new(columns)?;
        info!(
            maturities = %req.maturities.join(","),
            symbols = by_symbol.len(),
            rows = df.height(),
            "fetched treasury yields"
        );
        Ok(TabularResult::Single(df))
    }

    fn validate(result: &TabularResult, strict: bool) -> Result<(), String> {
        match result {
            TabularResult::Single(df) => validate::validate_fixed_income(df, strict),
            TabularResult::Paired { .. } => Err("expected a single frame of yields".into()),
        }
    }
}

impl Fetcher {
    /// Wide yield frame: `timestamp` plus one column per maturity.
    ///
    /// No maturities means [`DEFAULT_MATURITIES`]; `end` defaults to today and
    /// `start` to a year before `end`.
    pub fn fetch_treasury_yields<S: AsRef<str>>(
        &self,
        maturities: &[S],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        use_cache: bool,
    ) -> Result<DataFrame, IngestError> {
        let req = self.treasury_request(maturities, start, end);
        self.get_cached_or_fetch::<FixedIncome>(&req, use_cache)
            .and_then(|result| expect_single::<FixedIncome>(&req, result))
    }

    /// Every configured maturity at `date` (today when `None`), as a
    /// `maturity`/`yield` frame in tenor order.
    ///
    /// Uses the row dated `date` when present, else the latest row in the
    /// preceding five days.
    pub fn fetch_yield_curve(
        &self,
        date: Option<NaiveDate>,
        use_cache: bool,
    ) -> Result<DataFrame, IngestError> {
        let date = date.unwrap_or_else(|| self.today());
        let maturities = self.get_available_maturities();
        let df = self.fetch_treasury_yields(
            &maturities,
            Some(date - Duration::days(5)),
            Some(date + Duration::days(1)),
            use_cache,
        )?;

        let key = format!("yieldcurve:{date}");
        let frame_error = |e: PolarsError| IngestError::Fetch {
            key: key.clone(),
            message: e.to_string(),
        };

        let timestamps = df
            .column("timestamp")
            .and_then(|c| c.cast(&DataType::Int64))
            .map_err(frame_error)?;
        let dates: Vec<Option<NaiveDate>> = timestamps
            .i64()
            .map_err(frame_error)?
            .into_iter()
            .map(|ts| ts.and_then(DateTime::<Utc>::from_timestamp_millis).map(|t| t.date_naive()))
            .collect();
        let row = dates
            .iter()
            .position(|d| *d == Some(date))
            .unwrap_or(df.height().saturating_sub(1));

        let mut yields = Vec::with_capacity(maturities.len());
        for maturity in &maturities {
            let value = df
                .column(maturity)
                .and_then(|c| c.cast(&DataType::Float64))
                .and_then(|c| c.f64().map(|ca| ca.get(row)))
                .map_err(frame_error)?;
            yields.push(value);
        }

        info!(%date, row_date = ?dates.get(row).copied().flatten(), "built yield curve");
        DataFrame::new(vec![
            Column::new("maturity".into(), maturities),
            Column::new("yield".into(), yields),
        ])
        .map_err(frame_error)
    }

    /// Configured maturities, shortest first.
    pub fn get_available_maturities(&self) -> Vec<String> {
        let mut maturities: Vec<String> = self.config.treasury_symbols.keys().cloned().collect();
        sort_by_tenor(&mut maturities);
        maturities
    }

    pub fn invalidate_treasury_yields<S: AsRef<str>>(
        &self,
        maturities: &[S],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<u64, IngestError> {
        let req = self.treasury_request(maturities, start, end);
        self.invalidate::<FixedIncome>(&req)
    }

    fn treasury_request<S: AsRef<str>>(
        &self,
        maturities: &[S],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> TreasuryRequest {
        let end = end.unwrap_or_else(|| self.today());
        let start = start.unwrap_or(end - Duration::days(DEFAULT_LOOKBACK_DAYS));
        if maturities.is_empty() {
            TreasuryRequest::new(DEFAULT_MATURITIES, start, end)
        } else {
            TreasuryRequest::new(maturities, start, end)
        }
    }
}
