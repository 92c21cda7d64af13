//! Sanity checks for fetched frames and request parameters.
//!
//! Frame validators return `Err(reason)`; the fetcher wraps the reason into
//! [`IngestError::Validation`] together with the observed shape. Request
//! checks run before any I/O and fail with `Validation` directly.

use crate::error::IngestError;
use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, warn};

/// Intervals the history endpoint accepts.
pub const VALID_INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

pub const EQUITY_COLUMNS: &[&str] = &["open", "high", "low", "close", "volume"];
const PRICE_COLUMNS: &[&str] = &["open", "high", "low", "close"];
pub const OPTION_COLUMNS: &[&str] = &["strike", "last", "volume", "open_interest"];

/// Columns in a yield frame that are not yields.
const NON_YIELD_COLUMNS: &[&str] = &["timestamp", "date"];

/// Largest plausible yield, in basis points.
const MAX_YIELD_BPS: f64 = 10_000.0;

const MAX_SYMBOL_LEN: usize = 10;

// ── Frame validators ─────────────────────────────────────────────────

/// OHLCV bars.
///
/// Always rejected: missing columns, no rows, `high < low`, rows with every
/// OHLCV value null. Strict mode also rejects non-positive prices and any null.
pub fn validate_equity(df: &DataFrame, strict: bool) -> Result<(), String> {
    require_columns(df, EQUITY_COLUMNS, "bars")?;
    if df.height() == 0 {
        return Err("no rows".into());
    }

    let columns = EQUITY_COLUMNS
        .iter()
        .map(|name| float_column(df, name))
        .collect::<Result<Vec<_>, _>>()?;
    let (prices, volume) = columns.split_at(PRICE_COLUMNS.len());
    let (high, low) = (&prices[1], &prices[2]);

    let non_positive = prices
        .iter()
        .any(|col| col.into_iter().flatten().any(|v| v <= 0.0));
    if non_positive {
        if strict {
            return Err("found non-positive prices".into());
        }
        warn!("non-positive prices accepted in partial mode");
    }

    let inverted = high
        .into_iter()
        .zip(low)
        .any(|(h, l)| matches!((h, l), (Some(h), Some(l)) if h < l));
    if inverted {
        return Err("found rows where high < low".into());
    }

    let all_null_row = (0..df.height()).any(|i| {
        prices.iter().chain(volume).all(|col| col.get(i).is_none())
    });
    if all_null_row {
        return Err("found rows with every price and volume missing".into());
    }

    if strict {
        let nulls: Vec<String> = EQUITY_COLUMNS
            .iter()
            .zip(&columns)
            .filter(|(_, col)| col.null_count() > 0)
            .map(|(name, col)| format!("{name}={}", col.null_count()))
            .collect();
        if !nulls.is_empty() {
            return Err(format!("null values in strict mode: {}", nulls.join(", ")));
        }
    }

    debug!(rows = df.height(), "equity frame passed validation");
    Ok(())
}

/// Calls and puts of one expiration.
///
/// Both sides need the option columns; strikes must be positive and last
/// prices non-negative. An empty side only fails in strict mode.
pub fn validate_options(calls: &DataFrame, puts: &DataFrame, strict: bool) -> Result<(), String> {
    for (df, side) in [(calls, "calls"), (puts, "puts")] {
        require_columns(df, OPTION_COLUMNS, side)?;

        if df.height() == 0 {
            if strict {
                return Err(format!("{side} side is empty"));
            }
            warn!(side, "empty option side accepted in partial mode");
            continue;
        }

        let strike = float_column(df, "strike")?;
        if strike.into_iter().flatten().any(|v| v <= 0.0) {
            return Err(format!("found non-positive strikes in {side}"));
        }
        let last = float_column(df, "last")?;
        if last.into_iter().flatten().any(|v| v < 0.0) {
            return Err(format!("found negative last prices in {side}"));
        }
    }

    debug!(
        calls = calls.height(),
        puts = puts.height(),
        "option chain passed validation"
    );
    Ok(())
}

/// Yield series: every numeric column except the time index is a yield.
pub fn validate_fixed_income(df: &DataFrame, strict: bool) -> Result<(), String> {
    if df.height() == 0 {
        return Err("no rows".into());
    }

    let yields: Vec<Float64Chunked> = df
        .get_columns()
        .iter()
        .filter(|col| !NON_YIELD_COLUMNS.contains(&col.name().as_str()))
        .filter(|col| is_numeric(col.dtype()))
        .map(|col| float_column(df, col.name().as_str()))
        .collect::<Result<_, _>>()?;

    if yields.is_empty() {
        return Err("no numeric yield columns".into());
    }

    if yields.iter().any(|col| col.min().is_some_and(|v| v < 0.0)) {
        return Err("found negative yields".into());
    }

    let max = yields
        .iter()
        .filter_map(|col| col.max())
        .fold(f64::NEG_INFINITY, f64::max);
    if max > MAX_YIELD_BPS {
        if strict {
            return Err(format!("found implausible yield {max}"));
        }
        warn!(max, "implausible yield accepted in partial mode");
    }

    debug!(rows = df.height(), columns = yields.len(), "yield frame passed validation");
    Ok(())
}

// ── Request checks ───────────────────────────────────────────────────

/// Ticker: 1 to 10 characters of letters, digits, `.`, `-` or `^`.
pub fn validate_symbol(symbol: &str) -> Result<(), IngestError> {
    let trimmed = symbol.trim();
    let reject = |reason: String| Err(IngestError::invalid_request(symbol, reason));

    if trimmed.is_empty() {
        return reject("symbol is empty".into());
    }
    if trimmed.len() > MAX_SYMBOL_LEN {
        return reject(format!(
            "symbol is {} characters, at most {MAX_SYMBOL_LEN} allowed",
            trimmed.len()
        ));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^')))
    {
        return reject(format!("symbol contains invalid character {bad:?}"));
    }
    Ok(())
}

/// `end` must follow `start`, and `start` must not be after `today`.
pub fn validate_date_range(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<(), IngestError> {
    let key = format!("{start}:{end}");
    if end <= start {
        return Err(IngestError::invalid_request(
            key,
            format!("end date {end} must be after start date {start}"),
        ));
    }
    if start > today {
        return Err(IngestError::invalid_request(
            key,
            format!("start date {start} is in the future"),
        ));
    }
    Ok(())
}

pub fn validate_interval(interval: &str) -> Result<(), IngestError> {
    if VALID_INTERVALS.contains(&interval) {
        Ok(())
    } else {
        Err(IngestError::invalid_request(
            interval,
            format!(
                "unknown interval, expected one of {}",
                VALID_INTERVALS.join(", ")
            ),
        ))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn require_columns(df: &DataFrame, required: &[&str], what: &str) -> Result<(), String> {
    let names = df.get_column_names();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|r| !names.iter().any(|n| n.as_str() == *r))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("{what} missing required columns: {}", missing.join(", ")))
    }
}

fn float_column(df: &DataFrame, name: &str) -> Result<Float64Chunked, String> {
    df.column(name)
        .and_then(|col| col.cast(&DataType::Float64))
        .and_then(|col| col.f64().cloned())
        .map_err(|e| format!("column '{name}' is not numeric: {e}"))
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}
