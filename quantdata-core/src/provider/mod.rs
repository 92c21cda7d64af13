//! Market-data provider abstraction.
//!
//! A provider turns a request into frames or fails; it knows nothing about
//! caching, rate limits or retries. The fetcher layers those on top.

pub mod yahoo;

pub use yahoo::YahooProvider;

use crate::error::{classify_fetch_failure, IngestError};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use thiserror::Error;

/// Failure reported by a provider.
///
/// Structured variants carry their own classification; only `Response` and
/// `Other` are classified by message content.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network unreachable: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("response format changed: {0}")]
    Response(String),

    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Map onto the fetch family for the request keyed `key` about `subject`.
    pub fn classify(&self, key: &str, subject: &str) -> IngestError {
        match self {
            ProviderError::NotFound(_) | ProviderError::Http { status: 404, .. } => {
                IngestError::SymbolNotFound {
                    symbol: subject.to_string(),
                    message: self.to_string(),
                }
            }
            ProviderError::Http { status: 429, .. } => IngestError::RateLimited {
                key: key.to_string(),
                message: self.to_string(),
            },
            ProviderError::Http { status: 500..=599, .. } => IngestError::Fetch {
                key: key.to_string(),
                message: format!("server error: {self}"),
            },
            ProviderError::Http { .. } | ProviderError::Network(_) => IngestError::Fetch {
                key: key.to_string(),
                message: format!("failed to fetch data: {self}"),
            },
            ProviderError::Response(_) | ProviderError::Other(_) => {
                classify_fetch_failure(key, subject, self)
            }
        }
    }
}

impl From<PolarsError> for ProviderError {
    fn from(e: PolarsError) -> Self {
        ProviderError::Response(format!("frame construction: {e}"))
    }
}

/// Source of price history and option chains.
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Bars for `symbol` over `[start, end]` at `interval`, as a frame with
    /// the [`HISTORY_COLUMNS`] layout.
    fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: &str,
    ) -> Result<DataFrame, ProviderError>;

    /// Listed option expirations, ascending.
    fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, ProviderError>;

    /// `(calls, puts)` for one expiration, each with the [`OPTION_COLUMNS`]
    /// layout.
    fn option_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<(DataFrame, DataFrame), ProviderError>;
}

pub const HISTORY_COLUMNS: &[&str] = &[
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "adj_close",
    "volume",
];

pub const OPTION_COLUMNS: &[&str] = &[
    "contract",
    "strike",
    "last",
    "bid",
    "ask",
    "volume",
    "open_interest",
    "implied_volatility",
];

/// One OHLCV bar as reported; any field may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

/// One option contract quote.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionQuote {
    pub contract: String,
    pub strike: f64,
    pub last: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
    pub implied_volatility: Option<f64>,
}

/// Timestamp column type shared by every history frame.
pub fn timestamp_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

pub fn bars_to_frame(bars: &[PriceBar]) -> Result<DataFrame, ProviderError> {
    let timestamps: Vec<i64> = bars.iter().map(|b| b.timestamp.timestamp_millis()).collect();
    let field = |f: fn(&PriceBar) -> Option<f64>| bars.iter().map(f).collect::<Vec<_>>();

    Ok(DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps).cast(&timestamp_dtype())?,
        Column::new("open".into(), field(|b| b.open)),
        Column::new("high".into(), field(|b| b.high)),
        Column::new("low".into(), field(|b| b.low)),
        Column::new("close".into(), field(|b| b.close)),
        Column::new("adj_close".into(), field(|b| b.adj_close)),
        Column::new(
            "volume".into(),
            bars.iter().map(|b| b.volume).collect::<Vec<_>>(),
        ),
    ])?)
}

pub fn quotes_to_frame(quotes: &[OptionQuote]) -> Result<DataFrame, ProviderError> {
    Ok(DataFrame::new(vec![
        Column::new(
            "contract".into(),
            quotes.iter().map(|q| q.contract.as_str()).collect::<Vec<_>>(),
        ),
        Column::new(
            "strike".into(),
            quotes.iter().map(|q| q.strike).collect::<Vec<_>>(),
        ),
        Column::new("last".into(), quotes.iter().map(|q| q.last).collect::<Vec<_>>()),
        Column::new("bid".into(), quotes.iter().map(|q| q.bid).collect::<Vec<_>>()),
        Column::new("ask".into(), quotes.iter().map(|q| q.ask).collect::<Vec<_>>()),
        Column::new(
            "volume".into(),
            quotes.iter().map(|q| q.volume).collect::<Vec<_>>(),
        ),
        Column::new(
            "open_interest".into(),
            quotes.iter().map(|q| q.open_interest).collect::<Vec<_>>(),
        ),
        Column::new(
            "implied_volatility".into(),
            quotes.iter().map(|q| q.implied_volatility).collect::<Vec<_>>(),
        ),
    ])?)
}
