//! Option chains: calls and puts for one expiration.

use super::{DataKind, Fetcher};
use crate::cache::{CacheMetadata, CacheTable};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::payload::{ResultKind, TabularResult};
use crate::provider::{MarketDataProvider, ProviderError};
use crate::validate;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Chain request; no expiration means the nearest listed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionsRequest {
    pub symbol: String,
    pub expiration: Option<NaiveDate>,
}

impl OptionsRequest {
    pub fn new(symbol: &str, expiration: Option<NaiveDate>) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            expiration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionSide {
    Calls,
    Puts,
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionSide::Calls => f.write_str("calls"),
            OptionSide::Puts => f.write_str("puts"),
        }
    }
}

impl FromStr for OptionSide {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "call" | "calls" => Ok(OptionSide::Calls),
            "put" | "puts" => Ok(OptionSide::Puts),
            other => Err(IngestError::invalid_request(
                other,
                "option side must be 'calls' or 'puts'",
            )),
        }
    }
}

/// Marker for the option-chain data kind.
pub struct Options;

impl DataKind for Options {
    type Request = OptionsRequest;
    const TABLE: CacheTable = CacheTable::Options;
    const RESULT: ResultKind = ResultKind::Paired;

    fn check_request(
        req: &OptionsRequest,
        _config: &IngestConfig,
        _today: NaiveDate,
    ) -> Result<(), IngestError> {
        validate::validate_symbol(&req.symbol)
    }

    fn cache_key(req: &OptionsRequest) -> String {
        match req.expiration {
            Some(date) => format!("options:{}:{date}", req.symbol),
            None => format!("options:{}:nearest", req.symbol),
        }
    }

    fn metadata(req: &OptionsRequest) -> CacheMetadata {
        CacheMetadata::Options {
            symbol: req.symbol.clone(),
            expiration: req.expiration,
        }
    }

    fn subject(req: &OptionsRequest) -> String {
        req.symbol.clone()
    }

    fn ttl_seconds(config: &IngestConfig) -> u64 {
        config.options_ttl_seconds
    }

    fn fetch(
        provider: &dyn MarketDataProvider,
        _config: &IngestConfig,
        req: &OptionsRequest,
    ) -> Result<TabularResult, ProviderError> {
        let expiration = match req.expiration {
            Some(date) => date,
            None => provider
                .option_expirations(&req.symbol)?
                .into_iter()
                .min()
                .ok_or_else(|| {
                    ProviderError::NotFound(format!("no option expirations for {}", req.symbol))
                })?,
        };

        let (calls, puts) = provider.option_chain(&req.symbol, expiration)?;
        info!(
            symbol = %req.symbol,
            %expiration,
            calls = calls.height(),
            puts = puts.height(),
            "fetched option chain"
        );
        Ok(TabularResult::Paired { calls, puts })
    }

    fn validate(result: &TabularResult, strict: bool) -> Result<(), String> {
        match result {
            TabularResult::Paired { calls, puts } => validate::validate_options(calls, puts, strict),
            TabularResult::Single(_) => Err("expected a calls/puts pair".into()),
        }
    }
}

impl Fetcher {
    /// `(calls, puts)` for `symbol` at `expiration` (nearest when `None`).
    pub fn fetch_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
        use_cache: bool,
    ) -> Result<(DataFrame, DataFrame), IngestError> {
        let req = OptionsRequest::new(symbol, expiration);
        let result = self.get_cached_or_fetch::<Options>(&req, use_cache)?;
        let kind = result.kind();
        result.into_paired().ok_or_else(|| IngestError::Fetch {
            key: Options::cache_key(&req),
            message: format!("expected a calls/puts pair, got a {kind} result"),
        })
    }

    /// One side of the chain; shares the cache entry with the full chain.
    pub fn fetch_option_side(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
        side: OptionSide,
        use_cache: bool,
    ) -> Result<DataFrame, IngestError> {
        let (calls, puts) = self.fetch_option_chain(symbol, expiration, use_cache)?;
        Ok(match side {
            OptionSide::Calls => calls,
            OptionSide::Puts => puts,
        })
    }

    /// Listed expirations, ascending. Never cached.
    pub fn get_available_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, IngestError> {
        let symbol = symbol.trim().to_uppercase();
        validate::validate_symbol(&symbol)?;

        let key = format!("expirations:{symbol}");
        let dates = self.call_provider(&key, &symbol, || {
            self.provider.option_expirations(&symbol)
        })?;
        if dates.is_empty() {
            warn!(%symbol, "no option expirations listed");
        } else {
            info!(%symbol, count = dates.len(), "found option expirations");
        }
        Ok(dates)
    }

    pub fn invalidate_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> Result<u64, IngestError> {
        self.invalidate::<Options>(&OptionsRequest::new(symbol, expiration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_distinguish_nearest() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();
        assert_eq!(
            Options::cache_key(&OptionsRequest::new("aapl", Some(date))),
            "options:AAPL:2024-01-19"
        );
        assert_eq!(
            Options::cache_key(&OptionsRequest::new("AAPL", None)),
            "options:AAPL:nearest"
        );
    }

    #[test]
    fn sides_parse() {
        assert_eq!("calls".parse::<OptionSide>().unwrap(), OptionSide::Calls);
        assert_eq!("PUT".parse::<OptionSide>().unwrap(), OptionSide::Puts);
        assert!("straddle".parse::<OptionSide>().is_err());
    }

    #[test]
    fn options_use_their_own_ttl() {
        let config = IngestConfig::default();
        assert_eq!(Options::ttl_seconds(&config), config.options_ttl_seconds);
    }
}
