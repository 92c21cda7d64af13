//! Yahoo Finance provider.
//!
//! History comes from the v8 chart API, expirations and chains from the v7
//! options API. Yahoo has no official API and changes its payloads without
//! notice; parse failures surface as [`ProviderError::Response`].

use super::{bars_to_frame, quotes_to_frame, MarketDataProvider, OptionQuote, PriceBar, ProviderError};
use crate::config::IngestConfig;
use chrono::{DateTime, NaiveDate};
use polars::prelude::DataFrame;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const BASE_URL: &str = "https://query2.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

// ── Chart API ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteSeries>,
    adjclose: Option<Vec<AdjCloseSeries>>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseSeries {
    adjclose: Vec<Option<f64>>,
}

// ── Options API ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsResponse {
    option_chain: OptionsEnvelope,
}

#[derive(Debug, Deserialize)]
struct OptionsEnvelope {
    result: Option<Vec<OptionsData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsData {
    #[serde(default)]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<OptionsBlock>,
}

#[derive(Debug, Deserialize)]
struct OptionsBlock {
    #[serde(default)]
    calls: Vec<ContractData>,
    #[serde(default)]
    puts: Vec<ContractData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractData {
    contract_symbol: String,
    strike: f64,
    #[serde(default)]
    last_price: f64,
    bid: Option<f64>,
    ask: Option<f64>,
    volume: Option<u64>,
    open_interest: Option<u64>,
    implied_volatility: Option<f64>,
}

impl From<ContractData> for OptionQuote {
    fn from(c: ContractData) -> Self {
        OptionQuote {
            contract: c.contract_symbol,
            strike: c.strike,
            last: c.last_price,
            bid: c.bid,
            ask: c.ask,
            volume: c.volume,
            open_interest: c.open_interest,
            implied_volatility: c.implied_volatility,
        }
    }
}

/// Blocking HTTP client for Yahoo Finance.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(BASE_URL, timeout)
    }

    /// Point the client at another host (a mirror or a local stub).
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Other(format!("build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self, ProviderError> {
        Self::new(Duration::from_secs(config.request_timeout_secs))
    }

    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate, interval: &str) -> String {
        let period1 = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        // Inclusive of the whole end day.
        let period2 = end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp() + 86_399;
        format!(
            "{}/v8/finance/chart/{symbol}?period1={period1}&period2={period2}\
             &interval={interval}&includeAdjustedClose=true",
            self.base_url
        )
    }

    fn options_url(&self, symbol: &str, expiration: Option<NaiveDate>) -> String {
        match expiration {
            Some(date) => format!(
                "{}/v7/finance/options/{symbol}?date={}",
                self.base_url,
                date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
            ),
            None => format!("{}/v7/finance/options/{symbol}", self.base_url),
        }
    }

    /// One GET, mapped onto [`ProviderError`]. No retries here.
    fn get_json<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, ProviderError> {
        debug!(url, "provider request");
        // Strip the URL: its epoch parameters must not leak into classification.
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ProviderError::Network(format!("{symbol}: {}", e.without_url()))
            } else {
                ProviderError::Other(format!("{symbol}: {}", e.without_url()))
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            });
        }

        let body = resp
            .text()
            .map_err(|e| ProviderError::Network(format!("read response for {symbol}: {}", e.without_url())))?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Response(format!("decode response for {symbol}: {e}")))
    }
}

fn api_error(symbol: &str, err: Option<ApiError>) -> ProviderError {
    match err {
        Some(e) if e.code.eq_ignore_ascii_case("not found") => {
            ProviderError::NotFound(format!("{symbol}: {}", e.description))
        }
        Some(e) => ProviderError::Response(format!("{}: {}", e.code, e.description)),
        None => ProviderError::Response("empty result with no error".into()),
    }
}

fn parse_chart(symbol: &str, resp: ChartResponse) -> Result<Vec<PriceBar>, ProviderError> {
    let ChartEnvelope { result, error } = resp.chart;
    let data = result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| api_error(symbol, error))?;

    // A valid symbol with no trading in the window has no timestamps.
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Response("no quote series".into()))?;
    let adj = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();
    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let timestamp = DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| ProviderError::Response(format!("invalid timestamp {ts}")))?;
        let bar = PriceBar {
            timestamp,
            open: at(&quote.open, i),
            high: at(&quote.high, i),
            low: at(&quote.low, i),
            close: at(&quote.close, i),
            adj_close: adj.as_deref().and_then(|a| at(a, i)),
            volume: quote.volume.get(i).copied().flatten(),
        };
        // Holidays come back as rows of nulls.
        if bar.open.is_none() && bar.high.is_none() && bar.low.is_none() && bar.close.is_none() {
            continue;
        }
        bars.push(bar);
    }
    Ok(bars)
}

fn parse_options(symbol: &str, resp: OptionsResponse) -> Result<OptionsData, ProviderError> {
    let OptionsEnvelope { result, error } = resp.option_chain;
    result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| api_error(symbol, error))
}

fn epoch_to_date(ts: i64) -> Result<NaiveDate, ProviderError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| ProviderError::Response(format!("invalid expiration timestamp {ts}")))
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: &str,
    ) -> Result<DataFrame, ProviderError> {
        let url = self.chart_url(symbol, start, end, interval);
        let resp: ChartResponse = self.get_json(&url, symbol)?;
        let bars = parse_chart(symbol, resp)?;
        if bars.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "no data found for {symbol} between {start} and {end}"
            )));
        }
        bars_to_frame(&bars)
    }

    fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        let resp: OptionsResponse = self.get_json(&self.options_url(symbol, None), symbol)?;
        let data = parse_options(symbol, resp)?;
        let mut dates = data
            .expiration_dates
            .into_iter()
            .map(epoch_to_date)
            .collect::<Result<Vec<_>, _>>()?;
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    fn option_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<(DataFrame, DataFrame), ProviderError> {
        let url = self.options_url(symbol, Some(expiration));
        let resp: OptionsResponse = self.get_json(&url, symbol)?;
        let block = parse_options(symbol, resp)?
            .options
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::NotFound(format!("no option chain for {symbol} expiring {expiration}"))
            })?;

        let calls: Vec<OptionQuote> = block.calls.into_iter().map(Into::into).collect();
        let puts: Vec<OptionQuote> = block.puts.into_iter().map(Into::into).collect();
        if calls.is_empty() && puts.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "no option data found for {symbol} expiring {expiration}"
            )));
        }
        Ok((quotes_to_frame(&calls)?, quotes_to_frame(&puts)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART_OK: &str = r#"{
        "chart": {
            "result": [{
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{
                        "open":   [187.15, null, 182.15],
                        "high":   [188.44, null, 183.09],
                        "low":    [183.89, null, 180.88],
                        "close":  [185.64, null, 181.91],
                        "volume": [82488700, null, 71983600]
                    }],
                    "adjclose": [{ "adjclose": [184.94, null, 181.22] }]
                }
            }],
            "error": null
        }
    }"#;

    const CHART_NOT_FOUND: &str = r#"{
        "chart": {
            "result": null,
            "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" }
        }
    }"#;

    const OPTIONS_OK: &str = r#"{
        "optionChain": {
            "result": [{
                "expirationDates": [1705622400, 1705017600],
                "options": [{
                    "calls": [{
                        "contractSymbol": "AAPL240119C00180000",
                        "strike": 180.0,
                        "lastPrice": 6.2,
                        "bid": 6.1,
                        "ask": 6.3,
                        "volume": 1500,
                        "openInterest": 20000,
                        "impliedVolatility": 0.21
                    }],
                    "puts": []
                }]
            }],
            "error": null
        }
    }"#;

    #[test]
    fn chart_skips_null_rows() {
        let resp: ChartResponse = serde_json::from_str(CHART_OK).unwrap();
        let bars = parse_chart("AAPL", resp).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, Some(185.64));
        assert_eq!(bars[1].adj_close, Some(181.22));
        assert_eq!(bars[1].volume, Some(71_983_600));
    }

    #[test]
    fn chart_not_found_maps_to_not_found() {
        let resp: ChartResponse = serde_json::from_str(CHART_NOT_FOUND).unwrap();
        let err = parse_chart("XXXX", resp).unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn options_payload_parses() {
        let resp: OptionsResponse = serde_json::from_str(OPTIONS_OK).unwrap();
        let data = parse_options("AAPL", resp).unwrap();
        assert_eq!(data.expiration_dates.len(), 2);
        let block = data.options.into_iter().next().unwrap();
        let quote: OptionQuote = block.calls.into_iter().next().unwrap().into();
        assert_eq!(quote.strike, 180.0);
        assert_eq!(quote.open_interest, Some(20_000));
        assert!(block.puts.is_empty());
    }

    #[test]
    fn refused_connection_is_network_error_without_url() {
        let provider = YahooProvider::with_base_url("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let err = provider
            .history("SPY", d(2014, 7, 1), d(2014, 7, 31), "1d")
            .unwrap_err();
        match err {
            ProviderError::Network(message) => {
                assert!(message.starts_with("SPY: "), "{message}");
                assert!(!message.contains("period1"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn urls() {
        let provider = YahooProvider::with_base_url("http://localhost:9/", Duration::from_secs(1)).unwrap();
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let url = provider.chart_url("SPY", d(2024, 1, 1), d(2024, 1, 2), "1d");
        assert_eq!(
            url,
            "http://localhost:9/v8/finance/chart/SPY?period1=1704067200&period2=1704239999\
             &interval=1d&includeAdjustedClose=true"
        );
        assert!(provider
            .options_url("SPY", Some(d(2024, 1, 19)))
            .ends_with("?date=1705622400"));
    }

    #[test]
    fn epoch_dates() {
        assert_eq!(
            epoch_to_date(1705622400).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 19).unwrap()
        );
    }
}
