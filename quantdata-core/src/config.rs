//! Ingestion configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional TOML file, then `QUANT_FINANCE_*` environment variables. The
//! resulting [`IngestConfig`] is passed explicitly to every constructor.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "QUANT_FINANCE_";

/// Settings for caching, rate limiting, retry and validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory holding the cache database.
    pub cache_dir: PathBuf,
    /// Cache database filename inside `cache_dir`.
    pub cache_db_name: String,
    /// TTL for equity and fixed-income entries.
    pub default_ttl_seconds: u64,
    /// TTL for option-chain entries (chains go stale faster).
    pub options_ttl_seconds: u64,

    pub rate_limit_per_second: f64,
    pub rate_limit_burst: u32,

    pub max_retries: u32,
    /// Seconds.
    pub retry_base_delay: f64,
    /// Seconds.
    pub retry_max_delay: f64,
    pub retry_exponential_base: f64,

    /// Run the per-kind validator on fetched data.
    pub validate_data: bool,
    /// Relax validators and let multi-symbol fetches skip failures.
    pub allow_partial_data: bool,

    /// HTTP timeout for provider requests, seconds.
    pub request_timeout_secs: u64,

    /// Treasury maturity label (e.g. `10Y`) to provider symbol.
    pub treasury_symbols: BTreeMap<String, String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_db_name: "cache.sqlite".to_string(),
            default_ttl_seconds: 3600,
            options_ttl_seconds: 1800,
            rate_limit_per_second: 2.0,
            rate_limit_burst: 10,
            max_retries: 3,
            retry_base_delay: 1.0,
            retry_max_delay: 60.0,
            retry_exponential_base: 2.0,
            validate_data: true,
            allow_partial_data: false,
            request_timeout_secs: 30,
            treasury_symbols: default_treasury_symbols(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quant_finance")
}

/// One provider symbol per maturity. Maturities without a dedicated yield
/// index are left out rather than approximated; add them in the config file.
fn default_treasury_symbols() -> BTreeMap<String, String> {
    [("3M", "^IRX"), ("5Y", "^FVX"), ("10Y", "^TNX"), ("30Y", "^TYX")]
        .into_iter()
        .map(|(m, s)| (m.to_string(), s.to_string()))
        .collect()
}

impl IngestConfig {
    /// Load a config from a TOML file; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Configuration(format!("read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, IngestError> {
        toml::from_str(content)
            .map_err(|e| IngestError::Configuration(format!("parse config TOML: {e}")))
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, IngestError> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `QUANT_FINANCE_*` overrides read through `lookup`.
    ///
    /// `lookup` receives the full variable name. Values that fail to parse are
    /// reported, not skipped.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(dir) = get("CACHE_DIR") {
            self.cache_dir = expand_home(&dir);
        }
        if let Some(name) = get("CACHE_DB_NAME") {
            self.cache_db_name = name;
        }
        if let Some(v) = get("CACHE_TTL") {
            self.default_ttl_seconds = parse_env("CACHE_TTL", &v)?;
        }
        if let Some(v) = get("OPTIONS_CACHE_TTL") {
            self.options_ttl_seconds = parse_env("OPTIONS_CACHE_TTL", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT") {
            self.rate_limit_per_second = parse_env("RATE_LIMIT", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_BURST") {
            self.rate_limit_burst = parse_env("RATE_LIMIT_BURST", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_BASE_DELAY") {
            self.retry_base_delay = parse_env("RETRY_BASE_DELAY", &v)?;
        }
        if let Some(v) = get("RETRY_MAX_DELAY") {
            self.retry_max_delay = parse_env("RETRY_MAX_DELAY", &v)?;
        }
        if let Some(v) = get("RETRY_EXPONENTIAL_BASE") {
            self.retry_exponential_base = parse_env("RETRY_EXPONENTIAL_BASE", &v)?;
        }
        if let Some(v) = get("VALIDATE_DATA") {
            self.validate_data = parse_flag(&v);
        }
        if let Some(v) = get("ALLOW_PARTIAL_DATA") {
            self.allow_partial_data = parse_flag(&v);
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            self.request_timeout_secs = parse_env("REQUEST_TIMEOUT", &v)?;
        }

        Ok(self)
    }

    /// Reject values the limiter, retry strategy or cache cannot work with.
    pub fn validate(&self) -> Result<(), IngestError> {
        let fail = |msg: &str| Err(IngestError::Configuration(msg.to_string()));

        if !(self.rate_limit_per_second > 0.0) {
            return fail("rate_limit_per_second must be positive");
        }
        if self.rate_limit_burst == 0 {
            return fail("rate_limit_burst must be positive");
        }
        if !(self.retry_base_delay > 0.0) {
            return fail("retry_base_delay must be positive");
        }
        if !(self.retry_max_delay > 0.0) {
            return fail("retry_max_delay must be positive");
        }
        if !(self.retry_exponential_base > 1.0) {
            return fail("retry_exponential_base must be greater than 1");
        }
        if self.default_ttl_seconds == 0 || self.options_ttl_seconds == 0 {
            return fail("cache TTLs must be positive");
        }
        if self.cache_db_name.trim().is_empty() {
            return fail("cache_db_name must not be empty");
        }
        Ok(())
    }

    /// Full path to the cache database.
    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir.join(&self.cache_db_name)
    }

    /// Create the cache directory if it does not exist.
    pub fn ensure_cache_dir(&self) -> Result<(), IngestError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| {
            IngestError::Cache(format!(
                "create cache dir {}: {e}",
                self.cache_dir.display()
            ))
        })
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, IngestError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        IngestError::Configuration(format!("{ENV_PREFIX}{name}={value:?} is invalid: {e}"))
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
