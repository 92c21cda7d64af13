//! QuantData Core: market-data ingestion.
//!
//! This crate sits between consumers and an external market-data provider:
//! - Cache-or-fetch orchestration per data kind (equity bars, option chains,
//!   treasury yields)
//! - Persistent SQLite cache with per-kind tables, TTL expiry and maintenance
//! - Token-bucket rate limiting and exponential-backoff retry
//! - Validation of fetched frames before they are cached or returned
//! - Configuration from defaults, TOML and the environment

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod payload;
pub mod provider;
pub mod rate_limiter;
pub mod retry;
pub mod validate;

pub use cache::{CacheManager, CacheStore, CacheTable, SqliteCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::IngestConfig;
pub use error::IngestError;
pub use fetcher::Fetcher;
pub use payload::TabularResult;
pub use provider::{MarketDataProvider, YahooProvider};
pub use rate_limiter::TokenBucketLimiter;
pub use retry::ExponentialBackoff;
