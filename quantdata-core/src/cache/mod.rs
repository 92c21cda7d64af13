//! Persistent cache of fetched results.
//!
//! Three fixed namespaces, one per data kind. Each entry carries its kind's
//! metadata, an encoded [`TabularResult`] and an expiry; reads past expiry are
//! misses and expired rows stay on disk until [`CacheStore::cleanup_expired`].

pub mod manager;
pub mod sqlite;

pub use manager::{CacheManager, CacheSummary};
pub use sqlite::SqliteCache;

use crate::error::IngestError;
use crate::payload::TabularResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheTable {
    Equity,
    Options,
    FixedIncome,
}

impl CacheTable {
    pub const ALL: [CacheTable; 3] = [CacheTable::Equity, CacheTable::Options, CacheTable::FixedIncome];

    /// Storage table name.
    pub fn name(self) -> &'static str {
        match self {
            CacheTable::Equity => "equity_cache",
            CacheTable::Options => "options_cache",
            CacheTable::FixedIncome => "fixed_income_cache",
        }
    }
}

impl fmt::Display for CacheTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheTable {
    type Err = IngestError;

    /// Accepts the table name (`equity_cache`) or the short kind (`equity`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equity" | "equity_cache" => Ok(CacheTable::Equity),
            "options" | "options_cache" => Ok(CacheTable::Options),
            "fixed_income" | "fixed_income_cache" => Ok(CacheTable::FixedIncome),
            other => Err(IngestError::Configuration(format!(
                "unknown cache table '{other}'"
            ))),
        }
    }
}

/// Per-kind metadata stored alongside an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMetadata {
    Equity {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
        interval: String,
    },
    /// `expiration` is `None` when the request asked for the nearest expiry.
    Options {
        symbol: String,
        expiration: Option<NaiveDate>,
    },
    FixedIncome {
        instrument: String,
        maturity: String,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl CacheMetadata {
    /// The table this metadata belongs in.
    pub fn table(&self) -> CacheTable {
        match self {
            CacheMetadata::Equity { .. } => CacheTable::Equity,
            CacheMetadata::Options { .. } => CacheTable::Options,
            CacheMetadata::FixedIncome { .. } => CacheTable::FixedIncome,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub total_entries: u64,
    pub active_entries: u64,
    pub expired_entries: u64,
}

/// Snapshot of the store's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub total_entries: u64,
    /// Keyed by storage table name.
    pub tables: BTreeMap<String, TableStats>,
}

impl CacheStats {
    pub fn table(&self, table: CacheTable) -> TableStats {
        self.tables.get(table.name()).copied().unwrap_or_default()
    }
}

/// Keyed, TTL-bounded storage for fetched results.
///
/// Implementations own their concurrency control; callers share one store
/// across threads without extra locking.
pub trait CacheStore: Send + Sync {
    /// The live entry for `(table, key)`, or `None` when absent or expired.
    fn get(&self, key: &str, table: CacheTable) -> Result<Option<TabularResult>, IngestError>;

    /// Insert or replace `(table, key)`, expiring `ttl_seconds` from now.
    fn set(
        &self,
        key: &str,
        result: &TabularResult,
        table: CacheTable,
        ttl_seconds: u64,
        metadata: &CacheMetadata,
    ) -> Result<(), IngestError>;

    /// Delete entries; returns how many were removed.
    ///
    /// `key` and `table` narrow the deletion: both given removes one entry,
    /// only `table` empties that table, neither empties every table. A key
    /// without a table is removed from every table.
    fn invalidate(&self, key: Option<&str>, table: Option<CacheTable>)
        -> Result<u64, IngestError>;

    /// Delete every expired entry; returns the count.
    fn cleanup_expired(&self) -> Result<u64, IngestError>;

    fn get_cache_stats(&self) -> Result<CacheStats, IngestError>;
}
