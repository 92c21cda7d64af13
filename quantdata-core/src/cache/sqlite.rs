//! SQLite-backed [`CacheStore`].
//!
//! Each operation opens its own connection; the database runs in WAL mode so
//! readers and a writer can proceed concurrently, and SQLite's busy timeout
//! serializes competing writers. Timestamps are epoch milliseconds.

use super::{CacheMetadata, CacheStats, CacheStore, CacheTable, TableStats};
use crate::clock::{Clock, SystemClock};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::payload::TabularResult;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS equity_cache (
    cache_key   TEXT PRIMARY KEY,
    symbol      TEXT NOT NULL,
    start_date  TEXT NOT NULL,
    end_date    TEXT NOT NULL,
    interval    TEXT NOT NULL,
    data        BLOB NOT NULL,
    data_hash   TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_equity_symbol ON equity_cache(symbol);
CREATE INDEX IF NOT EXISTS idx_equity_expires ON equity_cache(expires_at);

CREATE TABLE IF NOT EXISTS options_cache (
    cache_key       TEXT PRIMARY KEY,
    symbol          TEXT NOT NULL,
    expiration_date TEXT,
    data            BLOB NOT NULL,
    data_hash       TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    expires_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_options_symbol ON options_cache(symbol);
CREATE INDEX IF NOT EXISTS idx_options_expires ON options_cache(expires_at);

CREATE TABLE IF NOT EXISTS fixed_income_cache (
    cache_key   TEXT PRIMARY KEY,
    instrument  TEXT NOT NULL,
    maturity    TEXT NOT NULL,
    start_date  TEXT NOT NULL,
    end_date    TEXT NOT NULL,
    data        BLOB NOT NULL,
    data_hash   TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fixed_income_instrument ON fixed_income_cache(instrument);
CREATE INDEX IF NOT EXISTS idx_fixed_income_expires ON fixed_income_cache(expires_at);
";

/// Cache database file.
pub struct SqliteCache {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl SqliteCache {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IngestError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open (creating if needed) the database at `path`, expiring entries
    /// against `clock`.
    pub fn open_with_clock(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IngestError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                IngestError::Cache(format!("create cache dir {}: {e}", parent.display()))
            })?;
        }

        let cache = Self { path, clock };
        let conn = cache.connect()?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %cache.path.display(), journal_mode = %mode, "cache database ready");
        Ok(cache)
    }

    /// Open the database named by the config.
    pub fn from_config(config: &IngestConfig, clock: Arc<dyn Clock>) -> Result<Self, IngestError> {
        config.ensure_cache_dir()?;
        Self::open_with_clock(config.cache_db_path(), clock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, IngestError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Database file plus its write-ahead log.
    fn size_on_disk(&self) -> u64 {
        let wal = PathBuf::from(format!("{}-wal", self.path.display()));
        [self.path.as_path(), wal.as_path()]
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

impl CacheStore for SqliteCache {
    fn get(&self, key: &str, table: CacheTable) -> Result<Option<TabularResult>, IngestError> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT data, data_hash FROM {} WHERE cache_key = ?1 AND expires_at > ?2",
            table.name()
        );
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(&sql, params![key, self.now_ms()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        let Some((data, stored_hash)) = row else {
            debug!(key, %table, "cache miss");
            return Ok(None);
        };

        let actual = blake3::hash(&data).to_hex().to_string();
        if actual != stored_hash {
            return Err(IngestError::Cache(format!(
                "hash mismatch for '{key}' in {table}: stored {stored_hash}, computed {actual}"
            )));
        }

        let result = TabularResult::decode(&data)?;
        debug!(key, %table, "cache hit");
        Ok(Some(result))
    }

    fn set(
        &self,
        key: &str,
        result: &TabularResult,
        table: CacheTable,
        ttl_seconds: u64,
        metadata: &CacheMetadata,
    ) -> Result<(), IngestError> {
        if ttl_seconds == 0 {
            return Err(IngestError::Cache(format!(
                "refusing to cache '{key}' with a zero TTL"
            )));
        }
        if metadata.table() != table {
            return Err(IngestError::Cache(format!(
                "{} metadata cannot be stored in {table}",
                metadata.table()
            )));
        }

        let data = result.encode()?;
        let hash = blake3::hash(&data).to_hex().to_string();
        let created_at = self.now_ms();
        let ttl_ms = i64::try_from(ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let expires_at = created_at.saturating_add(ttl_ms);

        let conn = self.connect()?;
        match metadata {
            CacheMetadata::Equity {
                symbol,
                start,
                end,
                interval,
            } => conn.execute(
                "INSERT OR REPLACE INTO equity_cache
                    (cache_key, symbol, start_date, end_date, interval,
                     data, data_hash, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![key, symbol, start, end, interval, data, hash, created_at, expires_at],
            )?,
            CacheMetadata::Options { symbol, expiration } => conn.execute(
                "INSERT OR REPLACE INTO options_cache
                    (cache_key, symbol, expiration_date,
                     data, data_hash, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![key, symbol, expiration, data, hash, created_at, expires_at],
            )?,
            CacheMetadata::FixedIncome {
                instrument,
                maturity,
                start,
                end,
            } => conn.execute(
                "INSERT OR REPLACE INTO fixed_income_cache
                    (cache_key, instrument, maturity, start_date, end_date,
                     data, data_hash, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![key, instrument, maturity, start, end, data, hash, created_at, expires_at],
            )?,
        };

        info!(key, %table, ttl_seconds, bytes = data.len(), "cached result");
        Ok(())
    }

    fn invalidate(
        &self,
        key: Option<&str>,
        table: Option<CacheTable>,
    ) -> Result<u64, IngestError> {
        let tables = match table {
            Some(table) => vec![table],
            None => CacheTable::ALL.to_vec(),
        };

        let conn = self.connect()?;
        let mut removed = 0u64;
        for table in tables {
            let n = match key {
                Some(key) => conn.execute(
                    &format!("DELETE FROM {} WHERE cache_key = ?1", table.name()),
                    params![key],
                )?,
                None => conn.execute(&format!("DELETE FROM {}", table.name()), [])?,
            };
            removed += n as u64;
        }

        info!(key = key.unwrap_or("*"), removed, "invalidated cache entries");
        Ok(removed)
    }

    fn cleanup_expired(&self) -> Result<u64, IngestError> {
        let now = self.now_ms();
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut removed = 0u64;
        for table in CacheTable::ALL {
            let n = tx.execute(
                &format!("DELETE FROM {} WHERE expires_at <= ?1", table.name()),
                params![now],
            )?;
            if n > 0 {
                debug!(%table, removed = n, "expired entries removed");
            }
            removed += n as u64;
        }
        tx.commit()?;

        info!(removed, "expired cache entries cleaned up");
        Ok(removed)
    }

    fn get_cache_stats(&self) -> Result<CacheStats, IngestError> {
        let now = self.now_ms();
        let conn = self.connect()?;
        let mut tables = BTreeMap::new();
        let mut total_entries = 0u64;

        for table in CacheTable::ALL {
            let (total, expired): (i64, i64) = conn.query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(CASE WHEN expires_at <= ?1 THEN 1 ELSE 0 END), 0)
                     FROM {}",
                    table.name()
                ),
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let total = total.max(0) as u64;
            let expired = expired.max(0) as u64;
            tables.insert(
                table.name().to_string(),
                TableStats {
                    total_entries: total,
                    active_entries: total - expired.min(total),
                    expired_entries: expired,
                },
            );
            total_entries += total;
        }

        Ok(CacheStats {
            path: self.path.clone(),
            size_bytes: self.size_on_disk(),
            total_entries,
            tables,
        })
    }
}
