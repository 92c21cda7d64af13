//! Maintenance over a [`CacheStore`]: expiry sweeps, summaries and guarded
//! bulk invalidation.

use super::{CacheStore, CacheTable, TableStats};
use crate::clock::{Clock, SystemClock};
use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Aggregated view of the store at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub generated_at: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub total_entries: u64,
    pub active_entries: u64,
    pub expired_entries: u64,
    pub tables: BTreeMap<String, TableStats>,
}

impl CacheSummary {
    /// Share of entries that have expired; zero for an empty store.
    pub fn expired_ratio(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            self.expired_entries as f64 / self.total_entries as f64
        }
    }
}

impl fmt::Display for CacheSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache Summary")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Location:      {}", self.path.display())?;
        writeln!(f, "Size:          {}", format_size(self.size_bytes))?;
        writeln!(f, "Total entries: {}", self.total_entries)?;
        writeln!(f, "Active:        {}", self.active_entries)?;
        writeln!(f, "Expired:       {}", self.expired_entries)?;
        writeln!(f)?;
        writeln!(f, "By table:")?;
        writeln!(f, "{}", "-".repeat(50))?;
        for (name, stats) in &self.tables {
            writeln!(
                f,
                "  {name:<20} total {:>6}  active {:>6}  expired {:>6}",
                stats.total_entries, stats.active_entries, stats.expired_entries
            )?;
        }
        Ok(())
    }
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

pub struct CacheManager {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self::with_clock(cache, Arc::new(SystemClock))
    }

    pub fn with_clock(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Remove every expired entry; returns the count.
    pub fn cleanup_expired_entries(&self) -> Result<u64, IngestError> {
        info!("starting cache cleanup");
        let removed = self.cache.cleanup_expired()?;
        info!(removed, "cache cleanup complete");
        Ok(removed)
    }

    pub fn get_summary(&self) -> Result<CacheSummary, IngestError> {
        let stats = self.cache.get_cache_stats()?;
        let (active, expired) = stats
            .tables
            .values()
            .fold((0, 0), |(a, e), t| (a + t.active_entries, e + t.expired_entries));

        Ok(CacheSummary {
            generated_at: self.clock.now(),
            path: stats.path,
            size_bytes: stats.size_bytes,
            total_entries: stats.total_entries,
            active_entries: active,
            expired_entries: expired,
            tables: stats.tables,
        })
    }

    /// Empty every table. Without `confirm` nothing is deleted and `Ok(None)`
    /// is returned; otherwise the number of entries removed.
    pub fn invalidate_all(&self, confirm: bool) -> Result<Option<u64>, IngestError> {
        if !confirm {
            warn!("invalidating the whole cache requires confirmation; nothing was deleted");
            return Ok(None);
        }
        warn!("invalidating entire cache");
        let removed = self.cache.invalidate(None, None)?;
        info!(removed, "cache invalidated");
        Ok(Some(removed))
    }

    /// Empty one table, with the same confirmation guard as
    /// [`invalidate_all`](Self::invalidate_all).
    pub fn invalidate_table(
        &self,
        table: CacheTable,
        confirm: bool,
    ) -> Result<Option<u64>, IngestError> {
        if !confirm {
            warn!(%table, "table invalidation requires confirmation; nothing was deleted");
            return Ok(None);
        }
        warn!(%table, "invalidating table");
        let removed = self.cache.invalidate(None, Some(table))?;
        info!(%table, removed, "table invalidated");
        Ok(Some(removed))
    }

    /// Sweep expired entries when at least `min_expired_count` have expired
    /// and they make up at least `max_expired_ratio` of the store. An empty
    /// store never triggers. Returns whether a sweep ran.
    pub fn auto_cleanup_if_needed(
        &self,
        max_expired_ratio: f64,
        min_expired_count: u64,
    ) -> Result<bool, IngestError> {
        let summary = self.get_summary()?;
        if summary.total_entries == 0 {
            return Ok(false);
        }

        let ratio = summary.expired_ratio();
        if summary.expired_entries >= min_expired_count && ratio >= max_expired_ratio {
            info!(
                expired = summary.expired_entries,
                total = summary.total_entries,
                ratio,
                "auto-cleanup triggered"
            );
            self.cleanup_expired_entries()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMetadata, SqliteCache};
    use crate::clock::ManualClock;
    use crate::payload::TabularResult;
    use polars::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        manager: CacheManager,
        cache: Arc<SqliteCache>,
        clock: Arc<ManualClock>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let cache =
            Arc::new(SqliteCache::open_with_clock(dir.path().join("c.sqlite"), clock.clone()).unwrap());
        let manager = CacheManager::with_clock(cache.clone(), clock.clone());
        Fixture {
            manager,
            cache,
            clock,
            _dir: dir,
        }
    }

    fn put(cache: &SqliteCache, key: &str, ttl: u64) {
        let df = DataFrame::new(vec![Column::new("close".into(), vec![1.0, 2.0])]).unwrap();
        let meta = CacheMetadata::Options {
            symbol: key.to_string(),
            expiration: None,
        };
        cache
            .set(key, &TabularResult::Single(df), CacheTable::Options, ttl, &meta)
            .unwrap();
    }

    #[test]
    fn destructive_ops_need_confirmation() {
        let fx = fixture();
        put(&fx.cache, "a", 60);

        assert_eq!(fx.manager.invalidate_all(false).unwrap(), None);
        assert_eq!(fx.manager.invalidate_table(CacheTable::Options, false).unwrap(), None);
        assert_eq!(fx.manager.get_summary().unwrap().total_entries, 1);

        assert_eq!(fx.manager.invalidate_table(CacheTable::Equity, true).unwrap(), Some(0));
        assert_eq!(fx.manager.invalidate_all(true).unwrap(), Some(1));
        assert_eq!(fx.manager.get_summary().unwrap().total_entries, 0);
    }

    #[test]
    fn summary_totals_active_and_expired() {
        let fx = fixture();
        put(&fx.cache, "short", 10);
        put(&fx.cache, "long", 1000);
        fx.clock.advance(Duration::from_secs(11));

        let summary = fx.manager.get_summary().unwrap();
        assert_eq!(summary.total_entries, 2);
        assert_eq!(summary.active_entries, 1);
        assert_eq!(summary.expired_entries, 1);
        assert_eq!(summary.expired_ratio(), 0.5);
        assert!(summary.to_string().contains("options_cache"));
    }

    #[test]
    fn auto_cleanup_needs_both_thresholds() {
        let fx = fixture();
        for i in 0..3 {
            put(&fx.cache, &format!("old{i}"), 10);
        }
        put(&fx.cache, "fresh", 1000);
        fx.clock.advance(Duration::from_secs(11));

        // 3 of 4 expired: ratio is met but the count is not.
        assert!(!fx.manager.auto_cleanup_if_needed(0.2, 5).unwrap());
        // Count met, ratio not.
        assert!(!fx.manager.auto_cleanup_if_needed(0.9, 1).unwrap());

        assert!(fx.manager.auto_cleanup_if_needed(0.5, 3).unwrap());
        let summary = fx.manager.get_summary().unwrap();
        assert_eq!(summary.total_entries, 1);
        assert_eq!(summary.expired_entries, 0);
    }

    #[test]
    fn auto_cleanup_never_fires_on_empty_store() {
        let fx = fixture();
        assert!(!fx.manager.auto_cleanup_if_needed(0.0, 0).unwrap());
    }

    #[test]
    fn sizes_format() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
