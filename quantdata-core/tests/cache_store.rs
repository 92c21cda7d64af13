//! SQLite store and maintenance behaviour shared across threads and handles.

use chrono::{NaiveDate, TimeZone, Utc};
use polars::prelude::*;
use quantdata_core::cache::{CacheManager, CacheMetadata, CacheStore, CacheTable, SqliteCache};
use quantdata_core::{Clock, ManualClock, TabularResult};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn frame(rows: usize) -> TabularResult {
    TabularResult::Single(
        DataFrame::new(vec![Column::new("close".into(), vec![100.0; rows])]).unwrap(),
    )
}

fn equity_meta(symbol: &str) -> CacheMetadata {
    CacheMetadata::Equity {
        symbol: symbol.to_string(),
        start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        interval: "1d".into(),
    }
}

fn store(dir: &TempDir) -> (Arc<SqliteCache>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap(),
    ));
    let shared: Arc<dyn Clock> = clock.clone();
    let cache = SqliteCache::open_with_clock(dir.path().join("cache.sqlite"), shared).unwrap();
    (Arc::new(cache), clock)
}

#[test]
fn concurrent_writers_do_not_lose_entries() {
    let dir = TempDir::new().unwrap();
    let (cache, _clock) = store(&dir);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..20 {
                    let symbol = format!("T{t}S{i}");
                    cache
                        .set(
                            &format!("equity:{symbol}"),
                            &frame(i + 1),
                            CacheTable::Equity,
                            3600,
                            &equity_meta(&symbol),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.get_cache_stats().unwrap();
    assert_eq!(stats.total_entries, 160);
    assert_eq!(stats.table(CacheTable::Equity).active_entries, 160);
}

#[test]
fn concurrent_upserts_of_one_key_leave_one_entry() {
    let dir = TempDir::new().unwrap();
    let (cache, _clock) = store(&dir);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    cache
                        .set("equity:SPY", &frame(t + 1), CacheTable::Equity, 3600, &equity_meta("SPY"))
                        .unwrap();
                    // Readers always see a complete payload.
                    let hit = cache.get("equity:SPY", CacheTable::Equity).unwrap();
                    assert!(hit.is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.get_cache_stats().unwrap().total_entries, 1);
}

#[test]
fn entries_survive_reopening() {
    let dir = TempDir::new().unwrap();
    {
        let (cache, _clock) = store(&dir);
        cache
            .set("equity:SPY", &frame(3), CacheTable::Equity, 3600, &equity_meta("SPY"))
            .unwrap();
    }
    let (reopened, _clock) = store(&dir);
    let hit = reopened.get("equity:SPY", CacheTable::Equity).unwrap().unwrap();
    assert_eq!(hit.shape().rows, 3);
}

#[test]
fn manager_sweeps_only_past_threshold() {
    let dir = TempDir::new().unwrap();
    let (cache, clock) = store(&dir);
    let shared: Arc<dyn Clock> = clock.clone();
    let manager = CacheManager::with_clock(cache.clone(), shared);

    for i in 0..6 {
        let ttl = if i < 4 { 60 } else { 7200 };
        let symbol = format!("S{i}");
        cache
            .set(&format!("equity:{symbol}"), &frame(1), CacheTable::Equity, ttl, &equity_meta(&symbol))
            .unwrap();
    }
    clock.advance(Duration::from_secs(120));

    let summary = manager.get_summary().unwrap();
    assert_eq!(summary.total_entries, 6);
    assert_eq!(summary.expired_entries, 4);
    assert_eq!(summary.active_entries, 2);
    assert!(summary.to_string().contains("Expired:       4"));

    // Ratio 4/6 is below 0.9: no sweep.
    assert!(!manager.auto_cleanup_if_needed(0.9, 1).unwrap());
    // Count below the minimum: no sweep.
    assert!(!manager.auto_cleanup_if_needed(0.5, 5).unwrap());
    assert!(manager.auto_cleanup_if_needed(0.5, 4).unwrap());

    let after = manager.get_summary().unwrap();
    assert_eq!(after.total_entries, 2);
    assert_eq!(after.expired_entries, 0);
}

#[test]
fn guarded_invalidation_needs_confirmation() {
    let dir = TempDir::new().unwrap();
    let (cache, _clock) = store(&dir);
    let manager = CacheManager::new(cache.clone());

    cache
        .set("equity:SPY", &frame(1), CacheTable::Equity, 3600, &equity_meta("SPY"))
        .unwrap();
    cache
        .set(
            "options:SPY:nearest",
            &TabularResult::Paired {
                calls: DataFrame::new(vec![Column::new("strike".into(), vec![500.0])]).unwrap(),
                puts: DataFrame::new(vec![Column::new("strike".into(), vec![480.0])]).unwrap(),
            },
            CacheTable::Options,
            1800,
            &CacheMetadata::Options {
                symbol: "SPY".into(),
                expiration: None,
            },
        )
        .unwrap();

    assert_eq!(manager.invalidate_table(CacheTable::Options, false).unwrap(), None);
    assert_eq!(cache.get_cache_stats().unwrap().total_entries, 2);

    assert_eq!(manager.invalidate_table(CacheTable::Options, true).unwrap(), Some(1));
    assert_eq!(manager.invalidate_all(false).unwrap(), None);
    assert_eq!(manager.invalidate_all(true).unwrap(), Some(1));
    assert_eq!(cache.get_cache_stats().unwrap().total_entries, 0);
}
