//! Criterion benchmarks for ingestion hot paths.
//!
//! Benchmarks:
//! 1. Token bucket acquisition (uncontended and with refill arithmetic)
//! 2. Payload codec (Parquet encode/decode of single and paired results)
//! 3. Frame validation (equity bars, option chains)

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polars::prelude::DataFrame;
use std::sync::Arc;
use std::time::Duration;

use quantdata_core::provider::{bars_to_frame, quotes_to_frame, OptionQuote, PriceBar};
use quantdata_core::validate::{validate_equity, validate_options};
use quantdata_core::{Clock, ManualClock, TabularResult, TokenBucketLimiter};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(n: usize) -> DataFrame {
    let base = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    let bars: Vec<PriceBar> = (0..n)
        .map(|i| {
            let day = base + ChronoDuration::days(i as i64);
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            PriceBar {
                timestamp: Utc.from_utc_datetime(&day.and_hms_opt(14, 30, 0).unwrap()),
                open: Some(close - 0.3),
                high: Some(close + 1.5),
                low: Some(close - 1.5),
                close: Some(close),
                adj_close: Some(close),
                volume: Some(1_000_000 + (i as u64 % 500_000)),
            }
        })
        .collect();
    bars_to_frame(&bars).unwrap()
}

fn make_side(n: usize, kind: char) -> DataFrame {
    let quotes: Vec<OptionQuote> = (0..n)
        .map(|i| {
            let strike = 400.0 + i as f64 * 5.0;
            OptionQuote {
                contract: format!("SPY240614{kind}{:08}", (strike * 1000.0) as u64),
                strike,
                last: 1.0 + i as f64 * 0.05,
                bid: Some(0.95),
                ask: Some(1.05),
                volume: Some(100),
                open_interest: Some(1_000),
                implied_volatility: Some(0.2),
            }
        })
        .collect();
    quotes_to_frame(&quotes).unwrap()
}

// ── 1. Token bucket ──────────────────────────────────────────────────

fn bench_token_bucket(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_bucket");

    group.bench_function("try_acquire_full_bucket", |b| {
        let limiter = TokenBucketLimiter::new(1_000_000.0, 1_000_000).unwrap();
        b.iter(|| black_box(limiter.try_acquire()));
    });

    group.bench_function("acquire_with_refill", |b| {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let shared: Arc<dyn Clock> = clock.clone();
        let limiter = TokenBucketLimiter::with_clock(10.0, 10, shared).unwrap();
        b.iter(|| {
            clock.advance(Duration::from_millis(100));
            black_box(limiter.acquire(1, true, None).unwrap());
        });
    });

    group.finish();
}

// ── 2. Payload codec ─────────────────────────────────────────────────

fn bench_payload_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_codec");

    for rows in [252usize, 2_520] {
        let single = TabularResult::Single(make_bars(rows));
        let blob = single.encode().unwrap();

        group.bench_with_input(BenchmarkId::new("encode_bars", rows), &single, |b, r| {
            b.iter(|| black_box(r.encode().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode_bars", rows), &blob, |b, blob| {
            b.iter(|| black_box(TabularResult::decode(blob).unwrap()));
        });
    }

    let paired = TabularResult::Paired {
        calls: make_side(120, 'C'),
        puts: make_side(120, 'P'),
    };
    let blob = paired.encode().unwrap();
    group.bench_function("encode_chain_120", |b| {
        b.iter(|| black_box(paired.encode().unwrap()));
    });
    group.bench_function("decode_chain_120", |b| {
        b.iter(|| black_box(TabularResult::decode(&blob).unwrap()));
    });

    group.finish();
}

// ── 3. Validation ────────────────────────────────────────────────────

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    let bars = make_bars(2_520);
    group.bench_function("equity_strict_2520", |b| {
        b.iter(|| black_box(validate_equity(&bars, true).is_ok()));
    });

    let (calls, puts) = (make_side(120, 'C'), make_side(120, 'P'));
    group.bench_function("options_120", |b| {
        b.iter(|| black_box(validate_options(&calls, &puts, true).is_ok()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_token_bucket,
    bench_payload_codec,
    bench_validation,
);
criterion_main!(benches);
