//! QuantData CLI: fetch market data through the cache and manage the cache.
//!
//! Commands:
//! - `equity` / `equities`: historical bars for one or many symbols
//! - `options` / `expirations`: option chains and their listed expirations
//! - `yields` / `curve` / `maturities`: treasury yields and the yield curve
//! - `cache status|cleanup|auto-cleanup|clear|invalidate`: cache maintenance

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use polars::prelude::*;
use quantdata_core::cache::manager::format_size;
use quantdata_core::fetcher::OptionSide;
use quantdata_core::logging::{init_logging, LogFormat};
use quantdata_core::{CacheManager, CacheStore, CacheTable, Fetcher, IngestConfig, SqliteCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "quantdata",
    about = "QuantData CLI: cached market-data ingestion"
)]
struct Cli {
    /// TOML config file. Environment overrides (QUANT_FINANCE_*) still apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty, compact or json.
    #[arg(long, global = true, default_value = "compact", value_parser = parse_log_format)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Historical bars for one symbol.
    Equity {
        symbol: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,

        /// Bar interval (1d, 1wk, 1h, ...).
        #[arg(long, default_value = "1d")]
        interval: String,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Historical bars for several symbols, fetched in parallel.
    Equities {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,

        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,

        #[arg(long, default_value = "1d")]
        interval: String,

        /// Skip symbols that fail instead of aborting.
        #[arg(long, default_value_t = false)]
        partial: bool,

        /// Don't read or write the cache.
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Directory for one Parquet file per symbol.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Option chain for one expiration (nearest when omitted).
    Options {
        symbol: String,

        #[arg(long, value_parser = parse_date)]
        expiration: Option<NaiveDate>,

        /// Only one side of the chain: calls or puts.
        #[arg(long, value_parser = parse_side)]
        side: Option<OptionSide>,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Listed option expirations.
    Expirations { symbol: String },
    /// Treasury yields, one column per maturity.
    Yields {
        /// Maturities (e.g. 10Y 30Y). Defaults to 10Y and 30Y.
        maturities: Vec<String>,

        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,

        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Yield curve across every configured maturity.
    Curve {
        /// Curve date (YYYY-MM-DD). Defaults to today.
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Configured treasury maturities.
    Maturities,
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(clap::Args)]
struct FetchArgs {
    /// Don't read or write the cache.
    #[arg(long, default_value_t = false)]
    no_cache: bool,

    /// Write the result to this Parquet file instead of printing it.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cache size and entry counts per table.
    Status {
        /// Print the summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Remove expired entries.
    Cleanup,
    /// Remove expired entries only when they exceed the given share and count.
    AutoCleanup {
        #[arg(long, default_value_t = 0.5)]
        max_expired_ratio: f64,

        #[arg(long, default_value_t = 100)]
        min_expired_count: u64,
    },
    /// Delete every entry in every table.
    Clear {
        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Delete one entry, or a whole table.
    Invalidate {
        /// Table: equity, options or fixed_income.
        table: String,

        /// Cache key of a single entry. Without it the whole table is cleared.
        #[arg(long)]
        key: Option<String>,

        /// Required when clearing a whole table.
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    let mut config = load_config(cli.config.as_deref())?;
    if let Commands::Equities { partial: true, .. } = cli.command {
        config.allow_partial_data = true;
    }

    match cli.command {
        Commands::Cache { action } => run_cache(&config, action),
        Commands::Maturities => {
            let fetcher = Fetcher::from_config(config)?;
            for maturity in fetcher.get_available_maturities() {
                println!("{maturity}");
            }
            Ok(())
        }
        command => run_fetch(Fetcher::from_config(config)?, command),
    }
}

fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    let base = match path {
        Some(path) => IngestConfig::from_file(path)?,
        None => IngestConfig::default(),
    };
    let config = base.with_env_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

fn run_fetch(fetcher: Fetcher, command: Commands) -> Result<()> {
    match command {
        Commands::Equity {
            symbol,
            start,
            end,
            interval,
            fetch,
        } => {
            let df = fetcher.fetch_historical(&symbol, start, end, &interval, !fetch.no_cache)?;
            emit(df, fetch.output.as_deref())
        }
        Commands::Equities {
            symbols,
            start,
            end,
            interval,
            no_cache,
            output_dir,
            ..
        } => {
            let frames = fetcher.fetch_multiple(&symbols, start, end, &interval, !no_cache)?;
            for (symbol, df) in frames {
                match &output_dir {
                    Some(dir) => {
                        std::fs::create_dir_all(dir)
                            .with_context(|| format!("create {}", dir.display()))?;
                        emit(df, Some(&dir.join(format!("{symbol}.parquet"))))?;
                    }
                    None => {
                        println!("=== {symbol} ===");
                        emit(df, None)?;
                    }
                }
            }
            Ok(())
        }
        Commands::Options {
            symbol,
            expiration,
            side,
            fetch,
        } => {
            let use_cache = !fetch.no_cache;
            match side {
                Some(side) => {
                    let df = fetcher.fetch_option_side(&symbol, expiration, side, use_cache)?;
                    emit(df, fetch.output.as_deref())
                }
                None => {
                    let (calls, puts) = fetcher.fetch_option_chain(&symbol, expiration, use_cache)?;
                    match fetch.output.as_deref() {
                        Some(path) => {
                            emit(calls, Some(&side_path(path, "calls")))?;
                            emit(puts, Some(&side_path(path, "puts")))
                        }
                        None => {
                            println!("=== calls ===");
                            emit(calls, None)?;
                            println!("=== puts ===");
                            emit(puts, None)
                        }
                    }
                }
            }
        }
        Commands::Expirations { symbol } => {
            for date in fetcher.get_available_expirations(&symbol)? {
                println!("{date}");
            }
            Ok(())
        }
        Commands::Yields {
            maturities,
            start,
            end,
            fetch,
        } => {
            let df = fetcher.fetch_treasury_yields(&maturities, start, end, !fetch.no_cache)?;
            emit(df, fetch.output.as_deref())
        }
        Commands::Curve { date, fetch } => {
            let df = fetcher.fetch_yield_curve(date, !fetch.no_cache)?;
            emit(df, fetch.output.as_deref())
        }
        Commands::Maturities | Commands::Cache { .. } => bail!("not a fetch command"),
    }
}

fn run_cache(config: &IngestConfig, action: CacheAction) -> Result<()> {
    let store = Arc::new(SqliteCache::from_config(
        config,
        Arc::new(quantdata_core::SystemClock),
    )?);
    let manager = CacheManager::new(store.clone());

    match action {
        CacheAction::Status { json } => {
            let summary = manager.get_summary()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{summary}");
            }
        }
        CacheAction::Cleanup => {
            let removed = manager.cleanup_expired_entries()?;
            println!("Removed {removed} expired entr{}.", plural(removed));
        }
        CacheAction::AutoCleanup {
            max_expired_ratio,
            min_expired_count,
        } => {
            if manager.auto_cleanup_if_needed(max_expired_ratio, min_expired_count)? {
                println!("Expired entries removed.");
            } else {
                println!("Below cleanup thresholds; nothing removed.");
            }
        }
        CacheAction::Clear { confirm } => {
            let summary = manager.get_summary()?;
            println!(
                "Cache holds {} entr{} ({}).",
                summary.total_entries,
                plural(summary.total_entries),
                format_size(summary.size_bytes)
            );
            match manager.invalidate_all(confirm)? {
                Some(removed) => println!("Removed {removed} entr{}.", plural(removed)),
                None => {
                    println!();
                    println!("Dry run. Pass --confirm to actually delete.");
                }
            }
        }
        CacheAction::Invalidate {
            table,
            key,
            confirm,
        } => {
            let table: CacheTable = table.parse()?;
            match key {
                Some(key) => {
                    let removed = store.invalidate(Some(&key), Some(table))?;
                    info!(%key, %table, removed, "entry invalidated");
                    println!("Removed {removed} entr{}.", plural(removed));
                }
                None => {
                    let entries = store.get_cache_stats()?.table(table).total_entries;
                    println!("Table {table} holds {entries} entr{}.", plural(entries));
                    match manager.invalidate_table(table, confirm)? {
                        Some(removed) => println!("Removed {removed} entr{}.", plural(removed)),
                        None => {
                            println!();
                            println!("Dry run. Pass --confirm to actually delete.");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Print `df`, or write it as Parquet when `output` is given.
fn emit(mut df: DataFrame, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("create {}", path.display()))?;
            ParquetWriter::new(file).finish(&mut df)?;
            println!("Wrote {} rows to {}", df.height(), path.display());
        }
        None => println!("{df}"),
    }
    Ok(())
}

/// `chain.parquet` → `chain_calls.parquet`.
fn side_path(path: &Path, side: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chain".to_string());
    path.with_file_name(format!("{stem}_{side}.parquet"))
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: quantdata_core::IngestError| e.to_string())
}

fn parse_side(s: &str) -> Result<OptionSide, String> {
    s.parse().map_err(|e: quantdata_core::IngestError| e.to_string())
}
