//! BoardLab CLI: fetch A-share daily data and analyse limit-board streaks.
//!
//! Commands:
//! - `fetch`: pull calendar, security list and daily quotes + limits into the store
//! - `calendar`: refresh the stored trading calendar only
//! - `streaks`: list one security's streak episodes
//! - `analyze`: continuation and next-day return statistics by streak length
//! - `snapshot`: limit counts and streak ladder for one day
//! - `performance`: how the previous day's up-limit closes did
//! - `industry`: per-industry breadth and turnover for one day
//! - `markets`: listed securities per market segment
//! - `store status`: what the local store holds

use anyhow::{bail, Context, Result};
use boardlab_core::data::tushare::CalendarRow;
use boardlab_core::data::{
    fetch_range, MarketFeed, ParquetStore, RequestThrottle, StdoutProgress, TushareClient,
};
use boardlab_core::domain::Direction;
use boardlab_core::snapshot::market_distribution;
use boardlab_core::streak::StreakTracker;
use boardlab_runner::report::{industry_text, market_distribution_text, performance_text, snapshot_text};
use boardlab_runner::{
    industry_breadth_at, load_market, performance_at, render, run_analysis, snapshot_at, write_report,
    AnalysisConfig, LoadOptions, LoadedMarket, ReportFormat,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "boardlab.toml";

#[derive(Parser)]
#[command(name = "boardlab", about = "BoardLab: A-share limit-board streak analysis")]
struct Cli {
    /// Analysis config (TOML). Defaults to ./boardlab.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory; overrides `store_dir` from the config.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch trading calendar, security list and daily data into the store.
    Fetch {
        /// Start date (YYYY-MM-DD or YYYYMMDD).
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,

        /// End date. Defaults to today.
        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,

        /// Re-fetch days that are already stored.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Refresh the stored trading calendar.
    Calendar {
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,

        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
    },
    /// List streak episodes for one security.
    Streaks {
        /// Tushare code, e.g. 600000.SH.
        security: String,

        /// Last day to track. Defaults to the last stored trading day.
        #[arg(long, value_parser = parse_date)]
        as_of: Option<NaiveDate>,
    },
    /// Streak statistics over a lookback window.
    Analyze {
        /// Window end. Defaults to the last stored trading day.
        #[arg(long, value_parser = parse_date)]
        as_of: Option<NaiveDate>,

        /// Window size in trading days.
        #[arg(long)]
        lookback: Option<u32>,

        /// up or down.
        #[arg(long)]
        direction: Option<Direction>,

        /// Partition statistics by industry.
        #[arg(long, default_value_t = false)]
        by_industry: bool,

        /// text, markdown, json or csv.
        #[arg(long, default_value = "text")]
        format: ReportFormat,

        /// Also write the report into this directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Limit counts and up-streak ladder for one trading day.
    Snapshot {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
    },
    /// How the previous trading day's up-limit closes did on this day.
    Performance {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
    },
    /// Per-industry breadth and turnover for one trading day.
    Industry {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,

        /// Show only the largest industries by turnover.
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// Listed securities per market segment.
    Markets,
    /// Store management.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Report stored days, records, calendar coverage and gaps.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.store_dir {
        config.store_dir = dir;
    }

    match cli.command {
        Commands::Fetch { start, end, force } => run_fetch(&config, start, end, force),
        Commands::Calendar { start, end } => run_calendar(&config, start, end),
        Commands::Streaks { security, as_of } => run_streaks(&config, &security, as_of),
        Commands::Analyze {
            as_of,
            lookback,
            direction,
            by_industry,
            format,
            output_dir,
        } => {
            if let Some(n) = lookback {
                config.analysis.lookback_trading_days = n;
            }
            if let Some(dir) = direction {
                config.analysis.direction = dir;
            }
            config.validate()?;
            run_analyze(&config, as_of, by_industry, format, output_dir.as_deref())
        }
        Commands::Snapshot { date } => {
            let market = load_day_view(&config, date)?;
            let snap = snapshot_at(&market, config.classifier(), date)?;
            print!("{}", snapshot_text(&snap));
            Ok(())
        }
        Commands::Performance { date } => {
            let market = load_day_view(&config, date)?;
            let perf = performance_at(&market, config.classifier(), date)?;
            print!("{}", performance_text(&perf));
            Ok(())
        }
        Commands::Industry { date, top } => {
            let market = load_day_view(&config, date)?;
            let stats = industry_breadth_at(&config, &market, date)?;
            print!("{}", industry_text(&stats, top));
            Ok(())
        }
        Commands::Markets => run_markets(&config),
        Commands::Store { action } => match action {
            StoreAction::Status => run_store_status(&config),
        },
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|_| format!("invalid date '{s}' (expected YYYY-MM-DD or YYYYMMDD)"))
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(p) => AnalysisConfig::from_file(p).with_context(|| format!("loading config {}", p.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            AnalysisConfig::from_file(Path::new(DEFAULT_CONFIG)).context("loading ./boardlab.toml")
        }
        None => Ok(AnalysisConfig::default()),
    }
}

fn tushare_client(config: &AnalysisConfig) -> Result<TushareClient> {
    let token = config.token()?;
    let throttle = Arc::new(RequestThrottle::new(
        config.vendor.requests_per_minute,
        Duration::from_millis(500),
    ));
    Ok(TushareClient::new(config.tushare_settings(token), throttle)?)
}

fn run_fetch(config: &AnalysisConfig, start: NaiveDate, end: Option<NaiveDate>, force: bool) -> Result<()> {
    let end = end.unwrap_or_else(|| chrono::Local::now().date_naive());
    let client = tushare_client(config)?;
    client.verify_token().context("token check failed")?;

    let store = ParquetStore::new(&config.store_dir);
    let summary = fetch_range(&client, &store, start, end, force, &StdoutProgress)
        .with_context(|| format!("fetching {start} .. {end}"))?;

    if summary.rule_mismatches > 0 {
        warn!(count = summary.rule_mismatches, "feed limit prices disagreed with the board rule");
    }
    if summary.missing_limits > 0 {
        warn!(count = summary.missing_limits, "quotes stored without limit prices");
    }
    if !summary.all_succeeded() {
        for (date, err) in &summary.errors {
            eprintln!("Error for {date}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_calendar(config: &AnalysisConfig, start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        bail!("--start {start} is after --end {end}");
    }
    let client = tushare_client(config)?;
    let rows: Vec<CalendarRow> = client.trade_cal(start, end)?;
    let open: Vec<NaiveDate> = rows.iter().filter(|r| r.is_open).map(|r| r.cal_date).collect();
    let store = ParquetStore::new(&config.store_dir);
    store.write_calendar(start, end, &open)?;
    info!(feed = client.name(), trading_days = open.len(), "calendar stored");
    println!("{} trading days between {start} and {end}", open.len());
    Ok(())
}

fn run_streaks(config: &AnalysisConfig, security: &str, as_of: Option<NaiveDate>) -> Result<()> {
    let store = ParquetStore::new(&config.store_dir);
    let market = load_market(&store, &config.load_options(as_of))?;
    let Some(rows) = market.records.get(security) else {
        bail!("no records for {security} between {} and {}", market.history_start, market.as_of());
    };

    let tracker = StreakTracker::new(&market.calendar, config.classifier(), market.as_of());
    let track = tracker.track(security, rows);
    println!(
        "{security}: {} episodes, {} .. {}",
        track.episodes.len(),
        market.history_start,
        market.as_of()
    );
    for ep in &track.episodes {
        let skipped = if ep.skipped_dates.is_empty() {
            String::new()
        } else {
            format!("  skipped {}", ep.skipped_dates.len())
        };
        println!(
            "  {:<4} {} .. {}  {:>2} boards  {}{skipped}",
            ep.direction, ep.start_date, ep.end_date, ep.length, ep.break_reason
        );
    }
    for diag in &track.diagnostics {
        println!("  ! {diag}");
    }
    Ok(())
}

fn run_analyze(
    config: &AnalysisConfig,
    as_of: Option<NaiveDate>,
    by_industry: bool,
    format: ReportFormat,
    output_dir: Option<&Path>,
) -> Result<()> {
    let store = ParquetStore::new(&config.store_dir);
    let market = load_market(&store, &config.load_options(as_of))?;
    let report = run_analysis(config, &market, by_industry)?;

    print!("{}", render(&report, format)?);
    if let Some(dir) = output_dir {
        let path = write_report(&report, dir, format)?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

/// Market loaded for a single-day view: no lookback window, warm-up of at
/// least one day so the previous session is present.
fn load_day_view(config: &AnalysisConfig, date: NaiveDate) -> Result<LoadedMarket> {
    let store = ParquetStore::new(&config.store_dir);
    let opts = LoadOptions {
        as_of: Some(date),
        lookback_trading_days: 0,
        warmup_trading_days: config.analysis.warmup_trading_days.max(1),
        direction: Direction::Up,
    };
    let market = load_market(&store, &opts)?;
    if market.as_of() != date {
        bail!("{date} is not a stored trading day (nearest earlier: {})", market.as_of());
    }
    Ok(market)
}

fn run_markets(config: &AnalysisConfig) -> Result<()> {
    let store = ParquetStore::new(&config.store_dir);
    let securities = store.read_securities()?;
    print!("{}", market_distribution_text(&market_distribution(&securities)));
    Ok(())
}

fn run_store_status(config: &AnalysisConfig) -> Result<()> {
    let store = ParquetStore::new(&config.store_dir);
    if !store.root().exists() {
        println!("Store directory does not exist: {}", store.root().display());
        return Ok(());
    }
    let status = store.status()?;

    println!("Store: {}", status.root.display());
    println!("Days stored: {}", status.day_count);
    if let (Some(first), Some(last)) = (status.first_day, status.last_day) {
        println!("Range: {first} .. {last}");
    }
    println!("Records: {}", status.record_count);
    match status.calendar_range {
        Some((start, end)) => println!(
            "Calendar: {start} .. {end} ({} trading days)",
            status.calendar_trading_days
        ),
        None => println!("Calendar: not stored"),
    }
    println!("Securities: {}", status.security_count);
    if !status.missing_days.is_empty() {
        println!("Missing trading days ({}):", status.missing_days.len());
        for day in status.missing_days.iter().take(20) {
            println!("  {day}");
        }
        if status.missing_days.len() > 20 {
            println!("  ... and {} more", status.missing_days.len() - 20);
        }
    }
    Ok(())
}
