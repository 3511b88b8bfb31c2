//! Market loading for an analysis run.
//!
//! Resolves the analysis window against the stored calendar, then loads every
//! security's records from the window start minus a warm-up margin through the
//! first trading day after `as_of`. The warm-up lets streaks that began before
//! the window be tracked at their true length; the extra trailing day supplies
//! next-day returns for streaks that end on `as_of`.

use boardlab_core::aggregate::{AggregateRequest, ReturnTable};
use boardlab_core::calendar::TradingCalendar;
use boardlab_core::data::{CalendarSource, DataError, QuoteRepository};
use boardlab_core::domain::{DailyRecord, Direction, SecurityInfo};
use boardlab_core::error::AnalysisError;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no trading calendar stored; run `boardlab calendar` or `boardlab fetch` first")]
    NoCalendar,

    #[error("no daily records between {start} and {end}")]
    NoRecords { start: NaiveDate, end: NaiveDate },

    #[error("as-of date {0} is before the first stored trading day")]
    BeforeCalendar(NaiveDate),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
}

/// What to load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Last day of the analysis window; defaults to the last stored trading day.
    pub as_of: Option<NaiveDate>,
    pub lookback_trading_days: u32,
    /// Trading days loaded before the window start. Clamped to the calendar.
    pub warmup_trading_days: u32,
    pub direction: Direction,
}

/// Everything an analysis run reads, resolved against the calendar.
#[derive(Debug)]
pub struct LoadedMarket {
    pub calendar: TradingCalendar,
    pub request: AggregateRequest,
    pub window_start: NaiveDate,
    pub history_start: NaiveDate,
    /// Records per security, ascending by date.
    pub records: BTreeMap<String, Vec<DailyRecord>>,
    pub securities: Vec<SecurityInfo>,
    /// BLAKE3 over all loaded records, in security order.
    pub dataset_hash: String,
}

impl LoadedMarket {
    pub fn as_of(&self) -> NaiveDate {
        self.request.as_of
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn return_table(&self) -> ReturnTable {
        ReturnTable::from_records(self.records.values().flatten())
    }

    /// Every security's record for `date`, in security order.
    pub fn records_on(&self, date: NaiveDate) -> Vec<DailyRecord> {
        self.records
            .values()
            .filter_map(|rows| {
                rows.binary_search_by_key(&date, |r| r.date)
                    .ok()
                    .map(|i| rows[i].clone())
            })
            .collect()
    }
}

/// Load the calendar, records and security list for one analysis window.
pub fn load_market<S>(store: &S, opts: &LoadOptions) -> Result<LoadedMarket, LoadError>
where
    S: QuoteRepository + CalendarSource + ?Sized,
{
    let calendar = match store.load_full_calendar() {
        Ok(cal) => cal,
        Err(DataError::NotStored { .. }) => return Err(LoadError::NoCalendar),
        Err(e) => return Err(e.into()),
    };
    let (first, last) = match (calendar.first(), calendar.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(LoadError::NoCalendar),
    };

    let requested = match opts.as_of {
        Some(date) => date,
        None => store.latest_record_date()?.unwrap_or(last),
    };
    if requested < first {
        return Err(LoadError::BeforeCalendar(requested));
    }
    let as_of = calendar.offset_trading_days(requested.min(last), 0)?;
    if as_of != requested {
        debug!(%requested, %as_of, "as-of snapped to a trading day");
    }

    let request = AggregateRequest {
        as_of,
        lookback_trading_days: opts.lookback_trading_days,
        direction: opts.direction,
    };
    let (window_start, _) = request.window(&calendar)?;
    let history_start = calendar
        .offset_trading_days(window_start, -i64::from(opts.warmup_trading_days))
        .unwrap_or(first);
    if history_start == first && opts.warmup_trading_days > 0 && window_start != first {
        let available = calendar.count_in_range(first, window_start) - 1;
        if available < opts.warmup_trading_days as usize {
            warn!(
                available,
                wanted = opts.warmup_trading_days,
                "warm-up clamped to stored calendar; early streaks may be undercounted"
            );
        }
    }
    let load_end = calendar.next_trading_day(as_of).unwrap_or(as_of);

    let records = store.fetch_all_daily_records(history_start, load_end)?;
    if records.is_empty() {
        return Err(LoadError::NoRecords {
            start: history_start,
            end: load_end,
        });
    }
    let securities = store.securities()?;
    let dataset_hash = compute_dataset_hash(&records);

    let market = LoadedMarket {
        calendar,
        request,
        window_start,
        history_start,
        records,
        securities,
        dataset_hash,
    };
    info!(
        securities = market.records.len(),
        records = market.record_count(),
        %history_start,
        %window_start,
        %as_of,
        "market loaded"
    );
    Ok(market)
}

/// Deterministic BLAKE3 hash over every record field that affects analysis.
fn compute_dataset_hash(records: &BTreeMap<String, Vec<DailyRecord>>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (id, rows) in records {
        hasher.update(id.as_bytes());
        for rec in rows {
            hasher.update(rec.date.to_string().as_bytes());
            hasher.update(&rec.close.to_le_bytes());
            hasher.update(&rec.prev_close.to_le_bytes());
            hasher.update(&rec.up_limit.unwrap_or(f64::NAN).to_le_bytes());
            hasher.update(&rec.down_limit.unwrap_or(f64::NAN).to_le_bytes());
            hasher.update(&[u8::from(rec.is_suspended)]);
        }
    }
    hasher.finalize().to_hex().to_string()
}
