//! Data access traits and structured error types.
//!
//! The analysis engine reads through these traits only, so the Parquet store,
//! the in-memory store used by tests, and anything else can stand behind them.

use super::tushare::{CalendarRow, LimitRow, QuoteRow};
use crate::calendar::TradingCalendar;
use crate::domain::{DailyRecord, SecurityInfo};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Structured error types for store and vendor operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by vendor: {0}")]
    RateLimited(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("vendor error {code}: {msg}")]
    Vendor { code: i64, msg: String },

    #[error("hard stop: vendor requests disabled after authentication failure")]
    HardStop,

    #[error("store error: {0}")]
    StoreError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no stored data for {what}; run `boardlab fetch` first")]
    NotStored { what: String },

    #[error("data error: {0}")]
    Other(String),
}

/// Daily quotes and limit prices.
pub trait QuoteRepository {
    /// Records for one security in `[start, end]`, ascending. Non-trading days have no row.
    fn fetch_daily_records(
        &self,
        security_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRecord>, DataError>;

    /// All records in `[start, end]`, grouped by security, each group ascending.
    fn fetch_all_daily_records(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<DailyRecord>>, DataError>;

    /// Security master data.
    fn securities(&self) -> Result<Vec<SecurityInfo>, DataError>;

    /// Latest date with stored records, if any.
    fn latest_record_date(&self) -> Result<Option<NaiveDate>, DataError>;
}

/// Source of the exchange trading calendar.
pub trait CalendarSource {
    fn fetch_trading_dates(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, DataError>;

    fn load_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<TradingCalendar, DataError> {
        Ok(TradingCalendar::new(self.fetch_trading_dates(start, end)?))
    }

    /// Every trading day the source knows about.
    fn load_full_calendar(&self) -> Result<TradingCalendar, DataError> {
        self.load_calendar(NaiveDate::MIN, NaiveDate::MAX)
    }
}

/// Upstream market-data feed: the vendor APIs the ingest pipeline needs.
///
/// The fetch orchestrator only talks to this trait, so tests can drive it
/// with canned rows instead of the network.
pub trait MarketFeed {
    fn name(&self) -> &str;

    fn trade_cal(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarRow>, DataError>;

    fn daily(&self, trade_date: NaiveDate) -> Result<Vec<QuoteRow>, DataError>;

    fn stk_limit(&self, trade_date: NaiveDate) -> Result<Vec<LimitRow>, DataError>;

    fn stock_basic(&self) -> Result<Vec<SecurityInfo>, DataError>;

    /// False once the feed has stopped accepting requests (hard stop).
    fn is_available(&self) -> bool;
}

/// Security → industry code.
pub trait IndustryLookup {
    fn lookup_industry(&self, security_id: &str) -> Option<String>;
}

impl IndustryLookup for HashMap<String, String> {
    fn lookup_industry(&self, security_id: &str) -> Option<String> {
        self.get(security_id).cloned()
    }
}

/// Progress callback for multi-date fetches.
pub trait FetchProgress: Send {
    fn on_start(&self, date: NaiveDate, index: usize, total: usize);

    fn on_complete(&self, date: NaiveDate, index: usize, total: usize, result: &Result<usize, DataError>);

    fn on_batch_complete(&self, succeeded: usize, skipped: usize, failed: usize, total: usize);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_start(&self, date: NaiveDate, index: usize, total: usize) {
        println!("[{}/{}] Fetching {date}...", index + 1, total);
    }

    fn on_complete(&self, date: NaiveDate, _index: usize, _total: usize, result: &Result<usize, DataError>) {
        match result {
            Ok(n) => println!("  OK: {date} ({n} records)"),
            Err(e) => println!("  FAIL: {date}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, skipped: usize, failed: usize, total: usize) {
        println!("\nFetch complete: {succeeded}/{total} fetched, {skipped} already stored, {failed} failed");
    }
}

/// Progress reporter that discards everything.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_start(&self, _: NaiveDate, _: usize, _: usize) {}
    fn on_complete(&self, _: NaiveDate, _: usize, _: usize, _: &Result<usize, DataError>) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize, _: usize) {}
}

/// In-memory repository and calendar source.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    calendar: Vec<NaiveDate>,
    records: BTreeMap<String, Vec<DailyRecord>>,
    securities: Vec<SecurityInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.calendar = TradingCalendar::new(dates).dates().to_vec();
        self
    }

    pub fn with_securities(mut self, securities: Vec<SecurityInfo>) -> Self {
        self.securities = securities;
        self
    }

    /// Insert records, replacing any existing row for the same security and date.
    pub fn insert(&mut self, records: impl IntoIterator<Item = DailyRecord>) {
        for rec in records {
            let rows = self.records.entry(rec.security_id.clone()).or_default();
            match rows.binary_search_by_key(&rec.date, |r| r.date) {
                Ok(i) => rows[i] = rec,
                Err(i) => rows.insert(i, rec),
            }
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

impl QuoteRepository for MemoryStore {
    fn fetch_daily_records(
        &self,
        security_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRecord>, DataError> {
        Ok(self
            .records
            .get(security_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.date >= start && r.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_all_daily_records(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<DailyRecord>>, DataError> {
        let mut out = BTreeMap::new();
        for id in self.records.keys() {
            let rows = self.fetch_daily_records(id, start, end)?;
            if !rows.is_empty() {
                out.insert(id.clone(), rows);
            }
        }
        Ok(out)
    }

    fn securities(&self) -> Result<Vec<SecurityInfo>, DataError> {
        Ok(self.securities.clone())
    }

    fn latest_record_date(&self) -> Result<Option<NaiveDate>, DataError> {
        Ok(self.records.values().filter_map(|rows| rows.last()).map(|r| r.date).max())
    }
}

impl CalendarSource for MemoryStore {
    fn fetch_trading_dates(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, DataError> {
        Ok(self
            .calendar
            .iter()
            .copied()
            .filter(|d| *d >= start && *d <= end)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn rec(id: &str, date: NaiveDate, close: f64) -> DailyRecord {
        DailyRecord {
            security_id: id.into(),
            date,
            open: close,
            high: close,
            low: close,
            close,
            prev_close: close,
            up_limit: None,
            down_limit: None,
            volume: 0.0,
            amount: 0.0,
            is_suspended: false,
        }
    }

    #[test]
    fn memory_store_keeps_rows_sorted_and_replaces() {
        let mut store = MemoryStore::new();
        store.insert(vec![rec("A", d(8), 1.0), rec("A", d(6), 1.0), rec("A", d(8), 2.0)]);
        let rows = store.fetch_daily_records("A", d(1), d(31)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(6));
        assert_eq!(rows[1].close, 2.0);
    }

    #[test]
    fn memory_store_range_filter() {
        let mut store = MemoryStore::new().with_calendar(vec![d(6), d(7), d(8)]);
        store.insert(vec![rec("A", d(6), 1.0), rec("B", d(8), 1.0)]);
        let all = store.fetch_all_daily_records(d(7), d(8)).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("B"));
        assert_eq!(store.fetch_trading_dates(d(7), d(9)).unwrap(), vec![d(7), d(8)]);
        assert_eq!(store.load_calendar(d(1), d(31)).unwrap().len(), 3);
    }

    #[test]
    fn map_lookup() {
        let mut map = HashMap::new();
        map.insert("600000.SH".to_string(), "银行".to_string());
        assert_eq!(map.lookup_industry("600000.SH").as_deref(), Some("银行"));
        assert_eq!(map.lookup_industry("000001.SZ"), None);
    }
}
