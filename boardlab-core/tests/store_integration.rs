//! Fetch → store → track round trip against a canned feed.

use boardlab_core::aggregate::{aggregate, AggregateRequest, ReturnTable};
use boardlab_core::classify::LimitClassifier;
use boardlab_core::data::{
    fetch_range, CalendarRow, CalendarSource, DataError, LimitRow, MarketFeed, ParquetStore, QuoteRepository,
    QuoteRow, SilentProgress,
};
use boardlab_core::domain::{BreakReason, Direction, SecurityInfo};
use boardlab_core::streak::StreakTracker;
use chrono::NaiveDate;
use std::cell::Cell;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_store_dir() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = env::temp_dir().join(format!("boardlab_it_{}_{id}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
}

/// May 6-10 are trading days; May 11-12 are a weekend.
struct CannedFeed {
    daily_calls: Cell<usize>,
    fail_on: Option<NaiveDate>,
    stop_after: Option<usize>,
}

impl CannedFeed {
    fn new() -> Self {
        Self {
            daily_calls: Cell::new(0),
            fail_on: None,
            stop_after: None,
        }
    }

    /// 600000.SH boards on 6, 7, 8 and reverses on 9; 000001.SZ is suspended on 7.
    fn close(code: &str, date: NaiveDate) -> Option<f64> {
        match (code, date.format("%d").to_string().as_str()) {
            ("600000.SH", "06" | "07" | "08") => Some(11.0),
            ("600000.SH", _) => Some(10.4),
            ("000001.SZ", "07") => None,
            ("000001.SZ", _) => Some(10.1),
            _ => None,
        }
    }
}

impl MarketFeed for CannedFeed {
    fn name(&self) -> &str {
        "canned"
    }

    fn trade_cal(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarRow>, DataError> {
        Ok(start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|cal_date| CalendarRow {
                cal_date,
                is_open: !matches!(cal_date.format("%a").to_string().as_str(), "Sat" | "Sun"),
            })
            .collect())
    }

    fn daily(&self, trade_date: NaiveDate) -> Result<Vec<QuoteRow>, DataError> {
        self.daily_calls.set(self.daily_calls.get() + 1);
        if self.fail_on == Some(trade_date) {
            return Err(DataError::Vendor {
                code: -1,
                msg: "upstream hiccup".into(),
            });
        }
        Ok(["600000.SH", "000001.SZ"]
            .iter()
            .filter_map(|code| {
                Self::close(code, trade_date).map(|close| QuoteRow {
                    ts_code: code.to_string(),
                    trade_date,
                    open: 10.0,
                    high: close.max(10.0),
                    low: 10.0,
                    close,
                    pre_close: 10.0,
                    pct_chg: Some((close / 10.0 - 1.0) * 100.0),
                    vol: 1_000.0,
                    amount: 10_000.0,
                })
            })
            .collect())
    }

    fn stk_limit(&self, trade_date: NaiveDate) -> Result<Vec<LimitRow>, DataError> {
        Ok(["600000.SH", "000001.SZ"]
            .iter()
            .map(|code| LimitRow {
                ts_code: code.to_string(),
                trade_date,
                pre_close: Some(10.0),
                up_limit: Some(11.0),
                down_limit: Some(9.0),
            })
            .collect())
    }

    fn stock_basic(&self) -> Result<Vec<SecurityInfo>, DataError> {
        Ok(vec![SecurityInfo {
            ts_code: "600000.SH".into(),
            symbol: "600000".into(),
            name: "浦发银行".into(),
            area: Some("上海".into()),
            industry: Some("银行".into()),
            market: Some("主板".into()),
            exchange: Some("SSE".into()),
            list_date: NaiveDate::from_ymd_opt(1999, 11, 10),
        }])
    }

    fn is_available(&self) -> bool {
        self.stop_after.map_or(true, |n| self.daily_calls.get() < n)
    }
}

#[test]
fn fetch_then_track_from_store() {
    let dir = temp_store_dir();
    let store = ParquetStore::new(&dir);
    let feed = CannedFeed::new();

    let summary = fetch_range(&feed, &store, d(6), d(12), false, &SilentProgress).unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.fetched, 5);
    assert!(summary.all_succeeded());

    let cal = store.load_calendar(d(1), d(31)).unwrap();
    assert_eq!(cal.len(), 5);
    assert_eq!(store.securities().unwrap().len(), 1);

    let all = store.fetch_all_daily_records(d(6), d(10)).unwrap();
    assert_eq!(all["600000.SH"].len(), 5);
    assert!(all["000001.SZ"][1].is_suspended);

    let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
    let track = tracker.track("600000.SH", &all["600000.SH"]);
    assert_eq!(track.episodes.len(), 1);
    assert_eq!(track.episodes[0].length, 3);
    assert_eq!(track.episodes[0].break_reason, BreakReason::PriceReversed);

    let returns = ReturnTable::from_records(all.values().flatten());
    let request = AggregateRequest {
        as_of: d(10),
        lookback_trading_days: 4,
        direction: Direction::Up,
    };
    let buckets = aggregate(&request, &cal, &track.episodes, &returns).unwrap();
    assert_eq!(buckets.len(), 3);
    assert_eq!(buckets[2].continuation_count, 0);
    assert!((buckets[2].next_day_return_mean.unwrap() - 0.04).abs() < 1e-9);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn stored_days_are_skipped_unless_forced() {
    let dir = temp_store_dir();
    let store = ParquetStore::new(&dir);
    let feed = CannedFeed::new();

    fetch_range(&feed, &store, d(6), d(8), false, &SilentProgress).unwrap();
    assert_eq!(feed.daily_calls.get(), 3);

    let again = fetch_range(&feed, &store, d(6), d(10), false, &SilentProgress).unwrap();
    assert_eq!(again.skipped, 3);
    assert_eq!(again.fetched, 2);
    assert_eq!(feed.daily_calls.get(), 5);

    let forced = fetch_range(&feed, &store, d(6), d(10), true, &SilentProgress).unwrap();
    assert_eq!(forced.fetched, 5);
    assert_eq!(feed.daily_calls.get(), 10);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn failed_day_does_not_stop_batch() {
    let dir = temp_store_dir();
    let store = ParquetStore::new(&dir);
    let feed = CannedFeed {
        fail_on: Some(d(7)),
        ..CannedFeed::new()
    };

    let summary = fetch_range(&feed, &store, d(6), d(10), false, &SilentProgress).unwrap();
    assert_eq!(summary.fetched, 4);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.errors[0].0, d(7));
    assert!(!store.has_day(d(7)));
    assert_eq!(store.status().unwrap().missing_days, vec![d(7)]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn hard_stop_fails_remaining_days() {
    let dir = temp_store_dir();
    let store = ParquetStore::new(&dir);
    let feed = CannedFeed {
        stop_after: Some(2),
        ..CannedFeed::new()
    };

    let summary = fetch_range(&feed, &store, d(6), d(10), false, &SilentProgress).unwrap();
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.failed(), 3);
    assert!(summary
        .errors
        .iter()
        .all(|(_, e)| matches!(e, DataError::HardStop)));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn inverted_range_is_rejected() {
    let dir = temp_store_dir();
    let store = ParquetStore::new(&dir);
    let result = fetch_range(&CannedFeed::new(), &store, d(10), d(6), false, &SilentProgress);
    assert!(matches!(result, Err(DataError::ValidationError(_))));
    let _ = fs::remove_dir_all(&dir);
}
