//! Parquet store with one file per trading day.
//!
//! Layout:
//! - `{store}/daily/{year}/{YYYYMMDD}.parquet`: merged daily records
//! - `{store}/daily/{year}/{YYYYMMDD}.meta.json`: sidecar (hash, counts, source)
//! - `{store}/calendar.json`: trading calendar and the range it covers
//! - `{store}/securities.json`: security master data
//!
//! Writes are atomic (write to .tmp, rename into place). Corrupt day files are
//! quarantined on load (`{file}.quarantined`) and reported as missing.

use super::provider::{CalendarSource, DataError, QuoteRepository};
use crate::calendar::TradingCalendar;
use crate::domain::{DailyRecord, SecurityInfo};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const COLUMNS: [&str; 12] = [
    "security_id",
    "date",
    "open",
    "high",
    "low",
    "close",
    "prev_close",
    "up_limit",
    "down_limit",
    "volume",
    "amount",
    "is_suspended",
];

/// Metadata sidecar for a stored trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMeta {
    pub date: NaiveDate,
    pub record_count: usize,
    pub suspended_count: usize,
    pub data_hash: String,
    pub source: String,
    pub stored_at: NaiveDateTime,
}

/// Stored trading calendar with the range that was requested from the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCalendar {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub open_dates: Vec<NaiveDate>,
}

/// Summary of what the store holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus {
    pub root: PathBuf,
    pub day_count: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub record_count: usize,
    pub calendar_range: Option<(NaiveDate, NaiveDate)>,
    pub calendar_trading_days: usize,
    pub security_count: usize,
    /// Calendar trading days inside the stored range with no day file.
    pub missing_days: Vec<NaiveDate>,
}

/// The on-disk Parquet store.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn daily_dir(&self) -> PathBuf {
        self.root.join("daily")
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir()
            .join(date.year().to_string())
            .join(format!("{}.parquet", date.format("%Y%m%d")))
    }

    fn meta_path(&self, date: NaiveDate) -> PathBuf {
        self.day_path(date).with_extension("meta.json")
    }

    fn calendar_path(&self) -> PathBuf {
        self.root.join("calendar.json")
    }

    fn securities_path(&self) -> PathBuf {
        self.root.join("securities.json")
    }

    pub fn has_day(&self, date: NaiveDate) -> bool {
        self.day_path(date).exists()
    }

    /// Write one trading day, replacing any previous file for that date.
    pub fn write_day(&self, date: NaiveDate, records: &[DailyRecord]) -> Result<DayMeta, DataError> {
        if records.is_empty() {
            return Err(DataError::StoreError(format!("no records to store for {date}")));
        }
        if let Some(stray) = records.iter().find(|r| r.date != date) {
            return Err(DataError::ValidationError(format!(
                "record {} dated {} in day file {date}",
                stray.security_id, stray.date
            )));
        }

        let path = self.day_path(date);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DataError::StoreError(format!("failed to create dir: {e}")))?;
        }

        let df = records_to_dataframe(records)?;
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::StoreError(format!("atomic rename failed: {e}"))
        })?;

        let meta = DayMeta {
            date,
            record_count: records.len(),
            suspended_count: records.iter().filter(|r| r.is_suspended).count(),
            data_hash: blake3::hash(
                &serde_json::to_vec(records)
                    .map_err(|e| DataError::StoreError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source: "tushare".to_string(),
            stored_at: chrono::Local::now().naive_local(),
        };
        write_json_atomic(&self.meta_path(date), &meta)?;
        debug!(%date, records = records.len(), "stored trading day");
        Ok(meta)
    }

    /// Load one trading day. A corrupt file is quarantined and reported as not stored.
    pub fn load_day(&self, date: NaiveDate) -> Result<Vec<DailyRecord>, DataError> {
        let path = self.day_path(date);
        if !path.exists() {
            return Err(DataError::NotStored {
                what: format!("trading day {date}"),
            });
        }
        match load_and_validate_parquet(&path) {
            Ok(records) => Ok(records),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(file = %path.display(), error = %e, "quarantining corrupt day file");
                let _ = fs::rename(&path, &quarantine);
                Err(DataError::NotStored {
                    what: format!("trading day {date} (file was corrupt)"),
                })
            }
        }
    }

    pub fn day_meta(&self, date: NaiveDate) -> Option<DayMeta> {
        let content = fs::read_to_string(self.meta_path(date)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Dates that have a day file, ascending.
    pub fn stored_dates(&self) -> Result<Vec<NaiveDate>, DataError> {
        let daily = self.daily_dir();
        if !daily.exists() {
            return Ok(Vec::new());
        }
        let mut dates = Vec::new();
        for year_dir in read_dir(&daily)? {
            if !year_dir.is_dir() {
                continue;
            }
            for path in read_dir(&year_dir)? {
                if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                    continue;
                }
                let parsed = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok());
                if let Some(date) = parsed {
                    dates.push(date);
                }
            }
        }
        dates.sort_unstable();
        Ok(dates)
    }

    /// Merge `open_dates` for `[start, end]` into the stored calendar.
    pub fn write_calendar(&self, start: NaiveDate, end: NaiveDate, open_dates: &[NaiveDate]) -> Result<(), DataError> {
        let merged = match self.read_calendar() {
            Ok(existing) => {
                let mut dates: Vec<NaiveDate> = existing
                    .open_dates
                    .into_iter()
                    .filter(|d| *d < start || *d > end)
                    .chain(open_dates.iter().copied())
                    .collect();
                dates.sort_unstable();
                dates.dedup();
                StoredCalendar {
                    start: existing.start.min(start),
                    end: existing.end.max(end),
                    open_dates: dates,
                }
            }
            Err(_) => {
                let mut dates = open_dates.to_vec();
                dates.sort_unstable();
                dates.dedup();
                StoredCalendar {
                    start,
                    end,
                    open_dates: dates,
                }
            }
        };
        fs::create_dir_all(&self.root)
            .map_err(|e| DataError::StoreError(format!("failed to create dir: {e}")))?;
        write_json_atomic(&self.calendar_path(), &merged)
    }

    pub fn read_calendar(&self) -> Result<StoredCalendar, DataError> {
        read_json(&self.calendar_path(), "trading calendar")
    }

    pub fn write_securities(&self, securities: &[SecurityInfo]) -> Result<(), DataError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| DataError::StoreError(format!("failed to create dir: {e}")))?;
        write_json_atomic(&self.securities_path(), &securities)
    }

    pub fn read_securities(&self) -> Result<Vec<SecurityInfo>, DataError> {
        read_json(&self.securities_path(), "security list")
    }

    pub fn status(&self) -> Result<StoreStatus, DataError> {
        let days = self.stored_dates()?;
        let record_count = days
            .iter()
            .filter_map(|d| self.day_meta(*d))
            .map(|m| m.record_count)
            .sum();
        let calendar = self.read_calendar().ok();
        let missing_days = match (&calendar, days.first(), days.last()) {
            (Some(cal), Some(first), Some(last)) => cal
                .open_dates
                .iter()
                .copied()
                .filter(|d| d >= first && d <= last)
                .filter(|d| days.binary_search(d).is_err())
                .collect(),
            _ => Vec::new(),
        };
        Ok(StoreStatus {
            root: self.root.clone(),
            day_count: days.len(),
            first_day: days.first().copied(),
            last_day: days.last().copied(),
            record_count,
            calendar_range: calendar.as_ref().map(|c| (c.start, c.end)),
            calendar_trading_days: calendar.as_ref().map(|c| c.open_dates.len()).unwrap_or(0),
            security_count: self.read_securities().map(|s| s.len()).unwrap_or(0),
            missing_days,
        })
    }

    fn load_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyRecord>, DataError> {
        let mut all = Vec::new();
        for date in self.stored_dates()?.into_iter().filter(|d| *d >= start && *d <= end) {
            match self.load_day(date) {
                Ok(records) => all.extend(records),
                Err(DataError::NotStored { what }) => warn!("skipping {what}"),
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }
}

impl QuoteRepository for ParquetStore {
    fn fetch_daily_records(
        &self,
        security_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRecord>, DataError> {
        let mut rows: Vec<DailyRecord> = self
            .load_range(start, end)?
            .into_iter()
            .filter(|r| r.security_id == security_id)
            .collect();
        rows.sort_by_key(|r| r.date);
        Ok(rows)
    }

    fn fetch_all_daily_records(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<DailyRecord>>, DataError> {
        let mut grouped: BTreeMap<String, Vec<DailyRecord>> = BTreeMap::new();
        for rec in self.load_range(start, end)? {
            grouped.entry(rec.security_id.clone()).or_default().push(rec);
        }
        for rows in grouped.values_mut() {
            rows.sort_by_key(|r| r.date);
        }
        Ok(grouped)
    }

    fn securities(&self) -> Result<Vec<SecurityInfo>, DataError> {
        self.read_securities()
    }

    fn latest_record_date(&self) -> Result<Option<NaiveDate>, DataError> {
        Ok(self.stored_dates()?.last().copied())
    }
}

impl CalendarSource for ParquetStore {
    fn fetch_trading_dates(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, DataError> {
        let cal = self.read_calendar()?;
        if start < cal.start || end > cal.end {
            warn!(
                requested_start = %start,
                requested_end = %end,
                stored_start = %cal.start,
                stored_end = %cal.end,
                "requested calendar range exceeds stored range"
            );
        }
        Ok(cal
            .open_dates
            .into_iter()
            .filter(|d| *d >= start && *d <= end)
            .collect())
    }

    fn load_full_calendar(&self) -> Result<TradingCalendar, DataError> {
        Ok(TradingCalendar::new(self.read_calendar()?.open_dates))
    }
}

// ── File helpers ────────────────────────────────────────────────────

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let entries = fs::read_dir(dir).map_err(|e| DataError::StoreError(format!("read dir: {e}")))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DataError::StoreError(format!("dir entry: {e}")))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DataError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DataError::StoreError(format!("serialization: {e}")))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(|e| DataError::StoreError(format!("write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::StoreError(format!("atomic rename failed: {e}"))
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T, DataError> {
    if !path.exists() {
        return Err(DataError::NotStored { what: what.to_string() });
    }
    let content =
        fs::read_to_string(path).map_err(|e| DataError::StoreError(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| DataError::ValidationError(format!("parse {}: {e}", path.display())))
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// `NaiveDate::default()` is the Unix epoch, the origin of polars `Date` columns.
fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn records_to_dataframe(records: &[DailyRecord]) -> Result<DataFrame, DataError> {
    let ids: Vec<&str> = records.iter().map(|r| r.security_id.as_str()).collect();
    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.date - epoch()).num_days() as i32)
        .collect();
    let f = |get: fn(&DailyRecord) -> f64| records.iter().map(get).collect::<Vec<f64>>();
    let up: Vec<Option<f64>> = records.iter().map(|r| r.up_limit).collect();
    let down: Vec<Option<f64>> = records.iter().map(|r| r.down_limit).collect();
    let suspended: Vec<bool> = records.iter().map(|r| r.is_suspended).collect();

    DataFrame::new(vec![
        Column::new("security_id".into(), ids),
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("open".into(), f(|r| r.open)),
        Column::new("high".into(), f(|r| r.high)),
        Column::new("low".into(), f(|r| r.low)),
        Column::new("close".into(), f(|r| r.close)),
        Column::new("prev_close".into(), f(|r| r.prev_close)),
        Column::new("up_limit".into(), up),
        Column::new("down_limit".into(), down),
        Column::new("volume".into(), f(|r| r.volume)),
        Column::new("amount".into(), f(|r| r.amount)),
        Column::new("is_suspended".into(), suspended),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<DailyRecord>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }
    for col_name in COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::ValidationError(format!("missing column '{col_name}'")));
        }
    }
    dataframe_to_records(&df)
}

fn dataframe_to_records(df: &DataFrame) -> Result<Vec<DailyRecord>, DataError> {
    let col = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column read: {e}")))
    };
    let type_err = |name: &'static str| move |e: PolarsError| DataError::ParquetError(format!("{name} column type: {e}"));

    let ids = col("security_id")?.str().map_err(type_err("security_id"))?;
    let dates = col("date")?.date().map_err(type_err("date"))?;
    let open = col("open")?.f64().map_err(type_err("open"))?;
    let high = col("high")?.f64().map_err(type_err("high"))?;
    let low = col("low")?.f64().map_err(type_err("low"))?;
    let close = col("close")?.f64().map_err(type_err("close"))?;
    let prev_close = col("prev_close")?.f64().map_err(type_err("prev_close"))?;
    let up = col("up_limit")?.f64().map_err(type_err("up_limit"))?;
    let down = col("down_limit")?.f64().map_err(type_err("down_limit"))?;
    let volume = col("volume")?.f64().map_err(type_err("volume"))?;
    let amount = col("amount")?.f64().map_err(type_err("amount"))?;
    let suspended = col("is_suspended")?.bool().map_err(type_err("is_suspended"))?;

    let n = df.height();
    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let security_id = ids
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null security_id at row {i}")))?;
        let days = dates
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;

        records.push(DailyRecord {
            security_id: security_id.to_string(),
            date: epoch() + chrono::Duration::days(days as i64),
            open: open.get(i).unwrap_or(f64::NAN),
            high: high.get(i).unwrap_or(f64::NAN),
            low: low.get(i).unwrap_or(f64::NAN),
            close: close.get(i).unwrap_or(f64::NAN),
            prev_close: prev_close.get(i).unwrap_or(f64::NAN),
            up_limit: up.get(i),
            down_limit: down.get(i),
            volume: volume.get(i).unwrap_or(0.0),
            amount: amount.get(i).unwrap_or(0.0),
            is_suspended: suspended.get(i).unwrap_or(false),
        });
    }
    Ok(records)
}
