//! Trading calendar: the authoritative ordered set of exchange trading days.
//!
//! Loaded once per run and immutable afterwards, so it can be shared across
//! per-security workers without locking. All date arithmetic in the engine
//! counts trading days through this type, never calendar days.

use crate::error::AnalysisError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ordered, deduplicated trading dates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    /// Build from any collection of dates; sorts and removes duplicates.
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let mut dates: Vec<NaiveDate> = dates.into_iter().collect();
        dates.sort_unstable();
        dates.dedup();
        Self { dates }
    }

    /// Build from vendor calendar rows `(cal_date, is_open)`.
    pub fn from_entries(entries: impl IntoIterator<Item = (NaiveDate, bool)>) -> Self {
        Self::new(entries.into_iter().filter(|(_, open)| *open).map(|(d, _)| d))
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }

    /// Position of a trading day in the calendar.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Trading date at a calendar position.
    pub fn date_at(&self, index: usize) -> Option<NaiveDate> {
        self.dates.get(index).copied()
    }

    /// Inclusive, ascending range. Each call returns a fresh iterator.
    pub fn trading_dates_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = NaiveDate> + '_ {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end);
        self.dates[lo..hi.max(lo)].iter().copied()
    }

    /// Number of trading days in `[start, end]`.
    pub fn count_in_range(&self, start: NaiveDate, end: NaiveDate) -> usize {
        self.trading_dates_in_range(start, end).count()
    }

    /// Move `n` trading days from `date` (negative moves backwards).
    ///
    /// A non-trading `date` is first snapped to the adjacent trading day in the
    /// direction of travel, and that snap counts as the first step. With
    /// `n == 0` a non-trading date snaps backwards.
    pub fn offset_trading_days(&self, date: NaiveDate, n: i64) -> Result<NaiveDate, AnalysisError> {
        let out_of_range = || AnalysisError::OutOfRange { date, offset: n };

        let target = match self.dates.binary_search(&date) {
            Ok(idx) => idx as i64 + n,
            Err(insert_at) => {
                let insert_at = insert_at as i64;
                if n > 0 {
                    // dates[insert_at] is the next trading day (step 1)
                    insert_at + n - 1
                } else {
                    // dates[insert_at - 1] is the previous trading day (step -1, or the snap for n == 0)
                    insert_at - 1 + n + if n < 0 { 1 } else { 0 }
                }
            }
        };

        if target < 0 {
            return Err(out_of_range());
        }
        self.dates.get(target as usize).copied().ok_or_else(out_of_range)
    }

    /// Latest trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = self.dates.partition_point(|d| *d < date);
        idx.checked_sub(1).map(|i| self.dates[i])
    }

    /// Earliest trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = self.dates.partition_point(|d| *d <= date);
        self.dates.get(idx).copied()
    }

    /// Up to `n` trading days strictly before `date`, most recent first.
    pub fn previous_n_trading_days(&self, date: NaiveDate, n: usize) -> Vec<NaiveDate> {
        let idx = self.dates.partition_point(|d| *d < date);
        self.dates[..idx].iter().rev().take(n).copied().collect()
    }

    /// Trading days strictly between two dates.
    pub fn trading_days_between(&self, after: NaiveDate, before: NaiveDate) -> Vec<NaiveDate> {
        let lo = self.dates.partition_point(|d| *d <= after);
        let hi = self.dates.partition_point(|d| *d < before);
        if hi <= lo {
            return Vec::new();
        }
        self.dates[lo..hi].to_vec()
    }
}
