//! Fetch orchestrator: calendar, security list, then one merged file per trading day.

use super::ingest::merge_day;
use super::provider::{DataError, FetchProgress, MarketFeed};
use super::store::ParquetStore;
use crate::domain::SecurityInfo;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, warn};

/// Fetch `[start, end]` from the feed into the store.
///
/// Trading days already stored are skipped unless `force` is set. A failed
/// day does not stop the batch; a hard stop on the feed does.
pub fn fetch_range(
    feed: &dyn MarketFeed,
    store: &ParquetStore,
    start: NaiveDate,
    end: NaiveDate,
    force: bool,
    progress: &dyn FetchProgress,
) -> Result<FetchSummary, DataError> {
    if start > end {
        return Err(DataError::ValidationError(format!("start {start} is after end {end}")));
    }

    let calendar = feed.trade_cal(start, end)?;
    let open_dates: Vec<NaiveDate> = calendar.iter().filter(|r| r.is_open).map(|r| r.cal_date).collect();
    store.write_calendar(start, end, &open_dates)?;
    info!(feed = feed.name(), %start, %end, trading_days = open_dates.len(), "calendar stored");

    let securities = refresh_securities(feed, store);
    let by_code: HashMap<String, SecurityInfo> =
        securities.into_iter().map(|s| (s.ts_code.clone(), s)).collect();

    let total = open_dates.len();
    let mut summary = FetchSummary {
        total,
        ..FetchSummary::default()
    };

    for (i, date) in open_dates.iter().copied().enumerate() {
        progress.on_start(date, i, total);

        if !force && store.has_day(date) {
            summary.skipped += 1;
            progress.on_complete(date, i, total, &Ok(0));
            continue;
        }

        let result = fetch_day(feed, store, date, &by_code, &mut summary);
        progress.on_complete(date, i, total, &result);
        match result {
            Ok(_) => summary.fetched += 1,
            Err(e) => {
                warn!(%date, error = %e, "trading day fetch failed");
                summary.errors.push((date, e));
            }
        }

        if !feed.is_available() {
            for rest in &open_dates[(i + 1)..] {
                summary.errors.push((*rest, DataError::HardStop));
            }
            break;
        }
    }

    progress.on_batch_complete(summary.fetched, summary.skipped, summary.errors.len(), total);
    Ok(summary)
}

/// Fetch the security list; fall back to the stored one if the feed fails.
fn refresh_securities(feed: &dyn MarketFeed, store: &ParquetStore) -> Vec<SecurityInfo> {
    match feed.stock_basic() {
        Ok(list) if !list.is_empty() => {
            if let Err(e) = store.write_securities(&list) {
                warn!(error = %e, "could not store security list");
            }
            list
        }
        Ok(_) => {
            warn!("feed returned an empty security list");
            store.read_securities().unwrap_or_default()
        }
        Err(e) => {
            warn!(error = %e, "security list fetch failed; using stored list");
            store.read_securities().unwrap_or_default()
        }
    }
}

fn fetch_day(
    feed: &dyn MarketFeed,
    store: &ParquetStore,
    date: NaiveDate,
    securities: &HashMap<String, SecurityInfo>,
    summary: &mut FetchSummary,
) -> Result<usize, DataError> {
    let quotes = feed.daily(date)?;
    let limits = feed.stk_limit(date)?;
    let merged = merge_day(date, quotes, limits, securities)?;
    summary.rule_mismatches += merged.rule_mismatches.len();
    summary.missing_limits += merged.missing_limits;
    store.write_day(date, &merged.records)?;
    Ok(merged.records.len())
}

/// Outcome of a fetch batch.
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub total: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub rule_mismatches: usize,
    pub missing_limits: usize,
    pub errors: Vec<(NaiveDate, DataError)>,
}

impl FetchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}
