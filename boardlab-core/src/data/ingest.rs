//! Merge one trading day's vendor rows into [`DailyRecord`]s.
//!
//! `daily` only lists securities that traded; `stk_limit` lists every listed
//! security, suspended ones included. So:
//! - quote + limit row: traded record with limit prices
//! - limit row only: suspended record
//! - quote only: traded record with absent limits (the classifier reports it)
//!
//! Limit prices that disagree with the board's regulatory rule are kept as
//! published and logged.

use super::provider::DataError;
use super::tushare::{LimitRow, QuoteRow};
use crate::classify::LimitRule;
use crate::domain::{Board, DailyRecord, SecurityInfo};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Merged records for one day plus data-quality counters.
#[derive(Debug, Clone, Default)]
pub struct MergedDay {
    pub records: Vec<DailyRecord>,
    pub suspended: usize,
    pub missing_limits: usize,
    pub rule_mismatches: Vec<String>,
    pub dropped_off_date: usize,
}

pub fn merge_day(
    date: NaiveDate,
    quotes: Vec<QuoteRow>,
    limits: Vec<LimitRow>,
    securities: &HashMap<String, SecurityInfo>,
) -> Result<MergedDay, DataError> {
    let mut day = MergedDay::default();

    let mut limit_by_code: BTreeMap<String, LimitRow> = BTreeMap::new();
    for row in limits {
        if row.trade_date != date {
            day.dropped_off_date += 1;
            continue;
        }
        limit_by_code.insert(row.ts_code.clone(), row);
    }

    let mut quote_by_code: BTreeMap<String, QuoteRow> = BTreeMap::new();
    for row in quotes {
        if row.trade_date != date {
            day.dropped_off_date += 1;
            continue;
        }
        if quote_by_code.insert(row.ts_code.clone(), row).is_some() {
            return Err(DataError::ValidationError(format!("duplicate daily row on {date}")));
        }
    }
    if day.dropped_off_date > 0 {
        warn!(%date, dropped = day.dropped_off_date, "vendor rows dated on another day");
    }

    for (code, quote) in &quote_by_code {
        let limit = limit_by_code.get(code);
        if limit.is_none() {
            day.missing_limits += 1;
        }
        let record = DailyRecord {
            security_id: code.clone(),
            date,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            close: quote.close,
            prev_close: quote.pre_close,
            up_limit: limit.and_then(|l| l.up_limit),
            down_limit: limit.and_then(|l| l.down_limit),
            volume: quote.vol,
            amount: quote.amount,
            is_suspended: false,
        };
        if let Some(mismatch) = check_rule(&record, securities.get(code)) {
            day.rule_mismatches.push(mismatch);
        }
        day.records.push(record);
    }

    for (code, limit) in &limit_by_code {
        if quote_by_code.contains_key(code) {
            continue;
        }
        day.suspended += 1;
        day.records.push(DailyRecord::suspended(
            code.clone(),
            date,
            limit.pre_close.unwrap_or(f64::NAN),
            limit.up_limit,
            limit.down_limit,
        ));
    }

    day.records.sort_by(|a, b| a.security_id.cmp(&b.security_id));

    if day.missing_limits > 0 {
        warn!(%date, count = day.missing_limits, "quotes without limit prices");
    }
    if !day.rule_mismatches.is_empty() {
        warn!(%date, count = day.rule_mismatches.len(), "limit prices disagree with board rule");
        for m in &day.rule_mismatches {
            debug!("{m}");
        }
    }
    Ok(day)
}

fn check_rule(record: &DailyRecord, info: Option<&SecurityInfo>) -> Option<String> {
    let rule = match info {
        Some(info) => LimitRule::new(info.board(), info.is_st()),
        None => LimitRule::new(Board::from_ts_code(&record.security_id), false),
    };
    if !rule.disagrees_with(record) {
        return None;
    }
    let (exp_up, exp_down) = rule.expected_limits(record.prev_close);
    Some(format!(
        "{} {}: feed limits {:?}/{:?}, {:?} rule ({:.0}%) expects {exp_up:.2}/{exp_down:.2}",
        record.security_id,
        record.date,
        record.up_limit,
        record.down_limit,
        rule.board,
        rule.limit_pct() * 100.0,
    ))
}
