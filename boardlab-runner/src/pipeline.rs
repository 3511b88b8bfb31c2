//! End-to-end analysis: track every security in parallel, aggregate the
//! window, optionally roll up by industry, and collect exclusions.

use crate::config::{AnalysisConfig, ConfigError};
use crate::loader::{LoadError, LoadedMarket};
use boardlab_core::aggregate::{aggregate, aggregate_by_industry, length_distribution, AggregateBucket};
use boardlab_core::calendar::TradingCalendar;
use boardlab_core::classify::LimitClassifier;
use boardlab_core::data::{DataError, IndustryOverrides, IndustryTable};
use boardlab_core::domain::{DailyRecord, Diagnostic, Direction, SecurityTrack, StreakEpisode};
use boardlab_core::error::AnalysisError;
use boardlab_core::snapshot::{industry_day_stats, IndustryDayStats, MarketSnapshot, NextDayPerformance};
use boardlab_core::streak::StreakTracker;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current schema version for serialized reports.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("{0} is not a trading day")]
    NotTradingDay(NaiveDate),
    #[error("no trading day before {0} in the stored calendar")]
    NoPreviousDay(NaiveDate),
}

/// Episodes and diagnostics for a whole market.
#[derive(Debug, Clone, Default)]
pub struct TrackedMarket {
    /// Sorted by security id, then start date.
    pub episodes: Vec<StreakEpisode>,
    pub diagnostics: Vec<Diagnostic>,
    /// Securities with at least one diagnostic.
    pub partial_securities: usize,
}

/// Track every security in parallel; results are merged in security order.
pub fn track_all(
    calendar: &TradingCalendar,
    classifier: LimitClassifier,
    horizon_end: NaiveDate,
    records: &BTreeMap<String, Vec<DailyRecord>>,
) -> TrackedMarket {
    let tracker = StreakTracker::new(calendar, classifier, horizon_end);
    let tracks: Vec<SecurityTrack> = records
        .par_iter()
        .map(|(id, rows)| tracker.track(id, rows))
        .collect();

    let mut out = TrackedMarket::default();
    for track in tracks {
        if track.is_partial() {
            out.partial_securities += 1;
        }
        out.episodes.extend(track.episodes);
        out.diagnostics.extend(track.diagnostics);
    }
    debug!(
        securities = records.len(),
        episodes = out.episodes.len(),
        diagnostics = out.diagnostics.len(),
        "tracking complete"
    );
    out
}

/// Result of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// BLAKE3 of the analysis settings and the dataset.
    pub fingerprint: String,
    pub dataset_hash: String,
    pub as_of: NaiveDate,
    pub window_start: NaiveDate,
    pub lookback_trading_days: u32,
    pub direction: Direction,
    pub min_reliable_samples: usize,
    pub security_count: usize,
    pub record_count: usize,
    pub episode_count: usize,
    pub buckets: Vec<AggregateBucket>,
    /// Maximal episodes ending in the window, by length.
    pub length_distribution: BTreeMap<u32, usize>,
    /// Present when the run was partitioned by industry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industries: Option<BTreeMap<String, Vec<AggregateBucket>>>,
    /// Every security/date left out of the statistics, with the reason.
    pub exclusions: Vec<Diagnostic>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl AnalysisReport {
    /// Buckets below the reliability threshold.
    pub fn unreliable_lengths(&self) -> Vec<u32> {
        self.buckets
            .iter()
            .filter(|b| !b.is_reliable(self.min_reliable_samples))
            .map(|b| b.streak_length)
            .collect()
    }
}

/// Industry lookup from the security list plus the configured override file.
pub fn industry_table(config: &AnalysisConfig, market: &LoadedMarket) -> Result<IndustryTable, RunError> {
    let table = IndustryTable::from_securities(&market.securities);
    let Some(path) = &config.industry.override_file else {
        return Ok(table);
    };
    let overrides = IndustryOverrides::from_file(path)?;
    info!(path = %path.display(), codes = overrides.code_count(), "industry overrides loaded");
    Ok(table.with_overrides(&overrides))
}

/// Run the full analysis over a loaded market.
pub fn run_analysis(
    config: &AnalysisConfig,
    market: &LoadedMarket,
    by_industry: bool,
) -> Result<AnalysisReport, RunError> {
    let request = market.request;
    let tracked = track_all(&market.calendar, config.classifier(), request.as_of, &market.records);
    if tracked.partial_securities > 0 {
        warn!(
            securities = tracked.partial_securities,
            exclusions = tracked.diagnostics.len(),
            "some records were excluded from tracking"
        );
    }

    let returns = market.return_table();
    let (buckets, industries) = if by_industry {
        let lookup = industry_table(config, market)?;
        if lookup.is_empty() {
            warn!("no industry classification available; every security is UNCLASSIFIED");
        }
        let rollup = aggregate_by_industry(&request, &market.calendar, &tracked.episodes, &returns, &lookup)?;
        (rollup.total, Some(rollup.partitions))
    } else {
        (aggregate(&request, &market.calendar, &tracked.episodes, &returns)?, None)
    };
    let distribution = length_distribution(&request, &market.calendar, &tracked.episodes)?;

    let report = AnalysisReport {
        schema_version: SCHEMA_VERSION,
        fingerprint: config.fingerprint(&market.dataset_hash),
        dataset_hash: market.dataset_hash.clone(),
        as_of: request.as_of,
        window_start: market.window_start,
        lookback_trading_days: request.lookback_trading_days,
        direction: request.direction,
        min_reliable_samples: config.analysis.min_reliable_samples,
        security_count: market.records.len(),
        record_count: market.record_count(),
        episode_count: tracked.episodes.len(),
        buckets,
        length_distribution: distribution,
        industries,
        exclusions: tracked.diagnostics,
    };
    info!(
        buckets = report.buckets.len(),
        episodes = report.episode_count,
        exclusions = report.exclusions.len(),
        "analysis complete"
    );
    Ok(report)
}

fn require_trading_day(market: &LoadedMarket, date: NaiveDate) -> Result<(), RunError> {
    if market.calendar.is_trading_day(date) {
        Ok(())
    } else {
        Err(RunError::NotTradingDay(date))
    }
}

/// Limit counts and up-streak ladder for `date`.
pub fn snapshot_at(
    market: &LoadedMarket,
    classifier: LimitClassifier,
    date: NaiveDate,
) -> Result<MarketSnapshot, RunError> {
    require_trading_day(market, date)?;
    let tracked = track_all(&market.calendar, classifier, date, &market.records);
    Ok(MarketSnapshot::build(
        date,
        &market.records_on(date),
        &tracked.episodes,
        &market.calendar,
        &classifier,
    ))
}

/// How the previous trading day's up-limit closes did on `date`.
pub fn performance_at(
    market: &LoadedMarket,
    classifier: LimitClassifier,
    date: NaiveDate,
) -> Result<NextDayPerformance, RunError> {
    require_trading_day(market, date)?;
    let previous = market
        .calendar
        .previous_trading_day(date)
        .ok_or(RunError::NoPreviousDay(date))?;
    Ok(NextDayPerformance::build(
        previous,
        &market.records_on(previous),
        date,
        &market.records_on(date),
        &classifier,
    ))
}

/// Per-industry breadth and turnover for `date`.
pub fn industry_breadth_at(
    config: &AnalysisConfig,
    market: &LoadedMarket,
    date: NaiveDate,
) -> Result<Vec<IndustryDayStats>, RunError> {
    require_trading_day(market, date)?;
    let lookup = industry_table(config, market)?;
    Ok(industry_day_stats(
        date,
        &market.records_on(date),
        &lookup,
        &config.classifier(),
    ))
}
