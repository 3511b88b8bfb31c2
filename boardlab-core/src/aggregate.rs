//! Statistics aggregation over streak episodes.
//!
//! Episodes are maximal runs. For statistics each episode of length `L` is expanded
//! into `L` prefix observations ("reached k boards on day end_k"), so a length-3 run
//! counts once in each of the 1-, 2- and 3-board buckets. A `k`-board observation
//! continued when the `k+1`-board observation with the same security, direction and
//! start date is also inside the window; matching is by key, never by counting.
//!
//! Every function here is pure: inputs in, buckets out.

use crate::calendar::TradingCalendar;
use crate::data::provider::IndustryLookup;
use crate::domain::{BreakReason, DailyRecord, Direction, StreakEpisode, UNCLASSIFIED};
use crate::error::AnalysisError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Buckets with fewer samples than this should be flagged by the reporter.
pub const MIN_RELIABLE_SAMPLES: usize = 5;

/// Source of next-day returns, keyed by security and the date the return is realised.
pub trait NextDayReturns {
    fn next_day_return(&self, security_id: &str, date: NaiveDate) -> Option<f64>;
}

impl<F> NextDayReturns for F
where
    F: Fn(&str, NaiveDate) -> Option<f64>,
{
    fn next_day_return(&self, security_id: &str, date: NaiveDate) -> Option<f64> {
        self(security_id, date)
    }
}

/// Close-to-previous-close returns for every traded record.
#[derive(Debug, Clone, Default)]
pub struct ReturnTable {
    returns: HashMap<(String, NaiveDate), f64>,
}

impl ReturnTable {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DailyRecord>) -> Self {
        let returns = records
            .into_iter()
            .filter_map(|r| r.daily_return().map(|ret| ((r.security_id.clone(), r.date), ret)))
            .collect();
        Self { returns }
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }
}

impl NextDayReturns for ReturnTable {
    fn next_day_return(&self, security_id: &str, date: NaiveDate) -> Option<f64> {
        self.returns.get(&(security_id.to_string(), date)).copied()
    }
}

/// What to aggregate: window end, window size and streak direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub as_of: NaiveDate,
    pub lookback_trading_days: u32,
    pub direction: Direction,
}

impl AggregateRequest {
    /// Inclusive `[start, as_of]` window, in trading days.
    pub fn window(&self, calendar: &TradingCalendar) -> Result<(NaiveDate, NaiveDate), AnalysisError> {
        let start = calendar.offset_trading_days(self.as_of, -i64::from(self.lookback_trading_days))?;
        Ok((start, self.as_of))
    }
}

/// Statistics for one streak length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub streak_length: u32,
    pub sample_count: usize,
    pub continuation_count: usize,
    /// Observations that contributed a next-day return.
    pub return_count: usize,
    pub next_day_return_mean: Option<f64>,
    pub next_day_return_stddev: Option<f64>,
}

impl AggregateBucket {
    /// Share of streaks at this length that reached the next length.
    pub fn continuation_probability(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.continuation_count as f64 / self.sample_count as f64
    }

    pub fn is_reliable(&self, min_samples: usize) -> bool {
        self.sample_count >= min_samples
    }
}

type StreakKey<'a> = (&'a str, Direction, NaiveDate);

struct Observation<'a> {
    key: StreakKey<'a>,
    length: u32,
    end: NaiveDate,
    /// Last observation of an episode that ended in suspension: no next-day price.
    no_next_price: bool,
}

/// Aggregate episodes into per-length buckets, ascending by length.
pub fn aggregate(
    request: &AggregateRequest,
    calendar: &TradingCalendar,
    episodes: &[StreakEpisode],
    returns: &dyn NextDayReturns,
) -> Result<Vec<AggregateBucket>, AnalysisError> {
    let refs: Vec<&StreakEpisode> = episodes.iter().collect();
    aggregate_refs(request, calendar, &refs, returns)
}

fn aggregate_refs(
    request: &AggregateRequest,
    calendar: &TradingCalendar,
    episodes: &[&StreakEpisode],
    returns: &dyn NextDayReturns,
) -> Result<Vec<AggregateBucket>, AnalysisError> {
    let (start, end) = request.window(calendar)?;

    let mut groups: BTreeMap<u32, Vec<Observation<'_>>> = BTreeMap::new();
    for episode in episodes.iter().filter(|e| e.direction == request.direction) {
        for obs in observations(episode, calendar) {
            if obs.end >= start && obs.end <= end {
                groups.entry(obs.length).or_default().push(obs);
            }
        }
    }

    let keys_by_length: HashMap<u32, HashSet<StreakKey<'_>>> = groups
        .iter()
        .map(|(len, obs)| (*len, obs.iter().map(|o| o.key).collect()))
        .collect();

    let buckets = groups
        .iter()
        .map(|(&length, obs)| {
            let continuation_count = keys_by_length
                .get(&(length + 1))
                .map(|next| obs.iter().filter(|o| next.contains(&o.key)).count())
                .unwrap_or(0);

            let next_returns: Vec<f64> = obs
                .iter()
                .filter(|o| !o.no_next_price)
                .filter_map(|o| {
                    let next_day = calendar.offset_trading_days(o.end, 1).ok()?;
                    returns.next_day_return(o.key.0, next_day)
                })
                .filter(|r| r.is_finite())
                .collect();

            AggregateBucket {
                streak_length: length,
                sample_count: obs.len(),
                continuation_count,
                return_count: next_returns.len(),
                next_day_return_mean: mean(&next_returns),
                next_day_return_stddev: sample_std_dev(&next_returns),
            }
        })
        .collect();

    Ok(buckets)
}

/// Expand a maximal episode into one observation per board day.
fn observations<'a>(episode: &'a StreakEpisode, calendar: &TradingCalendar) -> Vec<Observation<'a>> {
    let key = (episode.security_id.as_str(), episode.direction, episode.start_date);
    let board_days: Vec<NaiveDate> = calendar
        .trading_dates_in_range(episode.start_date, episode.end_date)
        .filter(|d| !episode.skipped_dates.contains(d))
        .take(episode.length as usize)
        .collect();

    board_days
        .into_iter()
        .enumerate()
        .map(|(i, end)| {
            let length = i as u32 + 1;
            Observation {
                key,
                length,
                end,
                no_next_price: length == episode.length
                    && episode.break_reason == BreakReason::Suspended,
            }
        })
        .collect()
}

/// Maximal-episode counts by length for episodes ending inside the window.
pub fn length_distribution(
    request: &AggregateRequest,
    calendar: &TradingCalendar,
    episodes: &[StreakEpisode],
) -> Result<BTreeMap<u32, usize>, AnalysisError> {
    let (start, end) = request.window(calendar)?;
    let mut dist = BTreeMap::new();
    for ep in episodes
        .iter()
        .filter(|e| e.direction == request.direction && e.end_date >= start && e.end_date <= end)
    {
        *dist.entry(ep.length).or_insert(0) += 1;
    }
    Ok(dist)
}

/// Ungrouped buckets plus one bucket sequence per industry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryRollup {
    pub total: Vec<AggregateBucket>,
    pub partitions: BTreeMap<String, Vec<AggregateBucket>>,
}

/// Partition episodes by industry, aggregate each partition, and verify that the
/// partitions conserve the ungrouped sample counts.
pub fn aggregate_by_industry(
    request: &AggregateRequest,
    calendar: &TradingCalendar,
    episodes: &[StreakEpisode],
    returns: &dyn NextDayReturns,
    industries: &dyn IndustryLookup,
) -> Result<IndustryRollup, AnalysisError> {
    let total = aggregate(request, calendar, episodes, returns)?;

    let mut by_industry: BTreeMap<String, Vec<&StreakEpisode>> = BTreeMap::new();
    for ep in episodes {
        let industry = industries
            .lookup_industry(&ep.security_id)
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        by_industry.entry(industry).or_default().push(ep);
    }

    let mut partitions = BTreeMap::new();
    for (industry, eps) in by_industry {
        let buckets = aggregate_refs(request, calendar, &eps, returns)?;
        if !buckets.is_empty() {
            partitions.insert(industry, buckets);
        }
    }

    check_conservation(&total, &partitions)?;
    Ok(IndustryRollup { total, partitions })
}

/// Every observation must land in exactly one partition.
pub fn check_conservation(
    total: &[AggregateBucket],
    partitions: &BTreeMap<String, Vec<AggregateBucket>>,
) -> Result<(), AnalysisError> {
    let mut sums: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for bucket in partitions.values().flatten() {
        let entry = sums.entry(bucket.streak_length).or_insert((0, 0));
        entry.0 += bucket.sample_count;
        entry.1 += bucket.continuation_count;
    }
    let expected: BTreeMap<u32, (usize, usize)> = total
        .iter()
        .map(|b| (b.streak_length, (b.sample_count, b.continuation_count)))
        .collect();

    if sums != expected {
        for (length, want) in &expected {
            let got = sums.get(length).copied().unwrap_or((0, 0));
            if got != *want {
                return Err(AnalysisError::InvariantViolation(format!(
                    "industry partitions hold {} samples ({} continuations) for length {length}, \
                     ungrouped total is {} ({})",
                    got.0, got.1, want.0, want.1
                )));
            }
        }
        return Err(AnalysisError::InvariantViolation(
            "industry partitions contain streak lengths absent from the ungrouped total".into(),
        ));
    }
    Ok(())
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1); 0.0 for a single sample.
fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}
