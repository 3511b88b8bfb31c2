//! Single-day market views: limit counts, streak ladder, yesterday's boards
//! today, industry breadth, and market-segment distribution.

use crate::calendar::TradingCalendar;
use crate::classify::LimitClassifier;
use crate::data::provider::IndustryLookup;
use crate::domain::{DailyRecord, Direction, LimitState, SecurityInfo, StreakEpisode, UNCLASSIFIED};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Feed turnover is in thousands of CNY; one 亿 is 1e8 CNY.
const THOUSANDS_PER_YI: f64 = 1e5;

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Limit counts and the current streak ladder for one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub date: NaiveDate,
    pub traded: usize,
    pub up_limit: usize,
    pub down_limit: usize,
    pub suspended: usize,
    /// Traded records that could not be classified.
    pub unclassified: usize,
    /// Board count reached on `date` → securities at that count.
    pub ladder: BTreeMap<u32, Vec<String>>,
}

impl MarketSnapshot {
    /// `records` are the day's records; `episodes` are tracked up-streaks covering the day.
    pub fn build(
        date: NaiveDate,
        records: &[DailyRecord],
        episodes: &[StreakEpisode],
        calendar: &TradingCalendar,
        classifier: &LimitClassifier,
    ) -> Self {
        let mut snap = MarketSnapshot {
            date,
            traded: 0,
            up_limit: 0,
            down_limit: 0,
            suspended: 0,
            unclassified: 0,
            ladder: streak_ladder(date, episodes, calendar, Direction::Up),
        };
        for rec in records.iter().filter(|r| r.date == date) {
            if rec.is_suspended {
                snap.suspended += 1;
                continue;
            }
            snap.traded += 1;
            match classifier.classify(rec).map(|c| c.state) {
                Ok(LimitState::UpLimit) => snap.up_limit += 1,
                Ok(LimitState::DownLimit) => snap.down_limit += 1,
                Ok(LimitState::None) => {}
                Err(_) => snap.unclassified += 1,
            }
        }
        snap
    }

    /// Share of traded securities that closed at the up-limit.
    pub fn limit_up_ratio(&self) -> f64 {
        ratio(self.up_limit, self.traded)
    }

    /// Securities on a streak of at least `min_boards` on this day.
    pub fn at_least(&self, min_boards: u32) -> usize {
        self.ladder.range(min_boards..).map(|(_, ids)| ids.len()).sum()
    }

    pub fn highest_board(&self) -> Option<u32> {
        self.ladder.keys().next_back().copied()
    }
}

/// For each security with a `direction` board on `date`, the board count reached that day.
pub fn streak_ladder(
    date: NaiveDate,
    episodes: &[StreakEpisode],
    calendar: &TradingCalendar,
    direction: Direction,
) -> BTreeMap<u32, Vec<String>> {
    let mut ladder: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for ep in episodes
        .iter()
        .filter(|e| e.direction == direction && e.covers(date) && !e.skipped_dates.contains(&date))
    {
        let boards = calendar
            .trading_dates_in_range(ep.start_date, date)
            .filter(|d| !ep.skipped_dates.contains(d))
            .count() as u32;
        if boards > 0 {
            ladder.entry(boards).or_default().push(ep.security_id.clone());
        }
    }
    for ids in ladder.values_mut() {
        ids.sort();
    }
    ladder
}

/// How the previous trading day's up-limit securities did on `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextDayPerformance {
    pub date: NaiveDate,
    pub previous_date: NaiveDate,
    /// Up-limit closes on `previous_date`.
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub flat: usize,
    pub up_limit_again: usize,
    pub down_limit: usize,
    /// Suspended or missing on `date`.
    pub not_traded: usize,
    pub mean_return: Option<f64>,
}

impl NextDayPerformance {
    pub fn build(
        previous_date: NaiveDate,
        previous: &[DailyRecord],
        date: NaiveDate,
        today: &[DailyRecord],
        classifier: &LimitClassifier,
    ) -> Self {
        let boards: HashSet<&str> = previous
            .iter()
            .filter(|r| r.date == previous_date)
            .filter(|r| matches!(classifier.classify(r), Ok(c) if c.state == LimitState::UpLimit))
            .map(|r| r.security_id.as_str())
            .collect();
        let today_by_id: HashMap<&str, &DailyRecord> = today
            .iter()
            .filter(|r| r.date == date)
            .map(|r| (r.security_id.as_str(), r))
            .collect();

        let mut perf = NextDayPerformance {
            date,
            previous_date,
            total: boards.len(),
            up: 0,
            down: 0,
            flat: 0,
            up_limit_again: 0,
            down_limit: 0,
            not_traded: 0,
            mean_return: None,
        };
        let mut returns = Vec::with_capacity(boards.len());
        for id in &boards {
            let Some(rec) = today_by_id.get(id).filter(|r| !r.is_suspended) else {
                perf.not_traded += 1;
                continue;
            };
            match rec.daily_return() {
                Some(r) if r > 0.0 => perf.up += 1,
                Some(r) if r < 0.0 => perf.down += 1,
                Some(_) => perf.flat += 1,
                None => {
                    perf.not_traded += 1;
                    continue;
                }
            }
            if let Some(r) = rec.daily_return() {
                returns.push(r);
            }
            match classifier.classify(rec).map(|c| c.state) {
                Ok(LimitState::UpLimit) => perf.up_limit_again += 1,
                Ok(LimitState::DownLimit) => perf.down_limit += 1,
                _ => {}
            }
        }
        if !returns.is_empty() {
            perf.mean_return = Some(returns.iter().sum::<f64>() / returns.len() as f64);
        }
        perf
    }

    pub fn up_ratio(&self) -> f64 {
        ratio(self.up, self.total)
    }

    pub fn down_ratio(&self) -> f64 {
        ratio(self.down, self.total)
    }

    pub fn up_limit_ratio(&self) -> f64 {
        ratio(self.up_limit_again, self.total)
    }

    pub fn down_limit_ratio(&self) -> f64 {
        ratio(self.down_limit, self.total)
    }
}

/// Breadth and turnover of one industry on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryDayStats {
    pub industry: String,
    pub securities: usize,
    pub advancers: usize,
    pub up_limit: usize,
    /// Turnover in 亿 CNY.
    pub amount_yi: f64,
    pub mean_change_pct: Option<f64>,
}

impl IndustryDayStats {
    pub fn advancer_ratio(&self) -> f64 {
        ratio(self.advancers, self.securities)
    }

    pub fn up_limit_ratio(&self) -> f64 {
        ratio(self.up_limit, self.securities)
    }
}

/// Per-industry stats over the traded records of `date`, largest turnover first.
pub fn industry_day_stats(
    date: NaiveDate,
    records: &[DailyRecord],
    industries: &dyn IndustryLookup,
    classifier: &LimitClassifier,
) -> Vec<IndustryDayStats> {
    #[derive(Default)]
    struct Acc {
        securities: usize,
        advancers: usize,
        up_limit: usize,
        amount: f64,
        change_sum: f64,
        change_n: usize,
    }

    let mut groups: BTreeMap<String, Acc> = BTreeMap::new();
    for rec in records.iter().filter(|r| r.date == date && !r.is_suspended) {
        let industry = industries
            .lookup_industry(&rec.security_id)
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        let acc = groups.entry(industry).or_default();
        acc.securities += 1;
        if let Some(chg) = rec.change_pct() {
            if chg > 0.0 {
                acc.advancers += 1;
            }
            acc.change_sum += chg;
            acc.change_n += 1;
        }
        if matches!(classifier.classify(rec), Ok(c) if c.state == LimitState::UpLimit) {
            acc.up_limit += 1;
        }
        if rec.amount.is_finite() {
            acc.amount += rec.amount;
        }
    }

    let mut stats: Vec<IndustryDayStats> = groups
        .into_iter()
        .map(|(industry, acc)| IndustryDayStats {
            industry,
            securities: acc.securities,
            advancers: acc.advancers,
            up_limit: acc.up_limit,
            amount_yi: acc.amount / THOUSANDS_PER_YI,
            mean_change_pct: (acc.change_n > 0).then(|| acc.change_sum / acc.change_n as f64),
        })
        .collect();
    stats.sort_by(|a, b| b.amount_yi.total_cmp(&a.amount_yi).then_with(|| a.industry.cmp(&b.industry)));
    stats
}

/// Listed securities per market segment, most populous first.
pub fn market_distribution(securities: &[SecurityInfo]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for sec in securities {
        let market = sec
            .market
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNCLASSIFIED);
        *counts.entry(market.to_string()).or_insert(0) += 1;
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BreakReason;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn rec(id: &str, date: NaiveDate, close: f64, prev_close: f64) -> DailyRecord {
        DailyRecord {
            security_id: id.into(),
            date,
            open: prev_close,
            high: close.max(prev_close),
            low: close.min(prev_close),
            close,
            prev_close,
            up_limit: Some((prev_close * 1.1 * 100.0).round() / 100.0),
            down_limit: Some((prev_close * 0.9 * 100.0).round() / 100.0),
            volume: 100.0,
            amount: 50_000.0,
            is_suspended: false,
        }
    }

    fn calendar() -> TradingCalendar {
        TradingCalendar::new(vec![d(6), d(7), d(8), d(9), d(10)])
    }

    #[test]
    fn snapshot_counts() {
        let records = vec![
            rec("A", d(8), 11.0, 10.0),
            rec("B", d(8), 9.0, 10.0),
            rec("C", d(8), 10.2, 10.0),
            DailyRecord::suspended("D", d(8), 10.0, None, None),
        ];
        let snap = MarketSnapshot::build(d(8), &records, &[], &calendar(), &LimitClassifier::default());
        assert_eq!(snap.traded, 3);
        assert_eq!(snap.up_limit, 1);
        assert_eq!(snap.down_limit, 1);
        assert_eq!(snap.suspended, 1);
        assert!((snap.limit_up_ratio() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn ladder_counts_board_days_not_skipped_days() {
        let eps = vec![
            StreakEpisode {
                security_id: "A".into(),
                start_date: d(6),
                end_date: d(9),
                length: 3,
                direction: Direction::Up,
                break_reason: BreakReason::PriceReversed,
                skipped_dates: vec![d(7)],
            },
            StreakEpisode {
                security_id: "B".into(),
                start_date: d(8),
                end_date: d(8),
                length: 1,
                direction: Direction::Up,
                break_reason: BreakReason::PriceReversed,
                skipped_dates: vec![],
            },
        ];
        let ladder = streak_ladder(d(8), &eps, &calendar(), Direction::Up);
        assert_eq!(ladder.get(&2), Some(&vec!["A".to_string()]));
        assert_eq!(ladder.get(&1), Some(&vec!["B".to_string()]));
        // Skipped day is not a board day
        assert!(streak_ladder(d(7), &eps, &calendar(), Direction::Up).is_empty());

        let snap = MarketSnapshot::build(d(8), &[], &eps, &calendar(), &LimitClassifier::default());
        assert_eq!(snap.highest_board(), Some(2));
        assert_eq!(snap.at_least(2), 1);
    }

    #[test]
    fn next_day_performance() {
        let prev = vec![
            rec("A", d(7), 11.0, 10.0),
            rec("B", d(7), 11.0, 10.0),
            rec("C", d(7), 5.5, 5.0),
            rec("D", d(7), 11.0, 10.0),
            rec("E", d(7), 10.1, 10.0),
        ];
        let today = vec![
            rec("A", d(8), 12.1, 11.0),
            rec("B", d(8), 9.9, 11.0),
            rec("C", d(8), 5.6, 5.5),
            DailyRecord::suspended("D", d(8), 11.0, None, None),
            rec("E", d(8), 11.11, 10.1),
        ];
        let perf = NextDayPerformance::build(d(7), &prev, d(8), &today, &LimitClassifier::default());
        assert_eq!(perf.total, 4);
        assert_eq!(perf.up, 2);
        assert_eq!(perf.down, 1);
        assert_eq!(perf.up_limit_again, 1);
        assert_eq!(perf.down_limit, 1);
        assert_eq!(perf.not_traded, 1);
        assert_eq!(perf.up_ratio(), 0.5);
    }

    #[test]
    fn industry_stats_sorted_by_amount() {
        let mut big = rec("B1", d(8), 11.0, 10.0);
        big.amount = 2_000_000.0;
        let records = vec![rec("A1", d(8), 10.5, 10.0), rec("A2", d(8), 9.5, 10.0), big];
        let mut map = HashMap::new();
        map.insert("A1".to_string(), "银行".to_string());
        map.insert("A2".to_string(), "银行".to_string());
        let stats = industry_day_stats(d(8), &records, &map, &LimitClassifier::default());
        assert_eq!(stats[0].industry, UNCLASSIFIED);
        assert_eq!(stats[0].up_limit, 1);
        assert!((stats[0].amount_yi - 20.0).abs() < 1e-9);
        assert_eq!(stats[1].securities, 2);
        assert_eq!(stats[1].advancers, 1);
        assert!(stats[1].mean_change_pct.unwrap().abs() < 1e-9);
    }

    #[test]
    fn market_distribution_counts() {
        let sec = |code: &str, market: Option<&str>| SecurityInfo {
            ts_code: code.into(),
            symbol: code[..6].into(),
            name: "x".into(),
            area: None,
            industry: None,
            market: market.map(String::from),
            exchange: None,
            list_date: None,
        };
        let dist = market_distribution(&[
            sec("600000.SH", Some("主板")),
            sec("600001.SH", Some("主板")),
            sec("300001.SZ", Some("创业板")),
            sec("830001.BJ", None),
        ]);
        assert_eq!(dist[0], ("主板".to_string(), 2));
        assert_eq!(dist.len(), 3);
    }
}
