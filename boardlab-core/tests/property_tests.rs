//! Property tests for tracker and aggregator invariants.
//!
//! Uses proptest to verify:
//! 1. Coverage: every limit day is a board day of exactly one episode, and
//!    every skipped day is a day without trading
//! 2. Monotonicity: length equals span minus skipped days; spans never overlap
//! 3. Idempotence: tracking the same input twice yields identical output
//! 4. Conservation: industry partitions sum to the ungrouped counts

use boardlab_core::aggregate::{aggregate, aggregate_by_industry, AggregateRequest, ReturnTable};
use boardlab_core::calendar::TradingCalendar;
use boardlab_core::classify::LimitClassifier;
use boardlab_core::domain::{DailyRecord, Direction, StreakEpisode};
use boardlab_core::streak::StreakTracker;
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Day {
    Up,
    Down,
    Flat,
    Suspended,
    Missing,
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_day() -> impl Strategy<Value = Day> {
    prop_oneof![
        4 => Just(Day::Up),
        2 => Just(Day::Down),
        4 => Just(Day::Flat),
        1 => Just(Day::Suspended),
        1 => Just(Day::Missing),
    ]
}

fn arb_history() -> impl Strategy<Value = Vec<Day>> {
    prop::collection::vec(arb_day(), 1..60)
}

fn arb_market() -> impl Strategy<Value = Vec<(Vec<Day>, Option<u8>)>> {
    prop::collection::vec((prop::collection::vec(arb_day(), 30), prop::option::of(0u8..3)), 1..8)
}

// ── Helpers ──────────────────────────────────────────────────────────

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

fn calendar(n: usize) -> TradingCalendar {
    TradingCalendar::new((0..n as i64).map(|i| base() + Duration::days(i)))
}

fn records(id: &str, days: &[Day]) -> Vec<DailyRecord> {
    days.iter()
        .enumerate()
        .filter_map(|(i, day)| {
            let date = base() + Duration::days(i as i64);
            let close: f64 = match day {
                Day::Up => 11.0,
                Day::Down => 9.0,
                Day::Flat => 10.0,
                Day::Suspended => return Some(DailyRecord::suspended(id, date, 10.0, Some(11.0), Some(9.0))),
                Day::Missing => return None,
            };
            Some(DailyRecord {
                security_id: id.into(),
                date,
                open: 10.0,
                high: close.max(10.0),
                low: close.min(10.0),
                close,
                prev_close: 10.0,
                up_limit: Some(11.0),
                down_limit: Some(9.0),
                volume: 1.0,
                amount: 1.0,
                is_suspended: false,
            })
        })
        .collect()
}

fn board_days(ep: &StreakEpisode, cal: &TradingCalendar) -> Vec<NaiveDate> {
    cal.trading_dates_in_range(ep.start_date, ep.end_date)
        .filter(|d| !ep.skipped_dates.contains(d))
        .collect()
}

fn day_at(days: &[Day], date: NaiveDate) -> Day {
    days[(date - base()).num_days() as usize]
}

// ── 1. Coverage ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn every_limit_day_is_one_board_day(days in arb_history()) {
        let cal = calendar(days.len());
        let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
        let track = tracker.track("X", &records("X", &days));

        let mut seen = BTreeSet::new();
        for ep in &track.episodes {
            let want = match ep.direction {
                Direction::Up => Day::Up,
                Direction::Down => Day::Down,
            };
            for date in board_days(ep, &cal) {
                prop_assert_eq!(day_at(&days, date), want);
                prop_assert!(seen.insert(date), "board day {} counted twice", date);
            }
            for date in &ep.skipped_dates {
                let day = day_at(&days, *date);
                prop_assert!(day == Day::Suspended || day == Day::Missing);
            }
        }

        let limit_days = days.iter().filter(|d| matches!(d, Day::Up | Day::Down)).count();
        prop_assert_eq!(seen.len(), limit_days);
    }
}

// ── 2. Monotonicity ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn length_is_span_minus_gaps(days in arb_history()) {
        let cal = calendar(days.len());
        let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
        let track = tracker.track("X", &records("X", &days));

        for ep in &track.episodes {
            prop_assert!(ep.end_date >= ep.start_date);
            prop_assert!(ep.length >= 1);
            let span = cal.count_in_range(ep.start_date, ep.end_date);
            prop_assert_eq!(ep.length as usize, span - ep.skipped_dates.len());
        }
        for pair in track.episodes.windows(2) {
            prop_assert!(pair[0].end_date < pair[1].start_date);
        }
    }
}

// ── 3. Idempotence ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn tracking_is_idempotent(days in arb_history()) {
        let cal = calendar(days.len());
        let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
        let input = records("X", &days);
        prop_assert_eq!(tracker.track("X", &input), tracker.track("X", &input));
    }
}

// ── 4. Conservation ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn industry_partitions_conserve_counts(market in arb_market()) {
        let cal = calendar(30);
        let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();

        let mut episodes = Vec::new();
        let mut all_records = Vec::new();
        let mut industries = HashMap::new();
        for (i, (days, industry)) in market.iter().enumerate() {
            let id = format!("{i:06}.SZ");
            let recs = records(&id, days);
            episodes.extend(tracker.track(&id, &recs).episodes);
            all_records.extend(recs);
            if let Some(ind) = industry {
                industries.insert(id, format!("IND{ind}"));
            }
        }
        let returns = ReturnTable::from_records(&all_records);

        for direction in [Direction::Up, Direction::Down] {
            let request = AggregateRequest {
                as_of: cal.last().unwrap(),
                lookback_trading_days: 29,
                direction,
            };
            let rollup = aggregate_by_industry(&request, &cal, &episodes, &returns, &industries).unwrap();
            let total = aggregate(&request, &cal, &episodes, &returns).unwrap();
            prop_assert_eq!(&rollup.total, &total);

            for bucket in &total {
                let sum: usize = rollup
                    .partitions
                    .values()
                    .flatten()
                    .filter(|b| b.streak_length == bucket.streak_length)
                    .map(|b| b.sample_count)
                    .sum();
                prop_assert_eq!(sum, bucket.sample_count);
                prop_assert!(bucket.continuation_count <= bucket.sample_count);
            }
        }
    }
}
