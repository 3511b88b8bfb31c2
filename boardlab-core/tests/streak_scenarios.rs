//! End-to-end tracker and aggregator scenarios on a small market.

use boardlab_core::aggregate::{aggregate, AggregateRequest, ReturnTable};
use boardlab_core::calendar::TradingCalendar;
use boardlab_core::classify::LimitClassifier;
use boardlab_core::domain::{BreakReason, DailyRecord, Direction, StreakEpisode};
use boardlab_core::streak::StreakTracker;
use chrono::NaiveDate;

fn d(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

/// Trading days 2024-03-18 .. 2024-03-29.
fn calendar() -> TradingCalendar {
    TradingCalendar::new(vec![
        d(3, 18),
        d(3, 19),
        d(3, 20),
        d(3, 21),
        d(3, 22),
        d(3, 25),
        d(3, 26),
        d(3, 27),
        d(3, 28),
        d(3, 29),
    ])
}

/// A traded day for a 10-yuan main-board security whose price path is
/// re-anchored daily, so limits are always 11.00 / 9.00.
fn traded(id: &str, date: NaiveDate, close: f64) -> DailyRecord {
    DailyRecord {
        security_id: id.into(),
        date,
        open: 10.0,
        high: close.max(10.0),
        low: close.min(10.0),
        close,
        prev_close: 10.0,
        up_limit: Some(11.0),
        down_limit: Some(9.0),
        volume: 10_000.0,
        amount: 10_500.0,
        is_suspended: false,
    }
}

fn board(id: &str, date: NaiveDate) -> DailyRecord {
    traded(id, date, 11.0)
}

#[test]
fn three_boards_then_reversal() {
    let cal = calendar();
    let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
    let records = vec![
        board("600519.SH", d(3, 18)),
        board("600519.SH", d(3, 19)),
        board("600519.SH", d(3, 20)),
        traded("600519.SH", d(3, 21), 10.3),
    ];
    let track = tracker.track("600519.SH", &records);

    assert_eq!(track.episodes.len(), 1);
    let ep = &track.episodes[0];
    assert_eq!(ep.length, 3);
    assert_eq!(ep.start_date, d(3, 18));
    assert_eq!(ep.end_date, d(3, 20));
    assert_eq!(ep.break_reason, BreakReason::PriceReversed);
    assert!(!track.is_partial());
}

#[test]
fn suspension_inside_streak_is_skipped() {
    let cal = calendar();
    let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
    let records = vec![
        board("000858.SZ", d(3, 18)),
        DailyRecord::suspended("000858.SZ", d(3, 19), 11.0, Some(12.1), Some(9.9)),
        board("000858.SZ", d(3, 20)),
        traded("000858.SZ", d(3, 21), 9.8),
    ];
    let track = tracker.track("000858.SZ", &records);

    assert_eq!(track.episodes.len(), 1);
    let ep = &track.episodes[0];
    assert_eq!(ep.start_date, d(3, 18));
    assert_eq!(ep.end_date, d(3, 20));
    assert_eq!(ep.length, 2);
    assert_eq!(ep.skipped_dates, vec![d(3, 19)]);
    assert_eq!(ep.span_days(), 3);
}

#[test]
fn board_on_final_day_ends_with_data_end() {
    let cal = calendar();
    let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
    let records = vec![traded("601318.SH", d(3, 28), 10.2), board("601318.SH", d(3, 29))];
    let track = tracker.track("601318.SH", &records);

    assert_eq!(track.episodes.len(), 1);
    assert_eq!(track.episodes[0].length, 1);
    assert_eq!(track.episodes[0].break_reason, BreakReason::DataEnd);
}

#[test]
fn continuation_probability_from_one_hundred_first_boards() {
    let cal = calendar();
    let single = |i: usize| StreakEpisode {
        security_id: format!("{:06}.SZ", i),
        start_date: d(3, 20),
        end_date: d(3, 20),
        length: 1,
        direction: Direction::Up,
        break_reason: BreakReason::PriceReversed,
        skipped_dates: Vec::new(),
    };
    let double = |i: usize| StreakEpisode {
        end_date: d(3, 21),
        length: 2,
        ..single(i)
    };
    let episodes: Vec<StreakEpisode> = (0..100).map(|i| if i < 30 { double(i) } else { single(i) }).collect();

    let request = AggregateRequest {
        as_of: d(3, 29),
        lookback_trading_days: 9,
        direction: Direction::Up,
    };
    let buckets = aggregate(&request, &cal, &episodes, &ReturnTable::default()).unwrap();
    let first = &buckets[0];
    assert_eq!(first.streak_length, 1);
    assert_eq!(first.sample_count, 100);
    assert_eq!(first.continuation_count, 30);
    assert!((first.continuation_probability() - 0.30).abs() < 1e-12);
    assert_eq!(buckets[1].sample_count, 30);
}

#[test]
fn next_day_returns_follow_streak_end() {
    let cal = calendar();
    let tracker = StreakTracker::with_calendar_horizon(&cal, LimitClassifier::default()).unwrap();
    let mut records = vec![
        board("300750.SZ", d(3, 25)),
        board("300750.SZ", d(3, 26)),
        traded("300750.SZ", d(3, 27), 10.4),
    ];
    // ChiNext-style wider limits so the reversal day is ordinary
    for r in &mut records {
        r.up_limit = Some(11.0);
        r.down_limit = Some(8.0);
    }
    let track = tracker.track("300750.SZ", &records);
    let returns = ReturnTable::from_records(&records);

    let request = AggregateRequest {
        as_of: d(3, 29),
        lookback_trading_days: 9,
        direction: Direction::Up,
    };
    let buckets = aggregate(&request, &cal, &track.episodes, &returns).unwrap();
    // 1-board observation (3/25) is followed by 3/26 (+10%); 2-board (3/26) by 3/27 (+4%)
    assert!((buckets[0].next_day_return_mean.unwrap() - 0.10).abs() < 1e-9);
    assert!((buckets[1].next_day_return_mean.unwrap() - 0.04).abs() < 1e-9);
    assert_eq!(buckets[1].continuation_count, 0);
}
