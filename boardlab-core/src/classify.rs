//! Limit classification: did a record close at its up-limit, down-limit, or neither?
//!
//! Classification is close-price only: a day that touched the limit intraday and
//! fell back is `None`. The classifier never guesses a missing limit price; it
//! reports `IncompleteData` and leaves the policy to the streak tracker.

use crate::domain::{Board, Classification, DailyRecord, LimitState};
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// Default relative tolerance: 0.01% of the limit price.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// One price tick in CNY.
pub const PRICE_TICK: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitClassifier {
    tolerance: f64,
}

impl Default for LimitClassifier {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl LimitClassifier {
    /// Negative or NaN tolerances fall back to zero.
    pub fn new(tolerance: f64) -> Self {
        let tolerance = if tolerance.is_finite() && tolerance > 0.0 {
            tolerance
        } else {
            0.0
        };
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn classify(&self, record: &DailyRecord) -> Result<Classification, AnalysisError> {
        if record.is_suspended {
            return Ok(Classification::suspended());
        }

        let up = usable_limit(record.up_limit)
            .ok_or_else(|| incomplete(record, "missing up_limit price"))?;
        let down = usable_limit(record.down_limit)
            .ok_or_else(|| incomplete(record, "missing down_limit price"))?;
        if !record.close.is_finite() || record.close <= 0.0 {
            return Err(incomplete(record, "missing close price"));
        }

        let close = record.close;
        let state = if close >= up * (1.0 - self.tolerance) {
            LimitState::UpLimit
        } else if close <= down * (1.0 + self.tolerance) {
            LimitState::DownLimit
        } else {
            LimitState::None
        };
        Ok(Classification::traded(state))
    }
}

fn usable_limit(limit: Option<f64>) -> Option<f64> {
    limit.filter(|p| p.is_finite() && *p > 0.0)
}

fn incomplete(record: &DailyRecord, reason: &str) -> AnalysisError {
    AnalysisError::incomplete(&record.security_id, record.date, reason)
}

/// Regulatory daily price-limit rule for a security.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitRule {
    pub board: Board,
    pub is_st: bool,
}

impl LimitRule {
    pub fn new(board: Board, is_st: bool) -> Self {
        Self { board, is_st }
    }

    /// Daily limit as a fraction of the previous close.
    pub fn limit_pct(&self) -> f64 {
        match (self.board, self.is_st) {
            (Board::Beijing, _) => 0.30,
            (Board::ChiNext, _) | (Board::Star, _) => 0.20,
            (Board::Main, true) => 0.05,
            (Board::Main, false) => 0.10,
        }
    }

    /// `(up_limit, down_limit)` implied by the rule, rounded to the tick.
    pub fn expected_limits(&self, prev_close: f64) -> (f64, f64) {
        let pct = self.limit_pct();
        (
            round_to_tick(prev_close * (1.0 + pct)),
            round_to_tick(prev_close * (1.0 - pct)),
        )
    }

    /// True when the feed's limits disagree with the rule by more than one tick.
    ///
    /// New listings trade without limits for their first days, so a mismatch is
    /// a data-quality hint rather than an error.
    pub fn disagrees_with(&self, record: &DailyRecord) -> bool {
        let (Some(up), Some(down)) = (record.up_limit, record.down_limit) else {
            return false;
        };
        if !(record.prev_close > 0.0) {
            return false;
        }
        let (exp_up, exp_down) = self.expected_limits(record.prev_close);
        (up - exp_up).abs() > PRICE_TICK + 1e-9 || (down - exp_down).abs() > PRICE_TICK + 1e-9
    }
}

/// Round half-up to 0.01, absorbing binary representation error.
pub fn round_to_tick(price: f64) -> f64 {
    ((price * 100.0) + 1e-6).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(close: f64, up: Option<f64>, down: Option<f64>) -> DailyRecord {
        DailyRecord {
            security_id: "600000.SH".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 21).unwrap(),
            open: 10.0,
            high: close.max(10.0),
            low: close.min(10.0),
            close,
            prev_close: 10.0,
            up_limit: up,
            down_limit: down,
            volume: 1.0,
            amount: 1.0,
            is_suspended: false,
        }
    }

    #[test]
    fn exact_up_limit() {
        let c = LimitClassifier::default();
        let cls = c.classify(&record(11.0, Some(11.0), Some(9.0))).unwrap();
        assert_eq!(cls.state, LimitState::UpLimit);
        assert!(!cls.suspended);
    }

    #[test]
    fn tolerance_absorbs_feed_rounding() {
        let c = LimitClassifier::default();
        let cls = c.classify(&record(10.9995, Some(11.0), Some(9.0))).unwrap();
        assert_eq!(cls.state, LimitState::UpLimit);
        // One tick below is not a board
        let cls = c.classify(&record(10.99, Some(11.0), Some(9.0))).unwrap();
        assert_eq!(cls.state, LimitState::None);
    }

    #[test]
    fn down_limit() {
        let c = LimitClassifier::default();
        let cls = c.classify(&record(9.0, Some(11.0), Some(9.0))).unwrap();
        assert_eq!(cls.state, LimitState::DownLimit);
    }

    #[test]
    fn suspended_reports_gap_without_prices() {
        let c = LimitClassifier::default();
        let r = DailyRecord::suspended(
            "600000.SH",
            NaiveDate::from_ymd_opt(2024, 3, 21).unwrap(),
            10.0,
            None,
            None,
        );
        let cls = c.classify(&r).unwrap();
        assert_eq!(cls, Classification::suspended());
    }

    #[test]
    fn missing_up_limit_is_incomplete() {
        let c = LimitClassifier::default();
        let err = c.classify(&record(11.0, None, Some(9.0))).unwrap_err();
        assert!(matches!(err, AnalysisError::IncompleteData { .. }));
        let err = c.classify(&record(11.0, Some(0.0), Some(9.0))).unwrap_err();
        assert!(matches!(err, AnalysisError::IncompleteData { .. }));
    }

    #[test]
    fn nan_close_is_incomplete() {
        let c = LimitClassifier::default();
        assert!(c.classify(&record(f64::NAN, Some(11.0), Some(9.0))).is_err());
    }

    #[test]
    fn negative_tolerance_clamps_to_zero() {
        assert_eq!(LimitClassifier::new(-1.0).tolerance(), 0.0);
        assert_eq!(LimitClassifier::new(f64::NAN).tolerance(), 0.0);
    }

    #[test]
    fn rule_percentages() {
        assert_eq!(LimitRule::new(Board::Main, false).limit_pct(), 0.10);
        assert_eq!(LimitRule::new(Board::Main, true).limit_pct(), 0.05);
        assert_eq!(LimitRule::new(Board::ChiNext, true).limit_pct(), 0.20);
        assert_eq!(LimitRule::new(Board::Star, false).limit_pct(), 0.20);
        assert_eq!(LimitRule::new(Board::Beijing, false).limit_pct(), 0.30);
    }

    #[test]
    fn expected_limits_round_half_up() {
        let rule = LimitRule::new(Board::Main, false);
        let (up, down) = rule.expected_limits(10.05);
        assert!((up - 11.06).abs() < 1e-9, "got {up}");
        assert!((down - 9.05).abs() < 1e-9, "got {down}");
    }

    #[test]
    fn rule_flags_inconsistent_feed_limits() {
        let rule = LimitRule::new(Board::Main, false);
        assert!(!rule.disagrees_with(&record(11.0, Some(11.0), Some(9.0))));
        // ST-style 5% limits on a non-ST main-board security
        assert!(rule.disagrees_with(&record(10.5, Some(10.5), Some(9.5))));
        assert!(!rule.disagrees_with(&record(10.5, None, None)));
    }
}
