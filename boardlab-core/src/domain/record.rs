//! DailyRecord: one security on one trading day, quote merged with limit prices.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily quote plus the exchange-published limit prices for the same day.
///
/// Prices of a suspended record are NaN; the limit prices may still be
/// present because the exchange publishes them for suspended securities too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub security_id: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub prev_close: f64,
    pub up_limit: Option<f64>,
    pub down_limit: Option<f64>,
    /// Volume in lots (100 shares).
    pub volume: f64,
    /// Turnover in thousands of CNY, as published by the feed.
    pub amount: f64,
    pub is_suspended: bool,
}

impl DailyRecord {
    /// A suspended day: no trades, prices void.
    pub fn suspended(
        security_id: impl Into<String>,
        date: NaiveDate,
        prev_close: f64,
        up_limit: Option<f64>,
        down_limit: Option<f64>,
    ) -> Self {
        Self {
            security_id: security_id.into(),
            date,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            prev_close,
            up_limit,
            down_limit,
            volume: 0.0,
            amount: 0.0,
            is_suspended: true,
        }
    }

    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close > 0.0
    }

    /// Close-to-previous-close return as a fraction, `None` when either side is unusable.
    pub fn daily_return(&self) -> Option<f64> {
        if self.is_suspended || self.close.is_nan() || !(self.prev_close > 0.0) {
            return None;
        }
        Some(self.close / self.prev_close - 1.0)
    }

    /// Percentage change, the way the feed reports `pct_chg`.
    pub fn change_pct(&self) -> Option<f64> {
        self.daily_return().map(|r| r * 100.0)
    }
}

/// Where a record closed relative to its limit prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitState {
    UpLimit,
    DownLimit,
    None,
}

impl LimitState {
    pub fn direction(self) -> Option<Direction> {
        match self {
            LimitState::UpLimit => Some(Direction::Up),
            LimitState::DownLimit => Some(Direction::Down),
            LimitState::None => None,
        }
    }
}

/// Classifier output. `suspended` is reported out of band so that "no limit"
/// and "no trading" stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: LimitState,
    pub suspended: bool,
}

impl Classification {
    pub fn traded(state: LimitState) -> Self {
        Self {
            state,
            suspended: false,
        }
    }

    pub fn suspended() -> Self {
        Self {
            state: LimitState::None,
            suspended: true,
        }
    }
}

/// Streak direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn limit_state(self) -> LimitState {
        match self {
            Direction::Up => LimitState::UpLimit,
            Direction::Down => LimitState::DownLimit,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("unknown direction '{other}' (expected up or down)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> DailyRecord {
        DailyRecord {
            security_id: "600000.SH".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 21).unwrap(),
            open: 10.0,
            high: 11.0,
            low: 9.9,
            close: 11.0,
            prev_close: 10.0,
            up_limit: Some(11.0),
            down_limit: Some(9.0),
            volume: 120_000.0,
            amount: 130_000.0,
            is_suspended: false,
        }
    }

    #[test]
    fn record_is_sane() {
        assert!(sample_record().is_sane());
    }

    #[test]
    fn suspended_record_is_void() {
        let r = DailyRecord::suspended("600000.SH", sample_record().date, 10.0, Some(11.0), Some(9.0));
        assert!(r.is_void());
        assert!(!r.is_sane());
        assert_eq!(r.daily_return(), None);
    }

    #[test]
    fn daily_return_uses_prev_close() {
        let r = sample_record();
        assert!((r.daily_return().unwrap() - 0.10).abs() < 1e-12);
        assert!((r.change_pct().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn daily_return_rejects_zero_prev_close() {
        let mut r = sample_record();
        r.prev_close = 0.0;
        assert_eq!(r.daily_return(), None);
    }

    #[test]
    fn direction_parses_case_insensitive() {
        assert_eq!("UP".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("down".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn limit_state_maps_to_direction() {
        assert_eq!(LimitState::UpLimit.direction(), Some(Direction::Up));
        assert_eq!(LimitState::None.direction(), None);
        assert_eq!(Direction::Down.limit_state(), LimitState::DownLimit);
    }
}
