//! Streak episodes and per-security tracking diagnostics.

use super::record::Direction;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakReason {
    /// The security closed off its limit (or at the opposite limit).
    PriceReversed,
    /// Suspended and never resumed within the analysis horizon.
    Suspended,
    /// History ended, or the next record could not be classified.
    DataEnd,
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakReason::PriceReversed => "PRICE_REVERSED",
            BreakReason::Suspended => "SUSPENDED",
            BreakReason::DataEnd => "DATA_END",
        };
        f.write_str(s)
    }
}

/// A maximal run of same-direction limit closes over consecutive trading days.
///
/// `length` counts limit days only. Suspension days inside the span are listed
/// in `skipped_dates` and never extend `end_date`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreakEpisode {
    pub security_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub length: u32,
    pub direction: Direction,
    pub break_reason: BreakReason,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_dates: Vec<NaiveDate>,
}

impl StreakEpisode {
    /// Trading days spanned by the episode, suspension gaps included.
    pub fn span_days(&self) -> u32 {
        self.length + self.skipped_dates.len() as u32
    }

    /// Whether `date` is a board day or a skipped day of this episode.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

/// What went wrong for a security/date during tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    /// Limit price or close missing; any open streak was closed with DATA_END.
    IncompleteData { reason: String },
    /// Record dated on a day the calendar does not list as a trading day.
    NotTradingDay,
    /// Record dated outside the loaded calendar horizon.
    OutOfCalendar,
    /// Input was not in ascending date order and had to be sorted.
    Unsorted,
    /// Second record for the same date; the first one was kept.
    DuplicateDate,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::IncompleteData { reason } => write!(f, "incomplete data: {reason}"),
            DiagnosticKind::NotTradingDay => write!(f, "record on a non-trading day"),
            DiagnosticKind::OutOfCalendar => write!(f, "record outside the loaded calendar"),
            DiagnosticKind::Unsorted => write!(f, "records were not in date order"),
            DiagnosticKind::DuplicateDate => write!(f, "duplicate record for date"),
        }
    }
}

/// A data problem surfaced to the report instead of being silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub security_id: String,
    pub date: Option<NaiveDate>,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date {
            Some(d) => write!(f, "{} {}: {}", self.security_id, d, self.kind),
            None => write!(f, "{}: {}", self.security_id, self.kind),
        }
    }
}

/// Tracker output for one security.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityTrack {
    pub security_id: String,
    pub episodes: Vec<StreakEpisode>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SecurityTrack {
    /// True when some records were excluded or a streak was cut short by bad data.
    pub fn is_partial(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}
