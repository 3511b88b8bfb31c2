//! Analysis error taxonomy.
//!
//! `OutOfRange` is fatal to a single calendar query, `IncompleteData` is
//! absorbed per security by the streak tracker, and `InvariantViolation`
//! always aborts the run.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("{date} offset by {offset} trading days falls outside the loaded calendar")]
    OutOfRange { date: NaiveDate, offset: i64 },

    #[error("incomplete data for {security} on {date}: {reason}")]
    IncompleteData {
        security: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("calendar is empty")]
    EmptyCalendar,
}

impl AnalysisError {
    pub fn incomplete(security: &str, date: NaiveDate, reason: impl Into<String>) -> Self {
        Self::IncompleteData {
            security: security.to_string(),
            date,
            reason: reason.into(),
        }
    }

    /// True for errors that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_) | Self::EmptyCalendar)
    }
}
