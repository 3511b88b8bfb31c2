//! Streak tracking: fold one security's ordered history into limit-board episodes.
//!
//! State machine per security:
//! - `NoStreak` → a limit close opens a streak of length 1.
//! - `InStreak` + same-direction limit → length + 1, end date advances.
//! - `InStreak` + opposite limit → close (`PriceReversed`), open a new streak the same day.
//! - `InStreak` + ordinary close → close (`PriceReversed`).
//! - Suspension (explicit record, or trading days missing between records) preserves the
//!   streak. Gap days are committed to `skipped_dates` only once the streak continues; a
//!   streak that breaks after a gap ends on its last board day.
//! - Unclassifiable record → close (`DataEnd`) and record a diagnostic.
//! - End of history → `Suspended` if the security never traded again before the horizon,
//!   otherwise `DataEnd`.
//!
//! The tracker holds no state between calls: `track` is a pure function of its input.

use crate::calendar::TradingCalendar;
use crate::classify::LimitClassifier;
use crate::domain::{
    BreakReason, DailyRecord, Diagnostic, DiagnosticKind, Direction, SecurityTrack, StreakEpisode,
};
use crate::error::AnalysisError;
use chrono::NaiveDate;
use std::borrow::Cow;

/// Per-run tracker configuration: calendar, classifier and analysis horizon.
#[derive(Debug, Clone, Copy)]
pub struct StreakTracker<'a> {
    calendar: &'a TradingCalendar,
    classifier: LimitClassifier,
    horizon_end: NaiveDate,
}

#[derive(Debug)]
struct OpenStreak {
    direction: Direction,
    start: NaiveDate,
    end: NaiveDate,
    length: u32,
    skipped: Vec<NaiveDate>,
    pending_gap: Vec<NaiveDate>,
}

impl OpenStreak {
    fn start(direction: Direction, date: NaiveDate) -> Self {
        Self {
            direction,
            start: date,
            end: date,
            length: 1,
            skipped: Vec::new(),
            pending_gap: Vec::new(),
        }
    }

    fn extend(&mut self, date: NaiveDate) {
        self.skipped.append(&mut self.pending_gap);
        self.length += 1;
        self.end = date;
    }

    fn close(self, security_id: &str, break_reason: BreakReason) -> StreakEpisode {
        StreakEpisode {
            security_id: security_id.to_string(),
            start_date: self.start,
            end_date: self.end,
            length: self.length,
            direction: self.direction,
            break_reason,
            skipped_dates: self.skipped,
        }
    }
}

impl<'a> StreakTracker<'a> {
    pub fn new(
        calendar: &'a TradingCalendar,
        classifier: LimitClassifier,
        horizon_end: NaiveDate,
    ) -> Self {
        Self {
            calendar,
            classifier,
            horizon_end,
        }
    }

    /// Tracker whose horizon is the last loaded trading day.
    pub fn with_calendar_horizon(
        calendar: &'a TradingCalendar,
        classifier: LimitClassifier,
    ) -> Result<Self, AnalysisError> {
        let horizon_end = calendar.last().ok_or(AnalysisError::EmptyCalendar)?;
        Ok(Self::new(calendar, classifier, horizon_end))
    }

    pub fn horizon_end(&self) -> NaiveDate {
        self.horizon_end
    }

    pub fn calendar(&self) -> &'a TradingCalendar {
        self.calendar
    }

    /// Build the episode list for one security.
    ///
    /// Records dated after the horizon are ignored.
    pub fn track(&self, security_id: &str, records: &[DailyRecord]) -> SecurityTrack {
        let mut diagnostics = Vec::new();
        let mut episodes = Vec::new();

        let ordered: Cow<'_, [DailyRecord]> = if records.windows(2).any(|w| w[0].date > w[1].date)
        {
            diagnostics.push(Diagnostic {
                security_id: security_id.to_string(),
                date: None,
                kind: DiagnosticKind::Unsorted,
            });
            let mut sorted = records.to_vec();
            sorted.sort_by_key(|r| r.date);
            Cow::Owned(sorted)
        } else {
            Cow::Borrowed(records)
        };

        let mut open: Option<OpenStreak> = None;
        let mut prev: Option<(usize, NaiveDate)> = None;
        let mut last_suspended = false;

        for record in ordered.iter() {
            if record.date > self.horizon_end {
                break;
            }
            if prev.is_some_and(|(_, d)| d == record.date) {
                diagnostics.push(self.diagnostic(security_id, record.date, DiagnosticKind::DuplicateDate));
                continue;
            }
            let Some(idx) = self.calendar.index_of(record.date) else {
                let kind = if self.in_horizon(record.date) {
                    DiagnosticKind::NotTradingDay
                } else {
                    DiagnosticKind::OutOfCalendar
                };
                diagnostics.push(self.diagnostic(security_id, record.date, kind));
                continue;
            };

            // Trading days with no record at all are implicit suspensions.
            if let (Some((prev_idx, _)), Some(streak)) = (prev, open.as_mut()) {
                streak
                    .pending_gap
                    .extend(((prev_idx + 1)..idx).filter_map(|i| self.calendar.date_at(i)));
            }
            prev = Some((idx, record.date));

            match self.classifier.classify(record) {
                Err(err) => {
                    last_suspended = false;
                    if let Some(streak) = open.take() {
                        episodes.push(streak.close(security_id, BreakReason::DataEnd));
                    }
                    let reason = match err {
                        AnalysisError::IncompleteData { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    diagnostics.push(self.diagnostic(
                        security_id,
                        record.date,
                        DiagnosticKind::IncompleteData { reason },
                    ));
                }
                Ok(cls) if cls.suspended => {
                    last_suspended = true;
                    if let Some(streak) = open.as_mut() {
                        streak.pending_gap.push(record.date);
                    }
                }
                Ok(cls) => {
                    last_suspended = false;
                    let direction = cls.state.direction();
                    match open.as_mut() {
                        Some(streak) if direction == Some(streak.direction) => {
                            streak.extend(record.date);
                        }
                        _ => {
                            if let Some(streak) = open.take() {
                                episodes.push(streak.close(security_id, BreakReason::PriceReversed));
                            }
                            open = direction.map(|dir| OpenStreak::start(dir, record.date));
                        }
                    }
                }
            }
        }

        if let Some(streak) = open.take() {
            let never_resumed = last_suspended
                || prev.is_some_and(|(_, last)| {
                    self.calendar
                        .next_trading_day(last)
                        .is_some_and(|next| next <= self.horizon_end)
                });
            let reason = if never_resumed {
                BreakReason::Suspended
            } else {
                BreakReason::DataEnd
            };
            episodes.push(streak.close(security_id, reason));
        }

        SecurityTrack {
            security_id: security_id.to_string(),
            episodes,
            diagnostics,
        }
    }

    fn in_horizon(&self, date: NaiveDate) -> bool {
        match (self.calendar.first(), self.calendar.last()) {
            (Some(first), Some(last)) => date >= first && date <= last,
            _ => false,
        }
    }

    fn diagnostic(&self, security_id: &str, date: NaiveDate, kind: DiagnosticKind) -> Diagnostic {
        Diagnostic {
            security_id: security_id.to_string(),
            date: Some(date),
            kind,
        }
    }
}
