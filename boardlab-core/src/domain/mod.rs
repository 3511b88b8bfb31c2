//! Domain types for BoardLab

pub mod episode;
pub mod record;
pub mod security;

pub use episode::{BreakReason, Diagnostic, DiagnosticKind, SecurityTrack, StreakEpisode};
pub use record::{Classification, DailyRecord, Direction, LimitState};
pub use security::{Board, SecurityInfo};

/// Tushare `ts_code`, e.g. `600000.SH`.
pub type SecurityId = String;

/// Reserved industry code for securities without a classification.
pub const UNCLASSIFIED: &str = "UNCLASSIFIED";
