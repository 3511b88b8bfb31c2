//! BoardLab Core: limit-board streak engine and A-share data layer.
//!
//! - Domain types (daily records, limit states, streak episodes, diagnostics)
//! - Trading calendar with trading-day arithmetic
//! - Limit classifier and board limit rules
//! - Per-security streak tracker
//! - Statistics aggregator and industry roll-up
//! - Single-day market snapshots
//! - Data layer: repository traits, Parquet store, Tushare client, ingest

pub mod aggregate;
pub mod calendar;
pub mod classify;
pub mod data;
pub mod domain;
pub mod error;
pub mod snapshot;
pub mod streak;

pub use aggregate::{aggregate, aggregate_by_industry, length_distribution, AggregateBucket, AggregateRequest};
pub use calendar::TradingCalendar;
pub use classify::LimitClassifier;
pub use error::AnalysisError;
pub use streak::StreakTracker;
