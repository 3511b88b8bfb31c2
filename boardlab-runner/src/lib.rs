//! BoardLab Runner: analysis orchestration on top of `boardlab-core`.
//!
//! - TOML analysis config with run fingerprinting
//! - Market loading from a store, with warm-up history before the window
//! - Parallel per-security streak tracking
//! - End-to-end analysis with exclusion diagnostics and single-day views
//! - Report emitter (text, Markdown, JSON, CSV)

pub mod config;
pub mod loader;
pub mod pipeline;
pub mod report;

pub use config::{AnalysisConfig, ConfigError};
pub use loader::{load_market, LoadError, LoadOptions, LoadedMarket};
pub use pipeline::{
    industry_breadth_at, performance_at, run_analysis, snapshot_at, track_all, AnalysisReport, RunError,
    TrackedMarket, SCHEMA_VERSION,
};
pub use report::{render, write_report, ReportFormat};
