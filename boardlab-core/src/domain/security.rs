//! Listed security reference data and trading-board classification.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Basic info for a listed security, as published by the `stock_basic` feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub ts_code: String,
    pub symbol: String,
    pub name: String,
    pub area: Option<String>,
    pub industry: Option<String>,
    /// Market segment label from the feed (主板, 创业板, 科创板, 北交所, ...).
    pub market: Option<String>,
    pub exchange: Option<String>,
    pub list_date: Option<NaiveDate>,
}

impl SecurityInfo {
    /// Special-treatment securities carry "ST" in their short name (ST, *ST, SST).
    pub fn is_st(&self) -> bool {
        self.name.to_ascii_uppercase().contains("ST")
    }

    pub fn board(&self) -> Board {
        Board::from_ts_code(&self.ts_code)
    }
}

/// Trading board. Determines the regulatory daily limit percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Board {
    /// Shanghai / Shenzhen main board.
    Main,
    /// Shenzhen ChiNext (300xxx, 301xxx).
    ChiNext,
    /// Shanghai STAR market (688xxx, 689xxx).
    Star,
    /// Beijing Stock Exchange.
    Beijing,
}

impl Board {
    pub fn from_ts_code(ts_code: &str) -> Self {
        let (code, exchange) = ts_code.split_once('.').unwrap_or((ts_code, ""));
        match exchange {
            "BJ" => Board::Beijing,
            "SH" if code.starts_with("688") || code.starts_with("689") => Board::Star,
            "SZ" if code.starts_with("300") || code.starts_with("301") => Board::ChiNext,
            _ => Board::Main,
        }
    }
}
