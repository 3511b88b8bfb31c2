//! Industry classification: security list industries plus an optional TOML override.
//!
//! Override file format, industry → member codes:
//!
//! ```toml
//! [industries]
//! "半导体" = ["688981.SH", "603986.SH"]
//! "银行" = ["600000.SH"]
//! ```
//!
//! Override entries win over the feed's `industry` field.

use super::provider::{DataError, IndustryLookup};
use crate::domain::SecurityInfo;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndustryOverrides {
    #[serde(default)]
    pub industries: BTreeMap<String, Vec<String>>,
}

impl IndustryOverrides {
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Other(format!("read industry file {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        toml::from_str(content).map_err(|e| DataError::ValidationError(format!("parse industry TOML: {e}")))
    }

    pub fn code_count(&self) -> usize {
        self.industries.values().map(Vec::len).sum()
    }
}

/// Security → industry map.
#[derive(Debug, Clone, Default)]
pub struct IndustryTable {
    by_code: HashMap<String, String>,
}

impl IndustryTable {
    pub fn from_securities(securities: &[SecurityInfo]) -> Self {
        let by_code = securities
            .iter()
            .filter_map(|s| {
                let industry = s.industry.as_deref()?.trim();
                (!industry.is_empty()).then(|| (s.ts_code.clone(), industry.to_string()))
            })
            .collect();
        Self { by_code }
    }

    pub fn with_overrides(mut self, overrides: &IndustryOverrides) -> Self {
        for (industry, codes) in &overrides.industries {
            for code in codes {
                self.by_code.insert(code.clone(), industry.clone());
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Distinct industry names, sorted.
    pub fn industries(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_code.values().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl IndustryLookup for IndustryTable {
    fn lookup_industry(&self, security_id: &str) -> Option<String> {
        self.by_code.get(security_id).cloned()
    }
}
