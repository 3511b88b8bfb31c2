//! Analysis configuration, loaded from TOML.
//!
//! ```toml
//! store_dir = "data"
//!
//! [classifier]
//! tolerance = 0.0001
//!
//! [analysis]
//! lookback_trading_days = 60
//! warmup_trading_days = 60
//! direction = "UP"
//! min_reliable_samples = 5
//!
//! [industry]
//! override_file = "industries.toml"
//!
//! [vendor]
//! base_url = "http://api.tushare.pro"
//! token_env = "TUSHARE_TOKEN"
//! requests_per_minute = 200
//! max_retries = 3
//! ```
//!
//! Every section and key is optional; missing values take the defaults above.

use boardlab_core::aggregate::MIN_RELIABLE_SAMPLES;
use boardlab_core::classify::{LimitClassifier, DEFAULT_TOLERANCE};
use boardlab_core::data::tushare::DEFAULT_BASE_URL;
use boardlab_core::data::TushareSettings;
use boardlab_core::domain::Direction;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::loader::LoadOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("vendor token not set: export {0}")]
    MissingToken(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub store_dir: PathBuf,
    pub classifier: ClassifierConfig,
    pub analysis: AnalysisSection,
    pub industry: IndustryConfig,
    pub vendor: VendorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Relative tolerance when comparing a close with its limit price.
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Window size in trading days, ending at the as-of date.
    pub lookback_trading_days: u32,
    /// Extra history loaded before the window so streaks that started
    /// earlier are counted at their true length.
    pub warmup_trading_days: u32,
    pub direction: Direction,
    /// Buckets with fewer samples are flagged in reports.
    pub min_reliable_samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndustryConfig {
    pub override_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub base_url: String,
    /// Environment variable holding the Tushare token.
    pub token_env: String,
    pub requests_per_minute: u32,
    pub max_retries: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("data"),
            classifier: ClassifierConfig::default(),
            analysis: AnalysisSection::default(),
            industry: IndustryConfig::default(),
            vendor: VendorConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            lookback_trading_days: 60,
            warmup_trading_days: 60,
            direction: Direction::Up,
            min_reliable_samples: MIN_RELIABLE_SAMPLES,
        }
    }
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_env: "TUSHARE_TOKEN".to_string(),
            requests_per_minute: 200,
            max_retries: 3,
        }
    }
}

impl AnalysisConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tol = self.classifier.tolerance;
        if !tol.is_finite() || !(0.0..0.01).contains(&tol) {
            return Err(ConfigError::Invalid(format!(
                "classifier.tolerance must be in [0, 0.01), got {tol}"
            )));
        }
        if self.analysis.lookback_trading_days == 0 {
            return Err(ConfigError::Invalid("analysis.lookback_trading_days must be positive".into()));
        }
        if self.vendor.requests_per_minute == 0 {
            return Err(ConfigError::Invalid("vendor.requests_per_minute must be positive".into()));
        }
        Ok(())
    }

    pub fn classifier(&self) -> LimitClassifier {
        LimitClassifier::new(self.classifier.tolerance)
    }

    /// Read the vendor token from the configured environment variable.
    pub fn token(&self) -> Result<String, ConfigError> {
        std::env::var(&self.vendor.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingToken(self.vendor.token_env.clone()))
    }

    /// Loader options for a window ending at `as_of` (or the last stored day).
    pub fn load_options(&self, as_of: Option<NaiveDate>) -> LoadOptions {
        LoadOptions {
            as_of,
            lookback_trading_days: self.analysis.lookback_trading_days,
            warmup_trading_days: self.analysis.warmup_trading_days,
            direction: self.analysis.direction,
        }
    }

    pub fn tushare_settings(&self, token: String) -> TushareSettings {
        TushareSettings {
            base_url: self.vendor.base_url.clone(),
            token,
            max_retries: self.vendor.max_retries,
            timeout: Duration::from_secs(30),
        }
    }

    /// Content hash of the analysis-relevant settings plus the dataset hash.
    ///
    /// Vendor settings and paths do not change results, so they are excluded.
    pub fn fingerprint(&self, dataset_hash: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{:?}", self.classifier.tolerance.to_bits()).as_bytes());
        hasher.update(
            format!(
                "{}|{}|{}|{}",
                self.analysis.lookback_trading_days,
                self.analysis.warmup_trading_days,
                self.analysis.direction,
                self.analysis.min_reliable_samples
            )
            .as_bytes(),
        );
        hasher.update(dataset_hash.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AnalysisConfig::from_toml("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.analysis.min_reliable_samples, 5);
        assert_eq!(config.vendor.token_env, "TUSHARE_TOKEN");
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = AnalysisConfig::from_toml(
            r#"
            store_dir = "/var/boardlab"

            [analysis]
            lookback_trading_days = 20
            direction = "DOWN"

            [industry]
            override_file = "ind.toml"
            "#,
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/var/boardlab"));
        assert_eq!(config.analysis.lookback_trading_days, 20);
        assert_eq!(config.analysis.direction, Direction::Down);
        assert_eq!(config.analysis.warmup_trading_days, 60);
        assert_eq!(config.industry.override_file, Some(PathBuf::from("ind.toml")));
        assert_eq!(config.classifier.tolerance, DEFAULT_TOLERANCE);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            AnalysisConfig::from_toml("[classifier]\ntolerance = 0.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[analysis]\nlookback_trading_days = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("store_dir = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn fingerprint_tracks_analysis_settings_only() {
        let base = AnalysisConfig::default();
        let mut other_vendor = base.clone();
        other_vendor.vendor.requests_per_minute = 500;
        assert_eq!(base.fingerprint("abc"), other_vendor.fingerprint("abc"));

        let mut other_window = base.clone();
        other_window.analysis.lookback_trading_days = 10;
        assert_ne!(base.fingerprint("abc"), other_window.fingerprint("abc"));
        assert_ne!(base.fingerprint("abc"), base.fingerprint("abd"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = AnalysisConfig::from_file(Path::new("/nonexistent/boardlab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn missing_token_names_variable() {
        let mut config = AnalysisConfig::default();
        config.vendor.token_env = "BOARDLAB_TEST_TOKEN_UNSET".into();
        let err = config.token().unwrap_err();
        assert!(err.to_string().contains("BOARDLAB_TEST_TOKEN_UNSET"));
    }
}
