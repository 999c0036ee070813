//! Typed configuration for the selection pipeline
//!
//! Mirrors the on-disk TOML document. A missing file yields the documented
//! defaults; out-of-range values are rejected by `validate()`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Classifier family for the failure predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Bagged decision-tree ensemble (default)
    RandomForest,
    /// Gradient-boosted trees on logistic loss
    GradientBoosting,
    /// Linear classifier trained by gradient descent
    LogisticRegression,
}

impl Algorithm {
    /// Stable name used in artifacts and log output
    pub fn name(self) -> &'static str {
        match self {
            Self::RandomForest => "random_forest",
            Self::GradientBoosting => "gradient_boosting",
            Self::LogisticRegression => "logistic_regression",
        }
    }
}

/// Constraints applied when choosing the final test suite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Impact threshold used when reporting affected tests
    pub threshold: f64,
    /// Number of top-ranked tests always included regardless of score
    pub min_tests: usize,
    /// Hard cap on suite size
    pub max_tests: usize,
    /// Coverage fraction the selected suite aims to retain
    pub coverage_target: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            min_tests: 5,
            max_tests: 100,
            coverage_target: 0.85,
        }
    }
}

/// Hyperparameters for the failure-prediction model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlModelConfig {
    pub algorithm: Algorithm,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub random_state: u64,
    /// Fraction of records held out for evaluation
    pub test_size: f64,
}

impl Default for MlModelConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RandomForest,
            n_estimators: 100,
            max_depth: 10,
            random_state: 42,
            test_size: 0.2,
        }
    }
}

/// File locations for the ledger and model artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub history_file: PathBuf,
    pub model_file: PathBuf,
    pub features_file: PathBuf,
    /// Directory scanned for `test_*.py` files when building the test mapping
    pub tests_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            history_file: PathBuf::from("data/test_history/test_results.csv"),
            model_file: PathBuf::from("data/models/test_selector_model.apr"),
            features_file: PathBuf::from("data/models/feature_scaler.json"),
            tests_dir: PathBuf::from("tests"),
        }
    }
}

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub test_selection: SelectionConfig,
    pub ml_model: MlModelConfig,
    pub data: DataConfig,
}

impl Config {
    /// Load configuration from a TOML file, failing on malformed content
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, degrading to defaults when the file is malformed
    ///
    /// Invalid values (rather than unparseable syntax) are still fatal: a user
    /// who explicitly set `test_size = 1.5` should not silently train on
    /// defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match toml::from_str::<Self>(&content) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed config, falling back to defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.test_selection.threshold) {
            return Err(ConfigError::Invalid(format!(
                "test_selection.threshold must be in [0, 1], got {}",
                self.test_selection.threshold
            )));
        }

        if self.test_selection.min_tests > self.test_selection.max_tests {
            return Err(ConfigError::Invalid(format!(
                "test_selection.min_tests ({}) exceeds max_tests ({})",
                self.test_selection.min_tests, self.test_selection.max_tests
            )));
        }

        if !(0.0..=1.0).contains(&self.test_selection.coverage_target) {
            return Err(ConfigError::Invalid(format!(
                "test_selection.coverage_target must be in [0, 1], got {}",
                self.test_selection.coverage_target
            )));
        }

        if self.ml_model.n_estimators == 0 {
            return Err(ConfigError::Invalid(
                "ml_model.n_estimators must be >= 1".to_string(),
            ));
        }

        if self.ml_model.max_depth == 0 {
            return Err(ConfigError::Invalid(
                "ml_model.max_depth must be >= 1".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.ml_model.test_size) || self.ml_model.test_size == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ml_model.test_size must be in (0, 1), got {}",
                self.ml_model.test_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.test_selection.threshold, 0.7);
        assert_eq!(config.test_selection.min_tests, 5);
        assert_eq!(config.test_selection.max_tests, 100);
        assert_eq!(config.test_selection.coverage_target, 0.85);
        assert_eq!(config.ml_model.algorithm, Algorithm::RandomForest);
        assert_eq!(config.ml_model.n_estimators, 100);
        assert_eq!(config.ml_model.max_depth, 10);
        assert_eq!(config.ml_model.random_state, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/cribar.toml")).unwrap();
        assert_eq!(config.test_selection.max_tests, 100);
    }

    #[test]
    fn test_parse_partial_document() {
        let config: Config = toml::from_str(
            r#"
            [test_selection]
            threshold = 0.5
            max_tests = 50

            [ml_model]
            algorithm = "gradient_boosting"
            "#,
        )
        .unwrap();

        assert_eq!(config.test_selection.threshold, 0.5);
        assert_eq!(config.test_selection.max_tests, 50);
        // Unspecified keys keep their defaults
        assert_eq!(config.test_selection.min_tests, 5);
        assert_eq!(config.ml_model.algorithm, Algorithm::GradientBoosting);
        assert_eq!(config.ml_model.n_estimators, 100);
    }

    #[test]
    fn test_invalid_threshold() {
        let mut config = Config::default();
        config.test_selection.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_test_size() {
        let mut config = Config::default();
        config.ml_model.test_size = 0.0;
        assert!(config.validate().is_err());
        config.ml_model.test_size = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_tests_exceeding_max_tests() {
        let mut config = Config::default();
        config.test_selection.min_tests = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Algorithm::RandomForest.name(), "random_forest");
        assert_eq!(Algorithm::GradientBoosting.name(), "gradient_boosting");
        assert_eq!(Algorithm::LogisticRegression.name(), "logistic_regression");
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let restored: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(restored.ml_model.random_state, 42);
        assert_eq!(restored.data.tests_dir, PathBuf::from("tests"));
    }
}
