//! TOML run configuration.
//!
//! ```toml
//! data = "data/load.csv"
//! target = "load"
//! horizon = 2
//! test_start = "2024-03-01"
//! test_end = "2024-03-31"
//! workers = 8
//! failure_policy = "skip"
//!
//! [[lags]]
//! column = "load"
//! days = [1, 7]
//!
//! [[models]]
//! name = "naive"
//! strategy = "naive"
//!
//! [[models]]
//! name = "ridge"
//! strategy = "ridge"
//! predictors = ["load_d-1", "load_d-7", "temperature_d+{horizon}", "ones"]
//! training_window = 28
//! cache = "results/ridge.json"
//! model_params = { alpha = 0.5 }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::ResultCache;
use crate::data::DatasetPreparer;
use crate::scaler::ScalerKind;
use crate::strategy::naive::NAIVE_TRAINING_WINDOW;
use crate::strategy::{
    EnsembleStrategy, LinearStrategy, NaiveStrategy, SearchSpace, Strategy, StrategyError,
    WeightedLinearStrategy,
};
use crate::walkforward::{FailurePolicy, ModelSpec, Params, PredictorSpec, TestPeriod};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid parameters for model '{model}': {source}")]
    Strategy {
        model: String,
        #[source]
        source: StrategyError,
    },
}

/// Strategy selected by a model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Naive,
    Ols,
    Ridge,
    Lasso,
    Wls,
    Ensemble,
}

/// Day lags to derive for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagConfig {
    pub column: String,
    pub days: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub strategy: StrategyKind,
    /// Column names or `{key}` templates. Naive models may leave this empty.
    #[serde(default)]
    pub predictors: Vec<String>,
    /// Training window in days. Naive models default to one week.
    #[serde(default)]
    pub training_window: Option<usize>,
    #[serde(default)]
    pub model_params: Params,
    #[serde(default)]
    pub internal_params: Params,
    /// Result cache artifact.
    #[serde(default)]
    pub cache: Option<PathBuf>,
    /// Overrides the strategy's default scaler.
    #[serde(default)]
    pub scaler: Option<ScalerKind>,
    /// Calibration search, ensemble models only.
    #[serde(default)]
    pub search: Option<SearchSpace>,
}

fn default_timestamp_column() -> String {
    "timestamp".to_string()
}

fn default_threads_per_task() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// CSV or Parquet input table.
    pub data: PathBuf,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    /// Base target column.
    pub target: String,
    /// Largest forecast horizon, in days.
    pub horizon: usize,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    #[serde(default)]
    pub lags: Vec<LagConfig>,
    /// Worker threads; defaults to the available cores.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_threads_per_task")]
    pub threads_per_task: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub corrupt_cache_as_miss: bool,
    pub models: Vec<ModelConfig>,
}

impl BacktestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.horizon == 0 {
            return invalid("horizon must be at least 1".to_string());
        }
        if self.test_end < self.test_start {
            return invalid(format!(
                "test_end {} is before test_start {}",
                self.test_end, self.test_start
            ));
        }
        if self.threads_per_task == 0 {
            return invalid("threads_per_task must be at least 1".to_string());
        }
        if self.workers == Some(0) {
            return invalid("workers must be at least 1".to_string());
        }
        if self.models.is_empty() {
            return invalid("at least one model is required".to_string());
        }

        let mut names = HashSet::new();
        for model in &self.models {
            if !names.insert(model.name.as_str()) {
                return invalid(format!("duplicate model name '{}'", model.name));
            }
            model.validate()?;
        }
        Ok(())
    }

    pub fn period(&self) -> TestPeriod {
        TestPeriod::new(self.test_start, self.test_end)
    }

    /// Preparer deriving every configured lag plus those the default naive
    /// predictors need.
    pub fn preparer(&self) -> DatasetPreparer {
        let mut lags: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
        for lag in &self.lags {
            lags.entry(lag.column.as_str()).or_default().extend(&lag.days);
        }
        if self.models.iter().any(ModelConfig::uses_default_naive_predictors) {
            lags.entry(self.target.as_str())
                .or_default()
                .extend(NaiveStrategy::required_lags(self.horizon));
        }

        lags.into_iter()
            .fold(DatasetPreparer::new(&self.target, self.horizon), |p, (column, days)| {
                p.with_day_lags(column, &days.into_iter().collect::<Vec<_>>())
            })
    }

    /// Build every model, attaching caches with the configured corrupt policy.
    pub fn model_specs(&self) -> Result<Vec<ModelSpec>, ConfigError> {
        self.models
            .iter()
            .map(|m| m.build(self.corrupt_cache_as_miss))
            .collect()
    }
}

impl ModelConfig {
    fn uses_default_naive_predictors(&self) -> bool {
        self.strategy == StrategyKind::Naive && self.predictors.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(format!("model '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("model name must not be empty".to_string()));
        }
        if self.strategy != StrategyKind::Naive {
            if self.predictors.is_empty() {
                return invalid("predictors are required");
            }
            if self.training_window.is_none() {
                return invalid("training_window is required");
            }
        }
        if self.training_window == Some(0) {
            return invalid("training_window must be at least 1");
        }
        if self.search.is_some() && self.strategy != StrategyKind::Ensemble {
            return invalid("search is only supported for ensemble models");
        }
        Ok(())
    }

    pub fn build(&self, corrupt_cache_as_miss: bool) -> Result<ModelSpec, ConfigError> {
        let strategy = self.strategy()?;
        let predictors = if self.uses_default_naive_predictors() {
            NaiveStrategy::default_predictors()
        } else {
            self.predictors.iter().map(|p| PredictorSpec::from(p.as_str())).collect()
        };
        let window = self.training_window.unwrap_or(NAIVE_TRAINING_WINDOW);

        let mut spec = ModelSpec::new(&self.name, strategy, predictors, window)
            .with_model_params(self.model_params.clone())
            .with_internal_params(self.internal_params.clone());
        if let Some(scaler) = self.scaler {
            spec = spec.with_scaler(scaler);
        }
        if let Some(path) = &self.cache {
            spec = spec.with_cache(ResultCache::new(path).with_corrupt_as_miss(corrupt_cache_as_miss));
        }
        Ok(spec)
    }

    fn strategy(&self) -> Result<Arc<dyn Strategy>, ConfigError> {
        let wrap = |source: StrategyError| ConfigError::Strategy {
            model: self.name.clone(),
            source,
        };
        let strategy: Arc<dyn Strategy> = match self.strategy {
            StrategyKind::Naive => Arc::new(NaiveStrategy),
            StrategyKind::Ols => Arc::new(LinearStrategy::ols()),
            StrategyKind::Ridge => Arc::new(LinearStrategy::ridge()),
            StrategyKind::Lasso => Arc::new(LinearStrategy::lasso()),
            StrategyKind::Wls => {
                let half_life = match self.model_params.get("half_life") {
                    None => None,
                    Some(value) => Some(value.as_f64().ok_or_else(|| {
                        wrap(StrategyError::InvalidParameter {
                            name: "half_life".to_string(),
                            reason: format!("expected a number, got {}", value),
                        })
                    })?),
                };
                Arc::new(WeightedLinearStrategy::from_half_life(half_life).map_err(wrap)?)
            }
            StrategyKind::Ensemble => {
                let mut ensemble = EnsembleStrategy::from_params(&self.model_params).map_err(wrap)?;
                if let Some(search) = &self.search {
                    ensemble = ensemble.with_search(search.clone());
                }
                Arc::new(ensemble)
            }
        };
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walkforward::grid::TaskGrid;
    use crate::walkforward::GridSpec;
    use tempfile::tempdir;

    const EXAMPLE: &str = r#"
data = "data/load.csv"
target = "load"
horizon = 2
test_start = "2024-03-01"
test_end = "2024-03-31"
workers = 4
failure_policy = "skip"

[[lags]]
column = "load"
days = [1, 7]

[[models]]
name = "naive"
strategy = "naive"

[[models]]
name = "ridge"
strategy = "ridge"
predictors = ["load_d-1", "load_d-7", "temperature_d+{horizon}", "ones"]
training_window = 28
cache = "results/ridge.json"
model_params = { alpha = 0.5 }

[[models]]
name = "ensemble"
strategy = "ensemble"
predictors = ["load_d-1", "ones"]
training_window = 56
model_params = { members = 3, hidden = 6 }
search = { calibration_days = 7, learning_rate = [0.01, 0.05] }
"#;

    #[test]
    fn test_parse_example() {
        let config = BacktestConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.timestamp_column, "timestamp");
        assert_eq!(config.horizon, 2);
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.threads_per_task, 1);
        assert_eq!(config.failure_policy, FailurePolicy::Skip);
        assert!(!config.corrupt_cache_as_miss);
        assert_eq!(config.models.len(), 3);
        assert_eq!(config.models[1].strategy, StrategyKind::Ridge);
        assert_eq!(
            config.models[1].model_params.get("alpha"),
            Some(&serde_json::json!(0.5))
        );
        assert_eq!(
            config.period(),
            TestPeriod::new(
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
            )
        );
    }

    #[test]
    fn test_build_models() {
        let config = BacktestConfig::from_toml_str(EXAMPLE).unwrap();
        let specs = config.model_specs().unwrap();

        assert_eq!(specs[0].name, "naive");
        assert_eq!(specs[0].training_window, 7);
        assert_eq!(specs[0].scaler_kind(), ScalerKind::Identity);
        assert_eq!(specs[1].strategy.name(), "ridge");
        assert_eq!(specs[1].scaler_kind(), ScalerKind::Standard);
        assert!(specs[1].cache.is_some());
        assert_eq!(specs[2].strategy.calibration_days(), Some(7));

        let grid_spec = GridSpec::new(1, 28, specs[1].predictors.clone());
        assert_eq!(
            TaskGrid::describe(&grid_spec, "load").unwrap(),
            vec!["load_d-1", "load_d-7", "temperature_d+1", "ones"]
        );
    }

    #[test]
    fn test_validation_errors() {
        let missing_window = EXAMPLE.replace("training_window = 28\n", "");
        assert!(matches!(
            BacktestConfig::from_toml_str(&missing_window),
            Err(ConfigError::Invalid(ref msg)) if msg.contains("training_window")
        ));

        let duplicate = EXAMPLE.replace("name = \"ridge\"", "name = \"naive\"");
        assert!(matches!(
            BacktestConfig::from_toml_str(&duplicate),
            Err(ConfigError::Invalid(ref msg)) if msg.contains("duplicate")
        ));

        let reversed = EXAMPLE.replace("test_end = \"2024-03-31\"", "test_end = \"2024-02-01\"");
        assert!(BacktestConfig::from_toml_str(&reversed).is_err());

        assert!(matches!(
            BacktestConfig::from_toml_str("target = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_strategy_params() {
        let bad = EXAMPLE.replace("members = 3", "members = 0");
        let config = BacktestConfig::from_toml_str(&bad).unwrap();
        assert!(matches!(
            config.model_specs(),
            Err(ConfigError::Strategy { ref model, .. }) if model == "ensemble"
        ));
    }

    #[test]
    fn test_preparer_merges_naive_lags() {
        use crate::data::Dataset;
        use chrono::Duration;

        let config = BacktestConfig::from_toml_str(EXAMPLE).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let n = 24 * 10;
        let data = Dataset::new((0..n).map(|i| start + Duration::hours(i as i64)).collect())
            .with_column("load", vec![1.0; n])
            .unwrap();

        let prepared = config.preparer().prepare(data).unwrap();
        let names = prepared.dataset().column_names();
        for lag in ["load_d-1", "load_d-5", "load_d-6", "load_d-7"] {
            assert!(names.iter().any(|c| c == lag), "missing {lag}");
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backtest.toml");
        fs::write(&path, EXAMPLE).unwrap();
        assert!(BacktestConfig::from_file(&path).is_ok());
        assert!(matches!(
            BacktestConfig::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
