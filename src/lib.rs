pub mod cache;
pub mod config;
pub mod data;
pub mod metrics;
pub mod scaler;
pub mod shared;
pub mod strategy;
pub mod walkforward;

// Re-export commonly used types
pub use cache::{CacheError, ResultCache};
pub use config::{BacktestConfig, ConfigError};
pub use data::{DataLoader, Dataset, DatasetPreparer, PreparedDataset};
pub use metrics::{ErrorMetrics, MetricsCalculator};
pub use scaler::ScalerKind;
pub use shared::{DatasetHandle, DatasetView, SharedDataset};
pub use strategy::{Forecast, Strategy, StrategyError};
pub use walkforward::{
    BacktestError, Evaluation, EvaluationReport, FailurePolicy, ForecastResult, ModelSpec,
    TaskContext, TestPeriod, WalkForwardBacktest, WorkerPool,
};
