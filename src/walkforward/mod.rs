//! Walk-forward backtesting.
//!
//! Rolls a fit/predict strategy over every (day, horizon, hour) cell of a
//! test period:
//! - Grid: one task context per cell, predictors resolved per cell
//! - Window: train on history at the same hour, test on the issue day
//! - Scheduler: tasks run on a worker pool against a shared dataset region
//! - Engine: caching, calibration and multi-model evaluation

pub mod engine;
pub mod grid;
pub mod predictors;
pub mod result;
pub mod scheduler;
pub mod window;

pub use engine::{
    BacktestError, BacktestOutcome, Evaluation, EvaluationReport, ModelSpec, WalkForwardBacktest,
};
pub use grid::{GridCell, GridError, GridSpec, Params, TaskContext, TaskGrid, TestPeriod};
pub use predictors::{PredictorScope, PredictorSpec};
pub use result::{sort_results, ForecastResult};
pub use scheduler::{FailurePolicy, RunReport, TaskError, TaskFailure, WorkerPool};
pub use window::{Window, WindowError};
