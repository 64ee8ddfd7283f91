//! Forecast error metrics.
//!
//! Provides error statistics over result lists:
//! - MAE, RMSE and bias overall
//! - Errors by horizon and by hour and horizon
//! - Mean fitted coefficient per predictor, overall, by horizon and by hour and horizon

pub mod calculator;

pub use calculator::{CoefficientGroup, ErrorMetrics, GroupError, MetricsCalculator};
