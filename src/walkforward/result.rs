//! Per-task forecast records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::grid::GridCell;

/// Outcome of one successful task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Calendar date of the test row (the forecast issue day).
    pub date: NaiveDate,
    pub hour: u32,
    pub horizon: usize,
    pub day_in_testing_period: usize,
    pub prediction: f64,
    /// Observed target, absent when it lies past the end of the data.
    pub actual: Option<f64>,
    /// Strategy-specific values, e.g. fitted coefficients.
    #[serde(default)]
    pub diagnostics: Vec<f64>,
    pub predictors: Vec<String>,
    /// Unscaled predictor values of the test row.
    #[serde(default)]
    pub test_features: Vec<f64>,
}

impl ForecastResult {
    pub fn cell(&self) -> GridCell {
        GridCell {
            day: self.day_in_testing_period,
            horizon: self.horizon,
            hour: self.hour,
        }
    }

    /// Signed error, `prediction - actual`.
    pub fn error(&self) -> Option<f64> {
        self.actual.map(|actual| self.prediction - actual)
    }
}

/// Sort into canonical `(day, horizon, hour)` order.
pub fn sort_results(results: &mut [ForecastResult]) {
    results.sort_by_key(ForecastResult::cell);
}
