//! Forecast error metrics calculator.
//!
//! Aggregates per-task results into overall and grouped error statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::walkforward::result::ForecastResult;

/// Error statistics of one group of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupError {
    pub hour: Option<u32>,
    pub horizon: usize,
    pub count: usize,
    pub mae: f64,
    pub rmse: f64,
}

/// Mean coefficients of one group of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientGroup {
    pub hour: Option<u32>,
    pub horizon: usize,
    pub coefficients: BTreeMap<String, f64>,
}

/// Error statistics over a result list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    /// Results seen, with or without an actual value.
    pub total_results: usize,
    /// Results that had an actual value to score against.
    pub evaluated: usize,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    /// Mean of `prediction - actual`.
    pub bias: Option<f64>,
    pub max_abs_error: Option<f64>,
    pub by_horizon: Vec<GroupError>,
    pub by_hour_horizon: Vec<GroupError>,
    /// Mean diagnostic value per predictor name, from results whose
    /// diagnostics line up one-to-one with their predictors.
    pub mean_coefficients: BTreeMap<String, f64>,
    pub coefficients_by_horizon: Vec<CoefficientGroup>,
    pub coefficients_by_hour_horizon: Vec<CoefficientGroup>,
}

impl ErrorMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v));
        let mut out = format!(
            "Forecast Error Summary\n\
             ======================\n\
             \n\
             Results: {} ({} with actuals)\n\
             MAE: {}\n\
             RMSE: {}\n\
             Bias: {}\n\
             Max |error|: {}\n",
            self.total_results,
            self.evaluated,
            fmt(self.mae),
            fmt(self.rmse),
            fmt(self.bias),
            fmt(self.max_abs_error),
        );

        if !self.by_horizon.is_empty() {
            out.push_str("\nBy horizon:\n");
            for group in &self.by_horizon {
                out.push_str(&format!(
                    "  d+{:<3} n={:<6} MAE={:.4} RMSE={:.4}\n",
                    group.horizon, group.count, group.mae, group.rmse
                ));
            }
        }

        if !self.mean_coefficients.is_empty() {
            out.push_str("\nMean coefficients:\n");
            for (name, value) in &self.mean_coefficients {
                out.push_str(&format!("  {:<24} {:.4}\n", name, value));
            }
        }

        out
    }
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    abs_sum: f64,
    sq_sum: f64,
}

impl Accumulator {
    fn add(&mut self, error: f64) {
        self.count += 1;
        self.abs_sum += error.abs();
        self.sq_sum += error * error;
    }

    fn mae(&self) -> f64 {
        self.abs_sum / self.count as f64
    }

    fn rmse(&self) -> f64 {
        (self.sq_sum / self.count as f64).sqrt()
    }

    fn group(&self, hour: Option<u32>, horizon: usize) -> GroupError {
        GroupError {
            hour,
            horizon,
            count: self.count,
            mae: self.mae(),
            rmse: self.rmse(),
        }
    }
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics from a result list.
    pub fn calculate(results: &[ForecastResult]) -> ErrorMetrics {
        let mut overall = Accumulator::default();
        let mut bias_sum = 0.0;
        let mut max_abs: Option<f64> = None;
        let mut by_horizon: BTreeMap<usize, Accumulator> = BTreeMap::new();
        let mut by_hour_horizon: BTreeMap<(usize, u32), Accumulator> = BTreeMap::new();

        for result in results {
            let Some(error) = result.error() else {
                continue;
            };
            overall.add(error);
            bias_sum += error;
            max_abs = Some(max_abs.map_or(error.abs(), |m| m.max(error.abs())));
            by_horizon.entry(result.horizon).or_default().add(error);
            by_hour_horizon
                .entry((result.horizon, result.hour))
                .or_default()
                .add(error);
        }

        let evaluated = overall.count;
        let scored = evaluated > 0;

        ErrorMetrics {
            total_results: results.len(),
            evaluated,
            mae: scored.then(|| overall.mae()),
            rmse: scored.then(|| overall.rmse()),
            bias: scored.then(|| bias_sum / evaluated as f64),
            max_abs_error: max_abs,
            by_horizon: by_horizon
                .iter()
                .map(|(&horizon, acc)| acc.group(None, horizon))
                .collect(),
            by_hour_horizon: by_hour_horizon
                .iter()
                .map(|(&(horizon, hour), acc)| acc.group(Some(hour), horizon))
                .collect(),
            mean_coefficients: Self::mean_coefficients(results, |_| ())
                .into_values()
                .next()
                .unwrap_or_default(),
            coefficients_by_horizon: Self::mean_coefficients(results, |r| r.horizon)
                .into_iter()
                .map(|(horizon, coefficients)| CoefficientGroup {
                    hour: None,
                    horizon,
                    coefficients,
                })
                .collect(),
            coefficients_by_hour_horizon: Self::mean_coefficients(results, |r| (r.horizon, r.hour))
                .into_iter()
                .map(|((horizon, hour), coefficients)| CoefficientGroup {
                    hour: Some(hour),
                    horizon,
                    coefficients,
                })
                .collect(),
        }
    }

    /// Mean diagnostic per predictor name within each group. Only results
    /// whose diagnostics line up with their predictors contribute.
    fn mean_coefficients<K: Ord>(
        results: &[ForecastResult],
        key: impl Fn(&ForecastResult) -> K,
    ) -> BTreeMap<K, BTreeMap<String, f64>> {
        let mut sums: BTreeMap<K, BTreeMap<&str, (f64, usize)>> = BTreeMap::new();
        for result in results {
            if result.diagnostics.is_empty() || result.diagnostics.len() != result.predictors.len() {
                continue;
            }
            let group = sums.entry(key(result)).or_default();
            for (name, &value) in result.predictors.iter().zip(&result.diagnostics) {
                let entry = group.entry(name.as_str()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(k, group)| {
                let means = group
                    .into_iter()
                    .map(|(name, (sum, n))| (name.to_string(), sum / n as f64))
                    .collect();
                (k, means)
            })
            .collect()
    }

    /// MAE per test-period day, in day order.
    pub fn daily_mae(results: &[ForecastResult]) -> Vec<(usize, f64)> {
        let mut days: BTreeMap<usize, Accumulator> = BTreeMap::new();
        for result in results {
            if let Some(error) = result.error() {
                days.entry(result.day_in_testing_period).or_default().add(error);
            }
        }
        days.iter().map(|(&day, acc)| (day, acc.mae())).collect()
    }
}
