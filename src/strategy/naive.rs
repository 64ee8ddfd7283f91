//! Naive persistence forecast.

use ndarray::{ArrayView1, ArrayView2};

use crate::scaler::ScalerKind;
use crate::walkforward::grid::TaskContext;
use crate::walkforward::predictors::PredictorSpec;

use super::{check_inputs, finite, Forecast, Strategy, StrategyError};

/// Default training window, in days.
pub const NAIVE_TRAINING_WINDOW: usize = 7;

/// Predicts the value of the first predictor in the test row.
///
/// With the default predictor list this is the target observed one week
/// before the forecast hour.
#[derive(Debug, Clone, Default)]
pub struct NaiveStrategy;

impl NaiveStrategy {
    pub fn new() -> Self {
        Self
    }

    /// `{target}_d-{7-h}` for horizons below a week, `{target}` otherwise.
    pub fn default_predictors() -> Vec<PredictorSpec> {
        vec![PredictorSpec::computed(|scope| {
            if scope.horizon < 7 {
                vec![format!("{}_d-{}", scope.target, 7 - scope.horizon)]
            } else {
                vec![scope.target.to_string()]
            }
        })]
    }

    /// Day lags the default predictor list needs for horizons `1..=horizon`.
    pub fn required_lags(horizon: usize) -> Vec<usize> {
        (1..=horizon.min(6)).map(|h| 7 - h).collect()
    }
}

impl Strategy for NaiveStrategy {
    fn name(&self) -> &str {
        "naive"
    }

    fn default_scaler(&self) -> ScalerKind {
        ScalerKind::Identity
    }

    fn fit_predict(
        &self,
        train_x: ArrayView2<'_, f64>,
        train_y: ArrayView1<'_, f64>,
        test_x: ArrayView2<'_, f64>,
        _ctx: &TaskContext,
    ) -> Result<Forecast, StrategyError> {
        check_inputs(&train_x, &train_y, &test_x)?;
        if test_x.ncols() == 0 {
            return Err(StrategyError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }
        Ok(Forecast::new(finite(test_x[[0, 0]])?, Vec::new()))
    }
}
