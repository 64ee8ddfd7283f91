//! Fit/predict strategies.
//!
//! A strategy receives the (already rescaled) training slice and the single
//! test row of one task and returns a point forecast plus optional
//! diagnostics such as fitted coefficients. Implementations keep no mutable
//! state between calls and may be invoked from many workers at once.

pub mod ensemble;
pub mod linear;
pub mod naive;

use ndarray::{ArrayView1, ArrayView2};
use thiserror::Error;

use crate::scaler::ScalerKind;
use crate::walkforward::grid::{Params, TaskContext};

pub use ensemble::{EnsembleStrategy, NetworkConfig, SearchSpace};
pub use linear::{ExponentialDecay, LinearStrategy, Penalty, Uniform, WeightFunction, WeightedLinearStrategy};
pub use naive::NaiveStrategy;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Matrix is singular and cannot be solved")]
    SingularMatrix,

    #[error("Prediction is not finite: {0}")]
    NonFinitePrediction(f64),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Calibration failed: {0}")]
    Calibration(String),
}

/// Output of one fit/predict call.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub prediction: f64,
    pub diagnostics: Vec<f64>,
}

impl Forecast {
    pub fn new(prediction: f64, diagnostics: Vec<f64>) -> Self {
        Self {
            prediction,
            diagnostics,
        }
    }
}

/// Scores a candidate strategy on the held-back calibration window.
pub trait Calibrator {
    /// Mean absolute error of `candidate` over the calibration cells.
    fn score(&self, candidate: &dyn Strategy) -> Result<f64, StrategyError>;
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Scaler used when the model does not override it.
    fn default_scaler(&self) -> ScalerKind {
        ScalerKind::Standard
    }

    fn fit_predict(
        &self,
        train_x: ArrayView2<'_, f64>,
        train_y: ArrayView1<'_, f64>,
        test_x: ArrayView2<'_, f64>,
        ctx: &TaskContext,
    ) -> Result<Forecast, StrategyError>;

    /// Days of held-back history this strategy wants for calibration.
    fn calibration_days(&self) -> Option<usize> {
        None
    }

    /// Return a frozen strategy tuned on the calibration window.
    fn calibrate(
        &self,
        _calibrator: &dyn Calibrator,
    ) -> Result<Option<Box<dyn Strategy>>, StrategyError> {
        Ok(None)
    }
}

/// Shared input checks for every strategy.
pub(crate) fn check_inputs(
    train_x: &ArrayView2<'_, f64>,
    train_y: &ArrayView1<'_, f64>,
    test_x: &ArrayView2<'_, f64>,
) -> Result<(), StrategyError> {
    if train_x.nrows() == 0 {
        return Err(StrategyError::EmptyTrainingSet);
    }
    if train_y.len() != train_x.nrows() {
        return Err(StrategyError::DimensionMismatch {
            expected: train_x.nrows(),
            got: train_y.len(),
        });
    }
    if test_x.ncols() != train_x.ncols() {
        return Err(StrategyError::DimensionMismatch {
            expected: train_x.ncols(),
            got: test_x.ncols(),
        });
    }
    if test_x.nrows() != 1 {
        return Err(StrategyError::DimensionMismatch {
            expected: 1,
            got: test_x.nrows(),
        });
    }
    Ok(())
}

pub(crate) fn finite(prediction: f64) -> Result<f64, StrategyError> {
    if prediction.is_finite() {
        Ok(prediction)
    } else {
        Err(StrategyError::NonFinitePrediction(prediction))
    }
}

/// Read a float parameter, falling back to `default` when absent.
pub fn param_f64(params: &Params, name: &str, default: f64) -> Result<f64, StrategyError> {
    match params.get(name) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| StrategyError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a number, got {}", value),
        }),
    }
}

/// Read a non-negative integer parameter, falling back to `default` when absent.
pub fn param_usize(params: &Params, name: &str, default: usize) -> Result<usize, StrategyError> {
    match params.get(name) {
        None => Ok(default),
        Some(value) => value
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| StrategyError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a non-negative integer, got {}", value),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    #[test]
    fn test_param_lookup() {
        let mut params = Params::new();
        params.insert("alpha".to_string(), json!(0.25));
        params.insert("members".to_string(), json!(4));
        params.insert("bad".to_string(), json!("x"));

        assert_eq!(param_f64(&params, "alpha", 1.0).unwrap(), 0.25);
        assert_eq!(param_f64(&params, "missing", 1.0).unwrap(), 1.0);
        assert_eq!(param_usize(&params, "members", 1).unwrap(), 4);
        assert!(matches!(
            param_f64(&params, "bad", 1.0),
            Err(StrategyError::InvalidParameter { ref name, .. }) if name == "bad"
        ));
        assert!(param_usize(&params, "alpha", 1).is_err());
    }

    #[test]
    fn test_check_inputs() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let y = array![1.0, 2.0];
        let t = array![[5.0, 6.0]];
        assert!(check_inputs(&x.view(), &y.view(), &t.view()).is_ok());

        let empty = ndarray::Array2::<f64>::zeros((0, 2));
        let no_y = ndarray::Array1::<f64>::zeros(0);
        assert_eq!(
            check_inputs(&empty.view(), &no_y.view(), &t.view()),
            Err(StrategyError::EmptyTrainingSet)
        );

        let wide = array![[5.0, 6.0, 7.0]];
        assert!(matches!(
            check_inputs(&x.view(), &y.view(), &wide.view()),
            Err(StrategyError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_finite_guard() {
        assert_eq!(finite(1.5), Ok(1.5));
        assert!(finite(f64::NAN).is_err());
    }
}
