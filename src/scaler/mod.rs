//! Predictor and target rescaling.
//!
//! Scalers are fitted on the training slice of one task only. The fitted
//! state is returned by value so the same scaler can serve many tasks at
//! once.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Scaler variant used by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerKind {
    /// No rescaling.
    Identity,
    /// Zero mean / unit variance on non-dummy predictors and the target.
    #[default]
    Standard,
}

/// Mean and scale of one standardized series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standardization {
    pub mean: f64,
    pub scale: f64,
}

impl Standardization {
    /// Population statistics; a zero deviation scales by 1.
    pub fn fit(values: ArrayView1<'_, f64>) -> Self {
        let mean = values.iter().mean();
        let std = values.iter().population_std_dev();
        let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
        Self { mean, scale }
    }

    pub fn apply(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }

    pub fn invert(&self, value: f64) -> f64 {
        value * self.scale + self.mean
    }
}

/// Scaler state fitted on one training slice.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedScaler {
    /// One entry per predictor; `None` leaves the column untouched.
    columns: Vec<Option<Standardization>>,
    target: Option<Standardization>,
}

impl FittedScaler {
    /// A scaler that leaves everything unchanged.
    pub fn identity(n_predictors: usize) -> Self {
        Self {
            columns: vec![None; n_predictors],
            target: None,
        }
    }

    /// Whether the predictor at `column` is rescaled.
    pub fn scales_column(&self, column: usize) -> bool {
        matches!(self.columns.get(column), Some(Some(_)))
    }

    pub fn transform_features(&self, x: &mut Array2<f64>) {
        for (j, standardization) in self.columns.iter().enumerate() {
            if let Some(s) = standardization {
                x.column_mut(j).mapv_inplace(|v| s.apply(v));
            }
        }
    }

    pub fn transform_target(&self, y: &mut Array1<f64>) {
        if let Some(s) = &self.target {
            y.mapv_inplace(|v| s.apply(v));
        }
    }

    /// Map a prediction in scaled units back to target units.
    pub fn inverse(&self, prediction: f64) -> f64 {
        match &self.target {
            Some(s) => s.invert(prediction),
            None => prediction,
        }
    }
}

impl ScalerKind {
    /// Fit on the training slice. Test statistics are never consulted.
    pub fn fit(&self, train_x: &Array2<f64>, train_y: &Array1<f64>) -> FittedScaler {
        match self {
            Self::Identity => FittedScaler::identity(train_x.ncols()),
            Self::Standard => FittedScaler {
                columns: train_x
                    .columns()
                    .into_iter()
                    .map(|col| (!is_dummy(col)).then(|| Standardization::fit(col)))
                    .collect(),
                target: Some(Standardization::fit(train_y.view())),
            },
        }
    }

    /// Fit on train, then rescale train features, train target and test
    /// features in place.
    pub fn fit_transform(
        &self,
        train_x: &mut Array2<f64>,
        train_y: &mut Array1<f64>,
        test_x: &mut Array2<f64>,
    ) -> FittedScaler {
        let fitted = self.fit(train_x, train_y);
        fitted.transform_features(train_x);
        fitted.transform_target(train_y);
        fitted.transform_features(test_x);
        fitted
    }
}

/// A column with exactly two distinct values is treated as a dummy.
pub fn is_dummy(values: ArrayView1<'_, f64>) -> bool {
    let distinct: BTreeSet<u64> = values.iter().map(|v| (v + 0.0).to_bits()).collect();
    distinct.len() == 2
}
