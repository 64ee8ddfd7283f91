//! Zero-intercept linear strategies.
//!
//! All variants solve the (weighted, optionally penalized) normal equations
//! on the scaled training slice. Predictors are expected to carry their own
//! intercept column (`ones`) when one is wanted.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::walkforward::grid::TaskContext;

use super::{check_inputs, finite, param_f64, param_usize, Forecast, Strategy, StrategyError};

/// Relative pivot threshold below which Cholesky treats a matrix as singular.
const PIVOT_EPS: f64 = 1e-12;

/// Ridge jitter tried, relative to the mean diagonal, when a plain solve fails.
const JITTER_LADDER: [f64; 3] = [1e-10, 1e-8, 1e-6];

/// Penalty applied to the least squares objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Penalty {
    None,
    /// L2 penalty; `alpha` overrides the default when present in model params.
    Ridge { alpha: f64 },
    /// L1 penalty solved by coordinate descent.
    Lasso { alpha: f64, max_iter: usize, tol: f64 },
}

#[derive(Debug, Clone)]
pub struct LinearStrategy {
    name: String,
    penalty: Penalty,
}

impl LinearStrategy {
    pub fn ols() -> Self {
        Self {
            name: "ols".to_string(),
            penalty: Penalty::None,
        }
    }

    pub fn ridge() -> Self {
        Self {
            name: "ridge".to_string(),
            penalty: Penalty::Ridge { alpha: 1.0 },
        }
    }

    pub fn lasso() -> Self {
        Self {
            name: "lasso".to_string(),
            penalty: Penalty::Lasso {
                alpha: 0.1,
                max_iter: 1000,
                tol: 1e-4,
            },
        }
    }

    pub fn with_penalty(mut self, penalty: Penalty) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn penalty(&self) -> Penalty {
        self.penalty
    }

    /// Penalty with model parameters applied on top of the defaults.
    fn resolved_penalty(&self, ctx: &TaskContext) -> Result<Penalty, StrategyError> {
        let params = &ctx.model_params;
        let penalty = match self.penalty {
            Penalty::None => Penalty::None,
            Penalty::Ridge { alpha } => Penalty::Ridge {
                alpha: param_f64(params, "alpha", alpha)?,
            },
            Penalty::Lasso { alpha, max_iter, tol } => Penalty::Lasso {
                alpha: param_f64(params, "alpha", alpha)?,
                max_iter: param_usize(params, "max_iter", max_iter)?,
                tol: param_f64(params, "tol", tol)?,
            },
        };
        match penalty {
            Penalty::Ridge { alpha } | Penalty::Lasso { alpha, .. } if !(alpha >= 0.0) => {
                Err(StrategyError::InvalidParameter {
                    name: "alpha".to_string(),
                    reason: format!("must be non-negative, got {}", alpha),
                })
            }
            other => Ok(other),
        }
    }
}

impl Strategy for LinearStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit_predict(
        &self,
        train_x: ArrayView2<'_, f64>,
        train_y: ArrayView1<'_, f64>,
        test_x: ArrayView2<'_, f64>,
        ctx: &TaskContext,
    ) -> Result<Forecast, StrategyError> {
        check_inputs(&train_x, &train_y, &test_x)?;
        let coefficients = match self.resolved_penalty(ctx)? {
            Penalty::None => least_squares(train_x, train_y, None, 0.0)?,
            Penalty::Ridge { alpha } => least_squares(train_x, train_y, None, alpha)?,
            Penalty::Lasso { alpha, max_iter, tol } => {
                coordinate_descent(train_x, train_y, alpha, max_iter, tol)
            }
        };
        predict(test_x, coefficients)
    }
}

/// Per-row sample weights for [`WeightedLinearStrategy`].
pub trait WeightFunction: Send + Sync + fmt::Debug {
    /// One non-negative weight per training row, oldest row first.
    fn weights(
        &self,
        ctx: &TaskContext,
        train_x: ArrayView2<'_, f64>,
        test_x: ArrayView2<'_, f64>,
    ) -> Vec<f64>;
}

/// Every row weighs the same; equivalent to OLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl WeightFunction for Uniform {
    fn weights(&self, _ctx: &TaskContext, train_x: ArrayView2<'_, f64>, _test_x: ArrayView2<'_, f64>) -> Vec<f64> {
        vec![1.0; train_x.nrows()]
    }
}

/// Weight halves every `half_life` days going back from the newest row.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialDecay {
    pub half_life: f64,
}

impl ExponentialDecay {
    pub fn new(half_life: f64) -> Self {
        Self { half_life }
    }
}

impl WeightFunction for ExponentialDecay {
    fn weights(&self, _ctx: &TaskContext, train_x: ArrayView2<'_, f64>, _test_x: ArrayView2<'_, f64>) -> Vec<f64> {
        let n = train_x.nrows();
        (0..n)
            .map(|i| 0.5f64.powf((n - 1 - i) as f64 / self.half_life))
            .collect()
    }
}

/// Weighted least squares with a pluggable weight function.
///
/// A `half_life` in the task's internal params replaces the configured
/// weight function with [`ExponentialDecay`] for that task.
#[derive(Debug, Clone)]
pub struct WeightedLinearStrategy {
    weights: Arc<dyn WeightFunction>,
}

impl WeightedLinearStrategy {
    pub fn new<W: WeightFunction + 'static>(weights: W) -> Self {
        Self {
            weights: Arc::new(weights),
        }
    }

    /// Exponential decay when `half_life` is set in model params, uniform otherwise.
    pub fn from_half_life(half_life: Option<f64>) -> Result<Self, StrategyError> {
        match half_life {
            None => Ok(Self::new(Uniform)),
            Some(h) if h > 0.0 && h.is_finite() => Ok(Self::new(ExponentialDecay::new(h))),
            Some(h) => Err(StrategyError::InvalidParameter {
                name: "half_life".to_string(),
                reason: format!("must be positive, got {}", h),
            }),
        }
    }
}

impl Strategy for WeightedLinearStrategy {
    fn name(&self) -> &str {
        "wls"
    }

    fn fit_predict(
        &self,
        train_x: ArrayView2<'_, f64>,
        train_y: ArrayView1<'_, f64>,
        test_x: ArrayView2<'_, f64>,
        ctx: &TaskContext,
    ) -> Result<Forecast, StrategyError> {
        check_inputs(&train_x, &train_y, &test_x)?;
        let weights = match ctx.internal_params.get("half_life") {
            Some(_) => {
                let half_life = param_f64(&ctx.internal_params, "half_life", f64::NAN)?;
                Self::from_half_life(Some(half_life))?
                    .weights
                    .weights(ctx, train_x, test_x)
            }
            None => self.weights.weights(ctx, train_x, test_x),
        };
        if weights.len() != train_x.nrows() {
            return Err(StrategyError::DimensionMismatch {
                expected: train_x.nrows(),
                got: weights.len(),
            });
        }
        if let Some(w) = weights.iter().find(|w| !(**w >= 0.0) || !w.is_finite()) {
            return Err(StrategyError::InvalidParameter {
                name: "weights".to_string(),
                reason: format!("weights must be finite and non-negative, got {}", w),
            });
        }
        let coefficients = least_squares(train_x, train_y, Some(&weights), 0.0)?;
        predict(test_x, coefficients)
    }
}

fn predict(test_x: ArrayView2<'_, f64>, coefficients: Array1<f64>) -> Result<Forecast, StrategyError> {
    let prediction = test_x.row(0).dot(&coefficients);
    Ok(Forecast::new(finite(prediction)?, coefficients.to_vec()))
}

/// Solve `(Xᵀ W X + alpha I) b = Xᵀ W y`.
pub fn least_squares(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    weights: Option<&[f64]>,
    alpha: f64,
) -> Result<Array1<f64>, StrategyError> {
    let weighted_x = match weights {
        Some(w) => {
            let w = ArrayView1::from(w);
            &x * &w.insert_axis(Axis(1))
        }
        None => x.to_owned(),
    };
    let mut xtx = weighted_x.t().dot(&x);
    let xty = weighted_x.t().dot(&y);
    for i in 0..xtx.nrows() {
        xtx[[i, i]] += alpha;
    }

    if let Ok(solution) = cholesky_solve(&xtx, &xty) {
        return Ok(solution);
    }

    let p = xtx.nrows().max(1) as f64;
    let scale = (xtx.diag().sum() / p).abs().max(1.0);
    for jitter in JITTER_LADDER {
        let mut damped = xtx.clone();
        for i in 0..damped.nrows() {
            damped[[i, i]] += jitter * scale;
        }
        if let Ok(solution) = cholesky_solve(&damped, &xty) {
            return Ok(solution);
        }
    }
    Err(StrategyError::SingularMatrix)
}

/// Solve `A x = b` for symmetric positive definite `A`.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, StrategyError> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(StrategyError::DimensionMismatch {
            expected: n,
            got: b.len(),
        });
    }
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if !(diag > PIVOT_EPS * a[[i, i]].abs().max(1.0)) {
                    return Err(StrategyError::SingularMatrix);
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }

    // Lᵀ x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }

    Ok(x)
}

/// Minimize `1/(2n) ||y - Xb||² + alpha ||b||₁` by cyclic coordinate descent.
pub fn coordinate_descent(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    alpha: f64,
    max_iter: usize,
    tol: f64,
) -> Array1<f64> {
    let n = x.nrows() as f64;
    let p = x.ncols();
    let mut coefficients = Array1::<f64>::zeros(p);
    let mut residual = y.to_owned();
    let column_norms: Vec<f64> = x.columns().into_iter().map(|c| c.dot(&c) / n).collect();

    for _ in 0..max_iter {
        let mut max_change = 0.0f64;
        for j in 0..p {
            if column_norms[j] == 0.0 {
                continue;
            }
            let column = x.column(j);
            let rho = column.dot(&residual) / n + column_norms[j] * coefficients[j];
            let updated = soft_threshold(rho, alpha) / column_norms[j];
            let change = updated - coefficients[j];
            if change != 0.0 {
                residual.scaled_add(-change, &column);
                coefficients[j] = updated;
            }
            max_change = max_change.max(change.abs());
        }
        if max_change <= tol {
            break;
        }
    }

    coefficients
}

fn soft_threshold(value: f64, lambda: f64) -> f64 {
    if value > lambda {
        value - lambda
    } else if value < -lambda {
        value + lambda
    } else {
        0.0
    }
}
