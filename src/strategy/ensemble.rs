//! Ensemble of small feed-forward networks.
//!
//! Each member is a one-hidden-layer `tanh` network trained by full-batch
//! gradient descent on the scaled training slice. The forecast is the mean of
//! the member predictions. Member seeds are derived from the grid cell, so a
//! task gives the same answer on any worker and under any pool size.

use std::panic;
use std::thread;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::walkforward::grid::{GridCell, Params, TaskContext};

use super::{
    check_inputs, finite, param_f64, param_usize, Calibrator, Forecast, Strategy, StrategyError,
};

/// Hyper-parameters of one network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub hidden: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// L2 weight decay.
    pub l2: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden: 8,
            epochs: 200,
            learning_rate: 0.05,
            l2: 1e-4,
        }
    }
}

/// Candidate values swept during calibration.
///
/// An empty list keeps the base configuration's value for that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    /// Issue days held back immediately before the test period.
    pub calibration_days: usize,
    #[serde(default)]
    pub hidden: Vec<usize>,
    #[serde(default)]
    pub epochs: Vec<usize>,
    #[serde(default)]
    pub learning_rate: Vec<f64>,
}

impl SearchSpace {
    pub fn total_combinations(&self) -> usize {
        self.hidden.len().max(1) * self.epochs.len().max(1) * self.learning_rate.len().max(1)
    }

    /// All candidate configurations, in a fixed order.
    pub fn combinations(&self, base: &NetworkConfig) -> Vec<NetworkConfig> {
        let or_base = |values: &[usize], fallback: usize| {
            if values.is_empty() {
                vec![fallback]
            } else {
                values.to_vec()
            }
        };
        let hidden = or_base(&self.hidden, base.hidden);
        let epochs = or_base(&self.epochs, base.epochs);
        let learning_rates = if self.learning_rate.is_empty() {
            vec![base.learning_rate]
        } else {
            self.learning_rate.clone()
        };

        let mut combos = Vec::with_capacity(self.total_combinations());
        for &hidden in &hidden {
            for &epochs in &epochs {
                for &learning_rate in &learning_rates {
                    combos.push(NetworkConfig {
                        hidden,
                        epochs,
                        learning_rate,
                        l2: base.l2,
                    });
                }
            }
        }
        combos
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleStrategy {
    members: usize,
    config: NetworkConfig,
    seed: u64,
    search: Option<SearchSpace>,
}

impl Default for EnsembleStrategy {
    fn default() -> Self {
        Self {
            members: 5,
            config: NetworkConfig::default(),
            seed: 42,
            search: None,
        }
    }
}

impl EnsembleStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `members`, `hidden`, `epochs`, `learning_rate`, `l2` and `seed`
    /// from model params, defaulting anything absent.
    pub fn from_params(params: &Params) -> Result<Self, StrategyError> {
        let defaults = Self::default();
        let strategy = Self {
            members: param_usize(params, "members", defaults.members)?,
            config: NetworkConfig {
                hidden: param_usize(params, "hidden", defaults.config.hidden)?,
                epochs: param_usize(params, "epochs", defaults.config.epochs)?,
                learning_rate: param_f64(params, "learning_rate", defaults.config.learning_rate)?,
                l2: param_f64(params, "l2", defaults.config.l2)?,
            },
            seed: param_usize(params, "seed", defaults.seed as usize)? as u64,
            search: None,
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn with_members(mut self, members: usize) -> Self {
        self.members = members;
        self
    }

    pub fn with_config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_search(mut self, search: SearchSpace) -> Self {
        self.search = Some(search);
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn members(&self) -> usize {
        self.members
    }

    fn validate(&self) -> Result<(), StrategyError> {
        let invalid = |name: &str, reason: &str| StrategyError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if self.members == 0 {
            return Err(invalid("members", "must be at least 1"));
        }
        if self.config.hidden == 0 {
            return Err(invalid("hidden", "must be at least 1"));
        }
        if !(self.config.learning_rate > 0.0) {
            return Err(invalid("learning_rate", "must be positive"));
        }
        Ok(())
    }

    /// The same ensemble with `config` fixed and no further search.
    fn frozen(&self, config: NetworkConfig) -> Self {
        Self {
            members: self.members,
            config,
            seed: self.seed,
            search: None,
        }
    }

    fn member_seed(&self, cell: GridCell, member: usize) -> u64 {
        let cell_key = ((cell.day as u64) << 32) ^ ((cell.horizon as u64) << 16) ^ cell.hour as u64;
        splitmix64(self.seed ^ splitmix64(cell_key) ^ splitmix64(member as u64 + 1))
    }
}

impl Strategy for EnsembleStrategy {
    fn name(&self) -> &str {
        "ensemble"
    }

    fn fit_predict(
        &self,
        train_x: ArrayView2<'_, f64>,
        train_y: ArrayView1<'_, f64>,
        test_x: ArrayView2<'_, f64>,
        ctx: &TaskContext,
    ) -> Result<Forecast, StrategyError> {
        check_inputs(&train_x, &train_y, &test_x)?;
        self.validate()?;

        let cell = ctx.cell();
        let config = self.config;
        let member = |m: usize| -> f64 {
            let mut rng = StdRng::seed_from_u64(self.member_seed(cell, m));
            Network::train(&config, train_x, train_y, &mut rng).predict_one(test_x.row(0))
        };

        let threads = ctx.threads_per_task.clamp(1, self.members);
        let predictions: Vec<f64> = if threads == 1 {
            (0..self.members).map(member).collect()
        } else {
            let chunk = self.members.div_ceil(threads);
            let member = &member;
            thread::scope(|s| {
                let handles: Vec<_> = (0..self.members)
                    .step_by(chunk)
                    .map(|lo| {
                        let hi = (lo + chunk).min(self.members);
                        s.spawn(move || (lo..hi).map(member).collect::<Vec<f64>>())
                    })
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                    .collect()
            })
        };

        let mean = predictions.iter().sum::<f64>() / predictions.len() as f64;
        Ok(Forecast::new(finite(mean)?, Vec::new()))
    }

    fn calibration_days(&self) -> Option<usize> {
        self.search.as_ref().map(|s| s.calibration_days)
    }

    fn calibrate(
        &self,
        calibrator: &dyn Calibrator,
    ) -> Result<Option<Box<dyn Strategy>>, StrategyError> {
        let Some(search) = &self.search else {
            return Ok(None);
        };
        let candidates = search.combinations(&self.config);
        info!("Calibrating ensemble over {} candidate(s)", candidates.len());

        let mut best: Option<(NetworkConfig, f64)> = None;
        for (i, config) in candidates.iter().enumerate() {
            let mae = calibrator.score(&self.frozen(*config))?;
            info!(
                "  Candidate {}/{}: hidden={} epochs={} lr={} MAE={:.4}",
                i + 1,
                candidates.len(),
                config.hidden,
                config.epochs,
                config.learning_rate,
                mae
            );
            if mae.is_finite() && best.map_or(true, |(_, b)| mae < b) {
                best = Some((*config, mae));
            }
        }

        let (config, mae) = best.ok_or_else(|| {
            StrategyError::Calibration("no candidate produced a finite error".to_string())
        })?;
        info!(
            "Calibration complete: hidden={} epochs={} lr={} MAE={:.4}",
            config.hidden, config.epochs, config.learning_rate, mae
        );
        Ok(Some(Box::new(self.frozen(config))))
    }
}

/// One-hidden-layer `tanh` network with a linear output.
#[derive(Debug, Clone)]
struct Network {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: f64,
}

impl Network {
    /// Glorot-uniform initialization.
    fn init(inputs: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let limit1 = (6.0 / (inputs + hidden) as f64).sqrt();
        let limit2 = (6.0 / (hidden + 1) as f64).sqrt();
        Self {
            w1: Array2::from_shape_fn((inputs, hidden), |_| rng.gen_range(-limit1..limit1)),
            b1: Array1::zeros(hidden),
            w2: Array1::from_shape_fn(hidden, |_| rng.gen_range(-limit2..limit2)),
            b2: 0.0,
        }
    }

    fn train(
        config: &NetworkConfig,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        rng: &mut StdRng,
    ) -> Self {
        let mut net = Self::init(x.ncols(), config.hidden, rng);
        let n = x.nrows() as f64;
        let lr = config.learning_rate;

        for _ in 0..config.epochs {
            let hidden = net.hidden(x);
            let error = hidden.dot(&net.w2) + net.b2 - y;

            let grad_w2 = hidden.t().dot(&error) / n + &net.w2 * config.l2;
            let grad_b2 = error.sum() / n;

            let outer = error.view().insert_axis(Axis(1)).dot(&net.w2.view().insert_axis(Axis(0)));
            let delta = outer * hidden.mapv(|h| 1.0 - h * h);
            let grad_w1 = x.t().dot(&delta) / n + &net.w1 * config.l2;
            let grad_b1 = delta.sum_axis(Axis(0)) / n;

            net.w2.scaled_add(-lr, &grad_w2);
            net.b2 -= lr * grad_b2;
            net.w1.scaled_add(-lr, &grad_w1);
            net.b1.scaled_add(-lr, &grad_b1);
        }

        net
    }

    fn hidden(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        (x.dot(&self.w1) + &self.b1).mapv(f64::tanh)
    }

    fn predict_one(&self, row: ArrayView1<'_, f64>) -> f64 {
        let hidden = (row.dot(&self.w1) + &self.b1).mapv(f64::tanh);
        hidden.dot(&self.w2) + self.b2
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walkforward::grid::tests_support::context;
    use ndarray::array;
    use serde_json::json;
    use std::cell::RefCell;

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| ((i * (j + 3)) % 11) as f64 / 5.0 - 1.0);
        let y = x.column(0).to_owned() * 0.8 - x.column(1).to_owned() * 0.3;
        (x, y)
    }

    #[test]
    fn test_learns_simple_relation() {
        let (x, y) = linear_data();
        let strategy = EnsembleStrategy::new()
            .with_members(3)
            .with_config(NetworkConfig {
                hidden: 6,
                epochs: 800,
                learning_rate: 0.1,
                l2: 0.0,
            });
        let forecast = strategy
            .fit_predict(x.view(), y.view(), array![[0.5, -0.5]].view(), &context(1))
            .unwrap();
        assert!((forecast.prediction - 0.55).abs() < 0.25, "{}", forecast.prediction);
    }

    #[test]
    fn test_deterministic_across_thread_limits() {
        let (x, y) = linear_data();
        let strategy = EnsembleStrategy::new().with_members(4).with_config(NetworkConfig {
            epochs: 50,
            ..NetworkConfig::default()
        });
        let test = array![[0.1, 0.2]];

        let mut single = context(2);
        single.threads_per_task = 1;
        let mut multi = context(2);
        multi.threads_per_task = 3;

        let a = strategy.fit_predict(x.view(), y.view(), test.view(), &single).unwrap();
        let b = strategy.fit_predict(x.view(), y.view(), test.view(), &multi).unwrap();
        let c = strategy.fit_predict(x.view(), y.view(), test.view(), &single).unwrap();
        assert_eq!(a.prediction, b.prediction);
        assert_eq!(a.prediction, c.prediction);
    }

    #[test]
    fn test_seed_depends_on_cell_and_member() {
        let strategy = EnsembleStrategy::new();
        let cell = GridCell { day: 0, horizon: 1, hour: 3 };
        let other = GridCell { day: 0, horizon: 1, hour: 4 };
        assert_ne!(strategy.member_seed(cell, 0), strategy.member_seed(cell, 1));
        assert_ne!(strategy.member_seed(cell, 0), strategy.member_seed(other, 0));
        assert_eq!(strategy.member_seed(cell, 2), strategy.member_seed(cell, 2));
    }

    #[test]
    fn test_from_params() {
        let mut params = Params::new();
        params.insert("members".to_string(), json!(2));
        params.insert("learning_rate".to_string(), json!(0.01));
        let strategy = EnsembleStrategy::from_params(&params).unwrap();
        assert_eq!(strategy.members(), 2);
        assert_eq!(strategy.config().learning_rate, 0.01);
        assert_eq!(strategy.config().hidden, NetworkConfig::default().hidden);

        params.insert("members".to_string(), json!(0));
        assert!(EnsembleStrategy::from_params(&params).is_err());
    }

    #[test]
    fn test_search_combinations() {
        let search = SearchSpace {
            calibration_days: 5,
            hidden: vec![4, 8],
            epochs: vec![],
            learning_rate: vec![0.01, 0.1],
        };
        let base = NetworkConfig::default();
        let combos = search.combinations(&base);
        assert_eq!(combos.len(), 4);
        assert_eq!(search.total_combinations(), 4);
        assert!(combos.iter().all(|c| c.epochs == base.epochs));
        assert_eq!(combos[0].hidden, 4);
        assert_eq!(combos[1].learning_rate, 0.1);
    }

    /// Hands out scripted errors in candidate order.
    struct Scripted {
        errors: Vec<f64>,
        calls: RefCell<usize>,
    }

    impl Scripted {
        fn new(errors: Vec<f64>) -> Self {
            Self {
                errors,
                calls: RefCell::new(0),
            }
        }
    }

    impl Calibrator for Scripted {
        fn score(&self, _candidate: &dyn Strategy) -> Result<f64, StrategyError> {
            let mut calls = self.calls.borrow_mut();
            let error = self.errors[*calls];
            *calls += 1;
            Ok(error)
        }
    }

    #[test]
    fn test_calibration_picks_lowest_error() {
        let search = SearchSpace {
            calibration_days: 3,
            hidden: vec![4, 8, 16],
            ..SearchSpace::default()
        };
        let strategy = EnsembleStrategy::new()
            .with_members(2)
            .with_config(NetworkConfig {
                epochs: 30,
                ..NetworkConfig::default()
            })
            .with_search(search.clone());
        assert_eq!(strategy.calibration_days(), Some(3));

        let calibrator = Scripted::new(vec![3.0, 1.0, f64::NAN]);
        let frozen = strategy.calibrate(&calibrator).unwrap().unwrap();
        assert_eq!(*calibrator.calls.borrow(), 3);
        assert_eq!(frozen.calibration_days(), None);

        let winner = strategy.frozen(search.combinations(strategy.config())[1]);
        let (x, y) = linear_data();
        let test = array![[0.3, 0.3]];
        let a = frozen.fit_predict(x.view(), y.view(), test.view(), &context(1)).unwrap();
        let b = winner.fit_predict(x.view(), y.view(), test.view(), &context(1)).unwrap();
        assert_eq!(a.prediction, b.prediction);
    }

    #[test]
    fn test_calibration_without_finite_error_fails() {
        let strategy = EnsembleStrategy::new().with_search(SearchSpace {
            calibration_days: 3,
            hidden: vec![4],
            ..SearchSpace::default()
        });
        let calibrator = Scripted::new(vec![f64::INFINITY]);
        assert!(matches!(
            strategy.calibrate(&calibrator),
            Err(StrategyError::Calibration(_))
        ));
    }

    #[test]
    fn test_without_search_calibration_is_noop() {
        let strategy = EnsembleStrategy::new();
        assert_eq!(strategy.calibration_days(), None);
        let calibrator = Scripted::new(Vec::new());
        assert!(strategy.calibrate(&calibrator).unwrap().is_none());
        assert_eq!(*calibrator.calls.borrow(), 0);
    }
}
