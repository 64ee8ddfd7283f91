//! Walk-forward backtest orchestration.
//!
//! [`WalkForwardBacktest`] runs one model end to end: cache lookup, grid
//! generation, publication of the shared region, optional strategy
//! calibration, the pool run, release, sorting and the cache write.
//! [`Evaluation`] runs several named models over the same prepared dataset.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::ThreadPoolBuildError;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheError, ResultCache};
use crate::data::PreparedDataset;
use crate::metrics::MetricsCalculator;
use crate::scaler::ScalerKind;
use crate::shared::{DatasetHandle, SharedDataset, SharedError};
use crate::strategy::{Calibrator, NaiveStrategy, Strategy, StrategyError};

use super::grid::{GridCell, GridError, GridSpec, Params, TaskContext, TaskGrid, TestPeriod};
use super::predictors::PredictorSpec;
use super::result::{sort_results, ForecastResult};
use super::scheduler::{TaskError, TaskFailure, WorkerPool};

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] GridError),

    #[error("Task failed for {cell}: {source}")]
    TaskFailed {
        cell: GridCell,
        #[source]
        source: TaskError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Shared region error: {0}")]
    Shared(#[from] SharedError),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] ThreadPoolBuildError),

    #[error("Calibration failed for model '{model}': {source}")]
    Calibration {
        model: String,
        #[source]
        source: StrategyError,
    },

    #[error("Duplicate model name: {0}")]
    DuplicateModel(String),
}

impl From<TaskFailure> for BacktestError {
    fn from(failure: TaskFailure) -> Self {
        Self::TaskFailed {
            cell: failure.cell,
            source: failure.error,
        }
    }
}

/// One named model: a strategy plus everything needed to build its grid.
#[derive(Clone)]
pub struct ModelSpec {
    pub name: String,
    pub strategy: Arc<dyn Strategy>,
    /// Overrides the strategy's default scaler.
    pub scaler: Option<ScalerKind>,
    pub predictors: Vec<PredictorSpec>,
    pub training_window: usize,
    pub model_params: Params,
    pub internal_params: Params,
    pub cache: Option<ResultCache>,
}

impl ModelSpec {
    pub fn new(
        name: &str,
        strategy: Arc<dyn Strategy>,
        predictors: Vec<PredictorSpec>,
        training_window: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            scaler: None,
            predictors,
            training_window,
            model_params: Params::new(),
            internal_params: Params::new(),
            cache: None,
        }
    }

    /// Naive persistence model with its default predictors and window.
    pub fn naive(name: &str) -> Self {
        Self::new(
            name,
            Arc::new(NaiveStrategy),
            NaiveStrategy::default_predictors(),
            crate::strategy::naive::NAIVE_TRAINING_WINDOW,
        )
    }

    pub fn with_scaler(mut self, scaler: ScalerKind) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn with_model_params(mut self, params: Params) -> Self {
        self.model_params = params;
        self
    }

    pub fn with_internal_params(mut self, params: Params) -> Self {
        self.internal_params = params;
        self
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn scaler_kind(&self) -> ScalerKind {
        self.scaler.unwrap_or_else(|| self.strategy.default_scaler())
    }

    fn grid_spec(&self, horizon: usize, threads_per_task: usize) -> GridSpec {
        GridSpec {
            horizon,
            training_window: self.training_window,
            predictors: self.predictors.clone(),
            model_params: self.model_params.clone(),
            internal_params: self.internal_params.clone(),
            threads_per_task,
        }
    }
}

/// Results of one model run.
#[derive(Debug, Default)]
pub struct BacktestOutcome {
    /// Sorted by `(day, horizon, hour)`.
    pub results: Vec<ForecastResult>,
    /// Only populated under the skip failure policy.
    pub failures: Vec<TaskFailure>,
    pub from_cache: bool,
}

/// Runs single models over a fixed test period on a shared worker pool.
pub struct WalkForwardBacktest {
    period: TestPeriod,
    pool: WorkerPool,
}

impl WalkForwardBacktest {
    pub fn new(period: TestPeriod, pool: WorkerPool) -> Self {
        Self { period, pool }
    }

    pub fn period(&self) -> &TestPeriod {
        &self.period
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Resolve the task grid `model` would run, without running it.
    pub fn grid(&self, model: &ModelSpec, prepared: &PreparedDataset) -> Result<TaskGrid, GridError> {
        let spec = model.grid_spec(prepared.horizon(), self.pool.threads_per_task());
        TaskGrid::generate(prepared, &self.period, &spec)
    }

    pub fn run(
        &self,
        model: &ModelSpec,
        prepared: &PreparedDataset,
    ) -> Result<BacktestOutcome, BacktestError> {
        if let Some(cache) = &model.cache {
            if let Some(results) = cache.load()? {
                info!("Model '{}': using {} cached results", model.name, results.len());
                return Ok(BacktestOutcome {
                    results,
                    failures: Vec::new(),
                    from_cache: true,
                });
            }
        }

        let grid = self.grid(model, prepared)?;
        info!(
            "Model '{}': {} tasks on {} worker(s)",
            model.name,
            grid.len(),
            self.pool.workers()
        );

        let shared = SharedDataset::publish(prepared.dataset())?;
        let outcome = self.run_published(model, prepared, &shared, &grid);
        let mut outcome = settle(&model.name, outcome, shared.release())?;

        sort_results(&mut outcome.results);
        if let Some(cache) = &model.cache {
            // The artifact holds results only, so a partial run is not cached.
            if outcome.failures.is_empty() {
                cache.store(&outcome.results)?;
            } else {
                warn!(
                    "Model '{}': not caching to {} after {} failed task(s)",
                    model.name,
                    cache.path().display(),
                    outcome.failures.len()
                );
            }
        }
        info!(
            "Model '{}': {} results, {} failure(s)",
            model.name,
            outcome.results.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    fn run_published(
        &self,
        model: &ModelSpec,
        prepared: &PreparedDataset,
        shared: &SharedDataset,
        grid: &TaskGrid,
    ) -> Result<BacktestOutcome, BacktestError> {
        let handle = shared.handle();
        let scaler = model.scaler_kind();

        let calibrated = match model.strategy.calibration_days() {
            Some(days) => {
                let spec = model.grid_spec(prepared.horizon(), self.pool.threads_per_task());
                let calibration = TaskGrid::calibration(prepared, &self.period, days, &spec)?;
                info!(
                    "Model '{}': calibrating on {} day(s) before the test period",
                    model.name, days
                );
                let calibrator = PoolCalibrator {
                    pool: &self.pool,
                    handle: &handle,
                    contexts: calibration.contexts(),
                    scaler,
                };
                model
                    .strategy
                    .calibrate(&calibrator)
                    .map_err(|source| BacktestError::Calibration {
                        model: model.name.clone(),
                        source,
                    })?
            }
            None => None,
        };
        let strategy: &dyn Strategy = match &calibrated {
            Some(frozen) => frozen.as_ref(),
            None => model.strategy.as_ref(),
        };

        let report = self.pool.run(&handle, grid.contexts(), strategy, scaler)?;
        Ok(BacktestOutcome {
            results: report.results,
            failures: report.failures,
            from_cache: false,
        })
    }
}

/// Combine a run's outcome with the region release. A run error takes
/// precedence over a release error, which is then only logged.
fn settle(
    model: &str,
    outcome: Result<BacktestOutcome, BacktestError>,
    released: Result<(), SharedError>,
) -> Result<BacktestOutcome, BacktestError> {
    match (outcome, released) {
        (Ok(outcome), released) => {
            released?;
            Ok(outcome)
        }
        (Err(e), Err(release_err)) => {
            warn!("Model '{}': {}", model, release_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

/// Scores calibration candidates by running them over the calibration grid.
struct PoolCalibrator<'a> {
    pool: &'a WorkerPool,
    handle: &'a DatasetHandle,
    contexts: &'a [TaskContext],
    scaler: ScalerKind,
}

impl Calibrator for PoolCalibrator<'_> {
    fn score(&self, candidate: &dyn Strategy) -> Result<f64, StrategyError> {
        let report = self
            .pool
            .run(self.handle, self.contexts, candidate, self.scaler)
            .map_err(|failure| StrategyError::Calibration(failure.to_string()))?;
        if let Some(first) = report.failures.first() {
            return Err(StrategyError::Calibration(format!(
                "{} of {} calibration task(s) failed for candidate '{}', first: {}",
                report.failures.len(),
                self.contexts.len(),
                candidate.name(),
                first
            )));
        }
        Ok(MetricsCalculator::calculate(&report.results)
            .mae
            .unwrap_or(f64::NAN))
    }
}

/// Per-model outputs of an [`Evaluation`].
#[derive(Debug, Default)]
pub struct EvaluationReport {
    pub results: BTreeMap<String, Vec<ForecastResult>>,
    pub failures: BTreeMap<String, Vec<TaskFailure>>,
}

/// Several named models run over one prepared dataset.
pub struct Evaluation {
    backtest: WalkForwardBacktest,
    models: Vec<ModelSpec>,
}

impl Evaluation {
    pub fn new(backtest: WalkForwardBacktest) -> Self {
        Self {
            backtest,
            models: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: ModelSpec) -> Self {
        self.models.push(model);
        self
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn backtest(&self) -> &WalkForwardBacktest {
        &self.backtest
    }

    /// Run every model in turn. Names must be unique.
    pub fn run(&self, prepared: &PreparedDataset) -> Result<EvaluationReport, BacktestError> {
        let mut report = EvaluationReport::default();
        for model in &self.models {
            if report.results.contains_key(&model.name) {
                return Err(BacktestError::DuplicateModel(model.name.clone()));
            }
            let outcome = self.backtest.run(model, prepared)?;
            if !outcome.failures.is_empty() {
                report.failures.insert(model.name.clone(), outcome.failures);
            }
            report.results.insert(model.name.clone(), outcome.results);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, DatasetPreparer};
    use crate::strategy::{EnsembleStrategy, Forecast, LinearStrategy, NetworkConfig, SearchSpace};
    use crate::walkforward::scheduler::FailurePolicy;
    use chrono::{Duration, NaiveDate};
    use ndarray::{ArrayView1, ArrayView2};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn prepared_with(days: usize, horizon: usize, load: impl Fn(usize) -> f64) -> PreparedDataset {
        let start = date(1).and_hms_opt(0, 0, 0).unwrap();
        let n = days * 24;
        let index = (0..n).map(|i| start + Duration::hours(i as i64)).collect();
        let data = Dataset::new(index)
            .with_column("load", (0..n).map(load).collect())
            .unwrap()
            .with_column("temperature", (0..n).map(|i| ((i * 7) % 13) as f64).collect())
            .unwrap();
        DatasetPreparer::new("load", horizon)
            .with_day_lags("load", &[1, 5, 6])
            .prepare(data)
            .unwrap()
    }

    fn prepared(days: usize, horizon: usize) -> PreparedDataset {
        prepared_with(days, horizon, |i| {
            50.0 + (i % 24) as f64 + 0.1 * (i / 24) as f64 + ((i * 31) % 7) as f64 * 0.3
        })
    }

    fn backtest(start: u32, end: u32, workers: usize, policy: FailurePolicy) -> WalkForwardBacktest {
        let pool = WorkerPool::new(Some(workers), 1, policy).unwrap();
        WalkForwardBacktest::new(TestPeriod::new(date(start), date(end)), pool)
    }

    /// Records training slice sizes and counts invocations.
    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
        train_rows: Mutex<Vec<usize>>,
    }

    impl Strategy for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn fit_predict(
            &self,
            train_x: ArrayView2<'_, f64>,
            _train_y: ArrayView1<'_, f64>,
            _test_x: ArrayView2<'_, f64>,
            _ctx: &TaskContext,
        ) -> Result<Forecast, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.train_rows.lock().unwrap().push(train_x.nrows());
            Ok(Forecast::new(0.0, vec![]))
        }
    }

    #[test]
    fn test_final_day_single_horizon() {
        let data = prepared(30, 1);
        let strategy = Arc::new(Recording::default());
        let model = ModelSpec::new("rec", strategy.clone(), vec![PredictorSpec::from("temperature")], 7);

        let outcome = backtest(30, 30, 2, FailurePolicy::Abort).run(&model, &data).unwrap();

        assert_eq!(outcome.results.len(), 24);
        assert!(!outcome.from_cache);
        assert!(outcome.results.iter().all(|r| r.date == date(30)));
        // 9 filtered rows, the trailing 2 withheld
        assert!(strategy.train_rows.lock().unwrap().iter().all(|&n| n == 7));
        // target for the last day lies past the end of the data
        assert!(outcome.results.iter().all(|r| r.actual.is_none()));
    }

    #[test]
    fn test_naive_on_constant_target() {
        let data = prepared_with(30, 2, |_| 42.0);
        let model = ModelSpec::naive("naive");

        let outcome = backtest(20, 25, 3, FailurePolicy::Abort).run(&model, &data).unwrap();

        assert_eq!(outcome.results.len(), 6 * 2 * 24);
        assert!(outcome.results.iter().all(|r| r.prediction == 42.0));
        assert!(outcome.results.iter().all(|r| r.actual == Some(42.0)));
    }

    #[test]
    fn test_results_stay_on_requested_dates_when_data_starts_mid_day() {
        let start = date(1).and_hms_opt(5, 0, 0).unwrap();
        let n = 30 * 24;
        let index = (0..n).map(|i| start + Duration::hours(i as i64)).collect();
        let raw = Dataset::new(index)
            .with_column("load", (0..n).map(|i| 40.0 + (i % 24) as f64).collect())
            .unwrap();
        let data = DatasetPreparer::new("load", 1)
            .with_day_lags("load", &[6])
            .prepare(raw)
            .unwrap();

        let outcome = backtest(25, 25, 2, FailurePolicy::Abort)
            .run(&ModelSpec::naive("naive"), &data)
            .unwrap();

        assert_eq!(outcome.results.len(), 24);
        assert!(outcome.results.iter().all(|r| r.date == date(25)));
    }

    #[test]
    fn test_cache_hit_skips_pipeline() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("naive.json"));
        let data = prepared(30, 1);
        let bt = backtest(25, 26, 2, FailurePolicy::Abort);

        let cold = bt.run(&ModelSpec::naive("naive").with_cache(cache.clone()), &data).unwrap();
        assert_eq!(cold.results.len(), 48);

        let strategy = Arc::new(Recording::default());
        let model = ModelSpec::new("naive", strategy.clone(), NaiveStrategy::default_predictors(), 7)
            .with_cache(cache);
        let warm = bt.run(&model, &data).unwrap();

        assert!(warm.from_cache);
        assert_eq!(warm.results, cold.results);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_template_token_fails_before_dispatch() {
        let data = prepared(30, 1);
        let strategy = Arc::new(Recording::default());
        let model = ModelSpec::new("bad", strategy.clone(), vec![PredictorSpec::from("load_d-{lag}")], 7);

        let err = backtest(25, 25, 2, FailurePolicy::Abort).run(&model, &data).unwrap_err();

        assert!(matches!(
            err,
            BacktestError::Configuration(GridError::UnknownPlaceholder { ref token, .. }) if token == "lag"
        ));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cold_runs_write_identical_artifacts() {
        let dir = tempdir().unwrap();
        let data = prepared(30, 2);
        let predictors = vec![
            PredictorSpec::from("load_d-1"),
            PredictorSpec::from("temperature"),
            PredictorSpec::from("ones"),
        ];

        let mut artifacts = Vec::new();
        for (i, workers) in [1, 4].into_iter().enumerate() {
            let path = dir.path().join(format!("run{}.json", i));
            let model = ModelSpec::new("ols", Arc::new(LinearStrategy::ols()), predictors.clone(), 14)
                .with_cache(ResultCache::new(&path));
            backtest(22, 24, workers, FailurePolicy::Abort).run(&model, &data).unwrap();
            artifacts.push(fs::read(&path).unwrap());
        }
        assert_eq!(artifacts[0], artifacts[1]);
    }

    #[test]
    fn test_task_failure_names_cell() {
        // Training window reaches day 0 where load_d-6 is NaN.
        let data = prepared(30, 1);
        let model = ModelSpec::new(
            "ols",
            Arc::new(LinearStrategy::ols()),
            vec![PredictorSpec::from("load_d-6")],
            7,
        );

        let err = backtest(8, 8, 1, FailurePolicy::Abort).run(&model, &data).unwrap_err();
        match err {
            BacktestError::TaskFailed { cell, source } => {
                assert_eq!(cell, GridCell { day: 0, horizon: 1, hour: 0 });
                assert!(matches!(source, TaskError::DataAlignment(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_skip_policy_keeps_going() {
        let data = prepared(30, 1);
        let model = ModelSpec::new(
            "ols",
            Arc::new(LinearStrategy::ols()),
            vec![PredictorSpec::from("load_d-6")],
            7,
        );

        let outcome = backtest(8, 20, 2, FailurePolicy::Skip).run(&model, &data).unwrap();
        assert_eq!(outcome.results.len() + outcome.failures.len(), 13 * 24);
        assert!(!outcome.failures.is_empty());
        assert!(!outcome.results.is_empty());
    }

    #[test]
    fn test_skipped_failures_survive_rerun_with_cache() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("ols.json"));
        let data = prepared(30, 1);
        let model = ModelSpec::new(
            "ols",
            Arc::new(LinearStrategy::ols()),
            vec![PredictorSpec::from("load_d-6")],
            7,
        )
        .with_cache(cache.clone());
        let bt = backtest(8, 20, 2, FailurePolicy::Skip);

        let cold = bt.run(&model, &data).unwrap();
        assert!(!cold.failures.is_empty());
        assert!(!cache.exists());

        let warm = bt.run(&model, &data).unwrap();
        assert!(!warm.from_cache);
        assert_eq!(warm.failures.len(), cold.failures.len());
        assert_eq!(warm.results, cold.results);
    }

    /// Calibrates by scoring itself; fails every task at `bad_hour`.
    struct SelfScoring {
        bad_hour: u32,
    }

    impl Strategy for SelfScoring {
        fn name(&self) -> &str {
            "self-scoring"
        }

        fn fit_predict(
            &self,
            _train_x: ArrayView2<'_, f64>,
            _train_y: ArrayView1<'_, f64>,
            _test_x: ArrayView2<'_, f64>,
            ctx: &TaskContext,
        ) -> Result<Forecast, StrategyError> {
            if ctx.hour == self.bad_hour {
                return Err(StrategyError::SingularMatrix);
            }
            Ok(Forecast::new(0.0, vec![]))
        }

        fn calibration_days(&self) -> Option<usize> {
            Some(2)
        }

        fn calibrate(
            &self,
            calibrator: &dyn Calibrator,
        ) -> Result<Option<Box<dyn Strategy>>, StrategyError> {
            calibrator.score(self)?;
            Ok(None)
        }
    }

    #[test]
    fn test_calibration_fails_when_a_candidate_task_fails() {
        let data = prepared(30, 1);
        let model = ModelSpec::new(
            "flaky",
            Arc::new(SelfScoring { bad_hour: 3 }),
            vec![PredictorSpec::from("temperature")],
            7,
        );

        let err = backtest(20, 20, 2, FailurePolicy::Skip).run(&model, &data).unwrap_err();
        match err {
            BacktestError::Calibration { model, source: StrategyError::Calibration(message) } => {
                assert_eq!(model, "flaky");
                assert!(message.starts_with("2 of 48 calibration task(s) failed"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let healthy = ModelSpec::new(
            "healthy",
            Arc::new(SelfScoring { bad_hour: 99 }),
            vec![PredictorSpec::from("temperature")],
            7,
        );
        let outcome = backtest(20, 20, 2, FailurePolicy::Skip).run(&healthy, &data).unwrap();
        assert_eq!(outcome.results.len(), 24);
    }

    #[test]
    fn test_run_error_wins_over_release_error() {
        let still_attached = || SharedError::StillAttached {
            name: "region".to_string(),
            attached: 1,
        };

        let err = settle(
            "m",
            Err(BacktestError::DuplicateModel("m".to_string())),
            Err(still_attached()),
        )
        .unwrap_err();
        assert!(matches!(err, BacktestError::DuplicateModel(_)));

        let err = settle("m", Ok(BacktestOutcome::default()), Err(still_attached())).unwrap_err();
        assert!(matches!(err, BacktestError::Shared(SharedError::StillAttached { .. })));

        assert!(settle("m", Ok(BacktestOutcome::default()), Ok(())).is_ok());
    }

    #[test]
    fn test_evaluation_returns_name_keyed_results() {
        let data = prepared(40, 2);
        let backtest = backtest(30, 32, 3, FailurePolicy::Abort);
        let evaluation = Evaluation::new(backtest)
            .with_model(ModelSpec::naive("naive"))
            .with_model(
                ModelSpec::new(
                    "ridge",
                    Arc::new(LinearStrategy::ridge()),
                    vec![PredictorSpec::from("load_d-1"), PredictorSpec::from("temperature")],
                    21,
                )
                .with_model_params(Params::from([("alpha".to_string(), serde_json::json!(0.5))])),
            );

        let report = evaluation.run(&data).unwrap();
        assert_eq!(report.results.keys().collect::<Vec<_>>(), vec!["naive", "ridge"]);
        for results in report.results.values() {
            assert_eq!(results.len(), 3 * 2 * 24);
            let cells: Vec<_> = results.iter().map(|r| r.cell()).collect();
            let mut sorted = cells.clone();
            sorted.sort();
            assert_eq!(cells, sorted);
        }
        assert!(report.failures.is_empty());
        assert!(report.results["ridge"].iter().all(|r| r.diagnostics.len() == 2));
    }

    #[test]
    fn test_duplicate_model_names_rejected() {
        let data = prepared(30, 1);
        let evaluation = Evaluation::new(backtest(25, 25, 1, FailurePolicy::Abort))
            .with_model(ModelSpec::naive("m"))
            .with_model(ModelSpec::naive("m"));
        assert!(matches!(
            evaluation.run(&data),
            Err(BacktestError::DuplicateModel(ref name)) if name == "m"
        ));
    }

    #[test]
    fn test_calibrated_ensemble_runs() {
        let data = prepared(40, 1);
        let strategy = EnsembleStrategy::new()
            .with_members(2)
            .with_config(NetworkConfig {
                hidden: 3,
                epochs: 20,
                ..NetworkConfig::default()
            })
            .with_search(SearchSpace {
                calibration_days: 2,
                hidden: vec![2, 4],
                ..SearchSpace::default()
            });
        let model = ModelSpec::new(
            "ensemble",
            Arc::new(strategy),
            vec![PredictorSpec::from("load_d-1"), PredictorSpec::from("temperature")],
            14,
        );

        let outcome = backtest(35, 35, 2, FailurePolicy::Abort).run(&model, &data).unwrap();
        assert_eq!(outcome.results.len(), 24);
        assert!(outcome.results.iter().all(|r| r.prediction.is_finite()));
    }

    #[test]
    fn test_calibration_window_must_fit_before_test_period() {
        let data = prepared(30, 1);
        let strategy = EnsembleStrategy::new().with_search(SearchSpace {
            calibration_days: 20,
            ..SearchSpace::default()
        });
        let model = ModelSpec::new("ensemble", Arc::new(strategy), vec![PredictorSpec::from("temperature")], 7);

        assert!(matches!(
            backtest(10, 10, 1, FailurePolicy::Abort).run(&model, &data),
            Err(BacktestError::Configuration(GridError::CalibrationWindow { .. }))
        ));
    }
}
