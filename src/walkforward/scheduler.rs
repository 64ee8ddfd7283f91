//! Worker pool for grid tasks.
//!
//! Tasks run on a dedicated rayon pool. Each worker attaches its own view of
//! the shared region, runs one cell end to end and streams the outcome to a
//! single collector on the calling thread, which owns the progress bar.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::scaler::ScalerKind;
use crate::shared::{DatasetHandle, SharedError};
use crate::strategy::{Strategy, StrategyError};

use super::grid::{GridCell, TaskContext};
use super::result::ForecastResult;
use super::window::{extract, WindowError};

/// What to do when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop dispatching and fail the run with the first failure.
    #[default]
    Abort,
    /// Record the failure and keep going.
    Skip,
}

/// Cause of a single task failure.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Data alignment: {0}")]
    DataAlignment(#[from] WindowError),

    #[error("Strategy: {0}")]
    Strategy(#[from] StrategyError),

    /// The worker could not attach its view of the shared region. Only a
    /// handle whose shape disagrees with its buffer produces this.
    #[error("Shared region: {0}")]
    Region(#[from] SharedError),
}

/// A failed task and the cell it belonged to.
#[derive(Error, Debug)]
#[error("{cell} failed: {error}")]
pub struct TaskFailure {
    pub cell: GridCell,
    #[source]
    pub error: TaskError,
}

/// Everything a pool run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Successful results, in completion order.
    pub results: Vec<ForecastResult>,
    /// Failures recorded under [`FailurePolicy::Skip`].
    pub failures: Vec<TaskFailure>,
}

/// Fixed-size pool that runs task grids.
pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
    threads_per_task: usize,
    policy: FailurePolicy,
    show_progress: bool,
}

impl WorkerPool {
    /// `workers` defaults to the number of available cores.
    pub fn new(
        workers: Option<usize>,
        threads_per_task: usize,
        policy: FailurePolicy,
    ) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers
            .filter(|&w| w > 0)
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()));
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("backtest-worker-{}", i))
            .build()?;
        debug!(workers, threads_per_task, ?policy, "Built worker pool");

        Ok(Self {
            pool,
            workers,
            threads_per_task: threads_per_task.max(1),
            policy,
            show_progress: false,
        })
    }

    /// Draw an indicatif progress bar while running.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Thread limit handed to each task's strategy.
    pub fn threads_per_task(&self) -> usize {
        self.threads_per_task
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run every context against the shared region.
    ///
    /// Under [`FailurePolicy::Abort`] the lowest failed cell is returned as
    /// the error; tasks not yet started when the first failure arrives are
    /// never dispatched.
    pub fn run(
        &self,
        handle: &DatasetHandle,
        contexts: &[TaskContext],
        strategy: &dyn Strategy,
        scaler: ScalerKind,
    ) -> Result<RunReport, TaskFailure> {
        let total = contexts.len();
        let progress = self.progress_bar(total);
        let cancelled = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Result<ForecastResult, TaskFailure>>();

        let mut report = RunReport {
            results: Vec::with_capacity(total),
            failures: Vec::new(),
        };
        let mut completed = 0usize;

        thread::scope(|s| {
            let cancelled = &cancelled;
            let policy = self.policy;
            s.spawn(move || {
                self.pool.install(|| {
                    contexts.par_iter().for_each_with(tx, |tx, ctx| {
                        if cancelled.load(Ordering::Acquire) {
                            return;
                        }
                        let outcome = run_task(handle, ctx, strategy, scaler).map_err(|error| {
                            if policy == FailurePolicy::Abort {
                                cancelled.store(true, Ordering::Release);
                            }
                            TaskFailure {
                                cell: ctx.cell(),
                                error,
                            }
                        });
                        // The collector outlives every sender.
                        let _ = tx.send(outcome);
                    });
                });
            });

            for outcome in rx {
                completed += 1;
                progress.inc(1);
                match outcome {
                    Ok(result) => report.results.push(result),
                    Err(failure) => {
                        debug!("{}", failure);
                        report.failures.push(failure);
                    }
                }
                if completed % (total / 10).max(1) == 0 || completed == total {
                    info!(
                        "  {:.0}% ({}/{} tasks)",
                        completed as f64 / total as f64 * 100.0,
                        completed,
                        total
                    );
                }
            }
        });
        progress.finish_and_clear();

        if self.policy == FailurePolicy::Abort {
            let mut failures = std::mem::take(&mut report.failures);
            failures.sort_by_key(|f| f.cell);
            if let Some(first) = failures.into_iter().next() {
                return Err(first);
            }
        } else if !report.failures.is_empty() {
            warn!(
                "Skipped {} failed task(s) out of {}",
                report.failures.len(),
                total
            );
        }
        Ok(report)
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_message("tasks");
        pb
    }
}

/// Attach, extract, scale, fit, predict and unscale one cell.
pub fn run_task(
    handle: &DatasetHandle,
    ctx: &TaskContext,
    strategy: &dyn Strategy,
    scaler: ScalerKind,
) -> Result<ForecastResult, TaskError> {
    let view = handle.attach()?;
    let (window, filtered) = extract(&view, ctx)?;
    drop(view);
    window.ensure_trainable(filtered, ctx.horizon)?;

    let test_features = window.test_x.row(0).to_vec();
    let mut train_x = window.train_x;
    let mut train_y = window.train_y;
    let mut test_x = window.test_x;
    let fitted = scaler.fit_transform(&mut train_x, &mut train_y, &mut test_x);

    let forecast = strategy.fit_predict(train_x.view(), train_y.view(), test_x.view(), ctx)?;
    let prediction = fitted.inverse(forecast.prediction);
    if !prediction.is_finite() {
        return Err(StrategyError::NonFinitePrediction(prediction).into());
    }

    Ok(ForecastResult {
        date: window.test_timestamp.date(),
        hour: ctx.hour,
        horizon: ctx.horizon,
        day_in_testing_period: ctx.day_in_testing_period,
        prediction,
        actual: window.test_y,
        diagnostics: forecast.diagnostics,
        predictors: ctx.predictors.clone(),
        test_features,
    })
}
