//! Task grid generation.
//!
//! One task per (day in testing period, horizon, hour) cell, each carrying a
//! fully resolved [`TaskContext`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::data::{lead_column, PreparedDataset, HOURS_PER_DAY};

use super::predictors::{resolve_all, PredictorScope, PredictorSpec};

/// Free-form parameter map copied unchanged into every task.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Configuration errors detected before any task is dispatched.
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Test period boundary {0} has no row in the dataset")]
    BoundaryNotFound(NaiveDate),

    #[error("Test period ends ({end}) before it starts ({start})")]
    ReversedPeriod { start: NaiveDate, end: NaiveDate },

    #[error("Horizon {requested} exceeds the {available} lead column(s) in the dataset")]
    HorizonExceedsDataset { requested: usize, available: usize },

    #[error("Horizon and training window must both be at least 1")]
    EmptyWindow,

    #[error("Unknown placeholder '{{{token}}}' in predictor template '{pattern}'")]
    UnknownPlaceholder { pattern: String, token: String },

    #[error("Unterminated placeholder in predictor template '{0}'")]
    UnterminatedPlaceholder(String),

    #[error("Predictor list resolved to no columns for {0}")]
    NoPredictors(GridCell),

    #[error("Column '{column}' required by {cell} is not in the dataset")]
    MissingColumn { column: String, cell: GridCell },

    #[error("Calibration needs {needed} day(s) before the test period, only {available} available")]
    CalibrationWindow { needed: usize, available: usize },
}

/// Coordinates of one task.
///
/// Field order gives the canonical `(day, horizon, hour)` sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub day: usize,
    pub horizon: usize,
    pub hour: u32,
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell (day {}, horizon {}, hour {})", self.day, self.horizon, self.hour)
    }
}

/// Everything a worker needs to run one cell.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub hour: u32,
    pub day_in_testing_period: usize,
    pub dataset_offset: usize,
    pub horizon: usize,
    pub training_window: usize,
    /// Resolved lead column, `{base}_d+{horizon}`.
    pub target: String,
    pub predictors: Vec<String>,
    pub model_params: Arc<Params>,
    pub internal_params: Arc<Params>,
    pub threads_per_task: usize,
}

impl TaskContext {
    pub fn cell(&self) -> GridCell {
        GridCell {
            day: self.day_in_testing_period,
            horizon: self.horizon,
            hour: self.hour,
        }
    }

    /// Day ordinal of the test row.
    pub fn test_day(&self) -> i64 {
        (self.dataset_offset + self.day_in_testing_period) as i64
    }

    /// First day ordinal admitted into the filtered window (may be negative).
    pub fn window_start_day(&self) -> i64 {
        self.test_day() - self.training_window as i64 - self.horizon as i64
    }
}

/// First and last forecast issue dates, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TestPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Map both boundaries to day ordinals: `(dataset_offset, last_day)`.
    pub fn resolve(&self, prepared: &PreparedDataset) -> Result<(usize, usize), GridError> {
        if self.end < self.start {
            return Err(GridError::ReversedPeriod {
                start: self.start,
                end: self.end,
            });
        }
        let offset = prepared
            .day_of_date(self.start)
            .ok_or(GridError::BoundaryNotFound(self.start))?;
        let last = prepared
            .day_of_date(self.end)
            .ok_or(GridError::BoundaryNotFound(self.end))?;
        Ok((offset as usize, last as usize))
    }
}

/// Model-level inputs to grid generation.
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub horizon: usize,
    pub training_window: usize,
    pub predictors: Vec<PredictorSpec>,
    pub model_params: Params,
    pub internal_params: Params,
    pub threads_per_task: usize,
}

impl GridSpec {
    pub fn new(horizon: usize, training_window: usize, predictors: Vec<PredictorSpec>) -> Self {
        Self {
            horizon,
            training_window,
            predictors,
            model_params: Params::new(),
            internal_params: Params::new(),
            threads_per_task: 1,
        }
    }
}

/// Eagerly generated list of task contexts.
#[derive(Debug, Clone)]
pub struct TaskGrid {
    contexts: Vec<TaskContext>,
    dataset_offset: usize,
    days: usize,
}

impl TaskGrid {
    /// Grid over every issue day of the test period.
    pub fn generate(
        prepared: &PreparedDataset,
        period: &TestPeriod,
        spec: &GridSpec,
    ) -> Result<Self, GridError> {
        let (offset, last) = period.resolve(prepared)?;
        let grid = Self::over_days(prepared, offset, last - offset + 1, spec)?;
        info!(
            "Generated {} tasks: {} day(s) x {} horizon(s) x {} hours",
            grid.len(),
            grid.days,
            spec.horizon,
            HOURS_PER_DAY
        );
        Ok(grid)
    }

    /// Grid over the `days` issue days held back before the test period.
    ///
    /// The last calibration day is chosen so that every calibration target,
    /// at any horizon, precedes the first test issue day.
    pub fn calibration(
        prepared: &PreparedDataset,
        period: &TestPeriod,
        days: usize,
        spec: &GridSpec,
    ) -> Result<Self, GridError> {
        let (offset, _) = period.resolve(prepared)?;
        let needed = days + spec.horizon;
        if days == 0 || needed > offset {
            return Err(GridError::CalibrationWindow {
                needed,
                available: offset,
            });
        }
        Self::over_days(prepared, offset - needed, days, spec)
    }

    fn over_days(
        prepared: &PreparedDataset,
        offset: usize,
        days: usize,
        spec: &GridSpec,
    ) -> Result<Self, GridError> {
        if spec.horizon == 0 || spec.training_window == 0 {
            return Err(GridError::EmptyWindow);
        }
        if spec.horizon > prepared.horizon() {
            return Err(GridError::HorizonExceedsDataset {
                requested: spec.horizon,
                available: prepared.horizon(),
            });
        }

        let known: HashSet<&str> = prepared
            .dataset()
            .column_names()
            .iter()
            .map(String::as_str)
            .collect();
        let model_params = Arc::new(spec.model_params.clone());
        let internal_params = Arc::new(spec.internal_params.clone());

        let mut contexts = Vec::with_capacity(days * spec.horizon * HOURS_PER_DAY);
        for day in 0..days {
            for horizon in 1..=spec.horizon {
                for hour in 0..HOURS_PER_DAY as u32 {
                    let cell = GridCell { day, horizon, hour };
                    let scope = PredictorScope {
                        hour,
                        horizon,
                        day_in_testing_period: day,
                        dataset_offset: offset,
                        training_window: spec.training_window,
                        target: prepared.target(),
                    };
                    let predictors = resolve_all(&spec.predictors, &scope)?;
                    if predictors.is_empty() {
                        return Err(GridError::NoPredictors(cell));
                    }
                    let target = lead_column(prepared.target(), horizon);
                    if let Some(missing) = std::iter::once(&target)
                        .chain(predictors.iter())
                        .find(|name| !known.contains(name.as_str()))
                    {
                        return Err(GridError::MissingColumn {
                            column: missing.clone(),
                            cell,
                        });
                    }

                    contexts.push(TaskContext {
                        hour,
                        day_in_testing_period: day,
                        dataset_offset: offset,
                        horizon,
                        training_window: spec.training_window,
                        target,
                        predictors,
                        model_params: Arc::clone(&model_params),
                        internal_params: Arc::clone(&internal_params),
                        threads_per_task: spec.threads_per_task,
                    });
                }
            }
        }

        Ok(Self {
            contexts,
            dataset_offset: offset,
            days,
        })
    }

    /// Predictor names for a representative cell (hour 0, horizon 1, day 0).
    pub fn describe(spec: &GridSpec, target: &str) -> Result<Vec<String>, GridError> {
        let scope = PredictorScope {
            hour: 0,
            horizon: 1,
            day_in_testing_period: 0,
            dataset_offset: 0,
            training_window: spec.training_window,
            target,
        };
        resolve_all(&spec.predictors, &scope)
    }

    pub fn contexts(&self) -> &[TaskContext] {
        &self.contexts
    }

    pub fn into_contexts(self) -> Vec<TaskContext> {
        self.contexts
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn dataset_offset(&self) -> usize {
        self.dataset_offset
    }

    /// Number of issue days covered.
    pub fn days(&self) -> usize {
        self.days
    }
}
