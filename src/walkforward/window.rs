//! Train/test window extraction.
//!
//! For a task at hour `h`, issue day `t = offset + day` and horizon `k`, the
//! filtered rows are those at hour `h` with day ordinal in
//! `[t - window - k, t + 1)`. The last filtered row is the test row; the
//! trailing `1 + k` rows are withheld from training because their `k`-day
//! lead targets are not yet observed at day `t`.

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::data::{DAY_COLUMN, HOURS_PER_DAY, HOUR_COLUMN};
use crate::shared::DatasetView;

use super::grid::TaskContext;

/// Data alignment failures for a single task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    #[error("No rows at hour {hour} for days [{start}, {end})")]
    NoTestRow { hour: u32, start: i64, end: i64 },

    #[error("Empty training slice: {rows} filtered row(s), at least {needed} required")]
    EmptyTrain { rows: usize, needed: usize },

    #[error("Column not found in shared dataset: {0}")]
    MissingColumn(String),

    #[error("Non-finite value in column '{column}' at {timestamp}")]
    NonFinite {
        column: String,
        timestamp: NaiveDateTime,
    },
}

/// Train and test slices for one task.
#[derive(Debug, Clone)]
pub struct Window {
    pub train_x: Array2<f64>,
    pub train_y: Array1<f64>,
    /// Single-row predictor matrix.
    pub test_x: Array2<f64>,
    /// Observed target, `None` when it lies past the end of the data.
    pub test_y: Option<f64>,
    pub test_timestamp: NaiveDateTime,
    pub test_day: i64,
    pub train_days: Vec<i64>,
}

impl Window {
    pub fn train_len(&self) -> usize {
        self.train_x.nrows()
    }

    /// A window with no training rows must never reach a strategy.
    pub fn ensure_trainable(&self, filtered: usize, horizon: usize) -> Result<(), WindowError> {
        if self.train_len() == 0 {
            return Err(WindowError::EmptyTrain {
                rows: filtered,
                needed: 2 + horizon,
            });
        }
        Ok(())
    }
}

/// Rows at the task's hour whose day ordinal lies in the task's window.
pub fn filtered_rows(view: &DatasetView<'_>, ctx: &TaskContext) -> Result<Vec<usize>, WindowError> {
    let hour_col = column(view, HOUR_COLUMN)?;
    let day_col = column(view, DAY_COLUMN)?;

    let start_day = ctx.window_start_day();
    let end_day = ctx.test_day() + 1;

    let first_row = (start_day.max(0) as usize).saturating_mul(HOURS_PER_DAY);
    let last_row = ((end_day.max(0) as usize).saturating_mul(HOURS_PER_DAY)).min(view.nrows());
    if first_row >= last_row {
        return Ok(Vec::new());
    }

    let hour = ctx.hour as f64;
    Ok((first_row..last_row)
        .filter(|&row| {
            let day = view.value(row, day_col) as i64;
            view.value(row, hour_col) == hour && day >= start_day && day < end_day
        })
        .collect())
}

/// Slice the task's train and test rows out of the shared view.
///
/// The training slice may come back empty; callers check it with
/// [`Window::ensure_trainable`].
pub fn extract(view: &DatasetView<'_>, ctx: &TaskContext) -> Result<(Window, usize), WindowError> {
    let rows = filtered_rows(view, ctx)?;
    let (&test_row, _) = rows.split_last().ok_or(WindowError::NoTestRow {
        hour: ctx.hour,
        start: ctx.window_start_day(),
        end: ctx.test_day() + 1,
    })?;
    let train_rows = &rows[..rows.len().saturating_sub(1 + ctx.horizon)];

    let predictor_cols = ctx
        .predictors
        .iter()
        .map(|p| column(view, p))
        .collect::<Result<Vec<_>, _>>()?;
    let target_col = column(view, &ctx.target)?;
    let day_col = column(view, DAY_COLUMN)?;

    let train_x = Array2::from_shape_fn((train_rows.len(), predictor_cols.len()), |(i, j)| {
        view.value(train_rows[i], predictor_cols[j])
    });
    let train_y = Array1::from_iter(train_rows.iter().map(|&r| view.value(r, target_col)));
    let test_x = Array2::from_shape_fn((1, predictor_cols.len()), |(_, j)| {
        view.value(test_row, predictor_cols[j])
    });

    for (i, &row) in train_rows.iter().enumerate() {
        for (j, predictor) in ctx.predictors.iter().enumerate() {
            check_finite(view, row, predictor, train_x[[i, j]])?;
        }
        check_finite(view, row, &ctx.target, train_y[i])?;
    }
    for (j, predictor) in ctx.predictors.iter().enumerate() {
        check_finite(view, test_row, predictor, test_x[[0, j]])?;
    }

    let actual = view.value(test_row, target_col);
    let window = Window {
        train_x,
        train_y,
        test_x,
        test_y: actual.is_finite().then_some(actual),
        test_timestamp: view.timestamp(test_row),
        test_day: view.value(test_row, day_col) as i64,
        train_days: train_rows
            .iter()
            .map(|&r| view.value(r, day_col) as i64)
            .collect(),
    };
    Ok((window, rows.len()))
}

fn column(view: &DatasetView<'_>, name: &str) -> Result<usize, WindowError> {
    view.position(name)
        .ok_or_else(|| WindowError::MissingColumn(name.to_string()))
}

fn check_finite(view: &DatasetView<'_>, row: usize, column: &str, value: f64) -> Result<(), WindowError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(WindowError::NonFinite {
            column: column.to_string(),
            timestamp: view.timestamp(row),
        })
    }
}
