//! Dataset preparation.
//!
//! Derives the columns every walk-forward run relies on:
//! - `{target}_d+{h}` lead columns for h = 1..=horizon (target 24·h rows later)
//! - `hour`: hour of day of the row timestamp
//! - `day`: day ordinal, `row / 24` with a zero-based row sequence
//!
//! Rows before the first midnight are dropped so that every ordinal covers
//! exactly one calendar day.
//! - `ones`: constant column usable as an explicit intercept predictor
//! - optional `{column}_d-{k}` day lags

use chrono::{NaiveDate, NaiveTime, Timelike};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{Dataset, DatasetError};

pub const HOUR_COLUMN: &str = "hour";
pub const DAY_COLUMN: &str = "day";
pub const ONES_COLUMN: &str = "ones";
pub const HOURS_PER_DAY: usize = 24;

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Horizon must be at least 1")]
    InvalidHorizon,

    #[error("No row starts a calendar day at 00:00")]
    NoMidnight,
}

/// Name of the lead column holding the target `horizon` days ahead.
pub fn lead_column(target: &str, horizon: usize) -> String {
    format!("{}_d+{}", target, horizon)
}

/// Name of the column holding `column` lagged by `lag` days.
pub fn lag_column(column: &str, lag: usize) -> String {
    format!("{}_d-{}", column, lag)
}

/// Day ordinal of a zero-based row position.
pub fn day_of_row(row: usize) -> i64 {
    (row / HOURS_PER_DAY) as i64
}

/// Dataset with derived walk-forward columns.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    dataset: Dataset,
    target: String,
    horizon: usize,
}

impl PreparedDataset {
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Base target column name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Largest horizon a lead column exists for.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Day ordinal of the first row on `date`.
    pub fn day_of_date(&self, date: NaiveDate) -> Option<i64> {
        self.dataset.first_row_on(date).map(day_of_row)
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }
}

/// Builds a [`PreparedDataset`] from a raw hourly table.
#[derive(Debug, Clone)]
pub struct DatasetPreparer {
    target: String,
    horizon: usize,
    day_lags: Vec<(String, Vec<usize>)>,
}

impl DatasetPreparer {
    pub fn new(target: &str, horizon: usize) -> Self {
        Self {
            target: target.to_string(),
            horizon,
            day_lags: Vec::new(),
        }
    }

    /// Also derive `{column}_d-{k}` for each lag `k`.
    pub fn with_day_lags(mut self, column: &str, lags: &[usize]) -> Self {
        self.day_lags.push((column.to_string(), lags.to_vec()));
        self
    }

    pub fn prepare(&self, data: Dataset) -> Result<PreparedDataset, PrepareError> {
        if self.horizon == 0 {
            return Err(PrepareError::InvalidHorizon);
        }
        data.validate_hourly()?;
        let data = trim_partial_day(data)?;

        let target = data
            .column(&self.target)
            .ok_or_else(|| PrepareError::MissingColumn(self.target.clone()))?
            .to_vec();

        let mut lagged = Vec::new();
        for (column, lags) in &self.day_lags {
            let values = data
                .column(column)
                .ok_or_else(|| PrepareError::MissingColumn(column.clone()))?;
            for &lag in lags {
                lagged.push((lag_column(column, lag), shift(values, lag as isize)));
            }
        }

        let n = data.nrows();
        let hours: Vec<f64> = data.index().iter().map(|ts| ts.hour() as f64).collect();
        let days: Vec<f64> = (0..n).map(|row| day_of_row(row) as f64).collect();

        let mut data = data;
        for h in 1..=self.horizon {
            data.insert_column(&lead_column(&self.target, h), shift(&target, -(h as isize)))?;
        }
        for (name, values) in lagged {
            data.insert_column(&name, values)?;
        }
        data.insert_column(HOUR_COLUMN, hours)?;
        data.insert_column(ONES_COLUMN, vec![1.0; n])?;
        data.insert_column(DAY_COLUMN, days)?;

        debug!(
            rows = n,
            columns = data.ncols(),
            horizon = self.horizon,
            "Prepared dataset"
        );

        Ok(PreparedDataset {
            dataset: data,
            target: self.target.clone(),
            horizon: self.horizon,
        })
    }
}

/// Drop leading rows up to the first midnight.
fn trim_partial_day(data: Dataset) -> Result<Dataset, PrepareError> {
    let first = data
        .index()
        .iter()
        .position(|ts| ts.time() == NaiveTime::MIN)
        .ok_or(PrepareError::NoMidnight)?;
    if first > 0 {
        warn!(
            "Dropping {} row(s) before the first midnight at {}",
            first,
            data.index()[first]
        );
    }
    Ok(data.skip_rows(first))
}

/// Shift by whole days: positive `days` looks back, negative looks ahead.
/// Positions with no source row become `NaN`.
fn shift(values: &[f64], days: isize) -> Vec<f64> {
    let offset = days * HOURS_PER_DAY as isize;
    (0..values.len() as isize)
        .map(|row| {
            let source = row - offset;
            if source >= 0 && (source as usize) < values.len() {
                values[source as usize]
            } else {
                f64::NAN
            }
        })
        .collect()
}
