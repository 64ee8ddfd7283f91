//! Core tabular type for hourly forecasting data.
//!
//! A `Dataset` is a timestamp-indexed table of `f64` columns, stored column
//! by column. Missing observations are `NaN`.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DatasetError {
    #[error("Column '{column}' has {got} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Timestamps are not strictly hourly at row {row}: {previous} -> {current}")]
    NotHourly {
        row: usize,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("Dataset has no rows")]
    Empty,
}

/// Timestamp-indexed numeric table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    index: Vec<NaiveDateTime>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl Dataset {
    /// Create an empty table over the given timestamps.
    pub fn new(index: Vec<NaiveDateTime>) -> Self {
        Self {
            index,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Builder form of [`Dataset::insert_column`].
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self, DatasetError> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    /// Append a column. Names must be unique and lengths must match the index.
    pub fn insert_column(&mut self, name: &str, values: Vec<f64>) -> Result<(), DatasetError> {
        if values.len() != self.index.len() {
            return Err(DatasetError::LengthMismatch {
                column: name.to_string(),
                expected: self.index.len(),
                got: values.len(),
            });
        }
        if self.columns.iter().any(|c| c == name) {
            return Err(DatasetError::DuplicateColumn(name.to_string()));
        }
        self.columns.push(name.to_string());
        self.values.push(values);
        Ok(())
    }

    pub fn nrows(&self) -> usize {
        self.index.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.position(name).map(|i| self.values[i].as_slice())
    }

    /// Column values by position.
    pub fn column_at(&self, position: usize) -> &[f64] {
        &self.values[position]
    }

    /// Check that the index is non-empty and advances by exactly one hour per row.
    pub fn validate_hourly(&self) -> Result<(), DatasetError> {
        if self.index.is_empty() {
            return Err(DatasetError::Empty);
        }
        for (row, pair) in self.index.windows(2).enumerate() {
            if pair[1] - pair[0] != Duration::hours(1) {
                return Err(DatasetError::NotHourly {
                    row: row + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(())
    }

    /// Drop the first `rows` rows from the index and every column.
    pub fn skip_rows(mut self, rows: usize) -> Self {
        let rows = rows.min(self.index.len());
        self.index.drain(..rows);
        for values in &mut self.values {
            values.drain(..rows);
        }
        self
    }

    /// First row whose timestamp falls on `date`.
    pub fn first_row_on(&self, date: NaiveDate) -> Option<usize> {
        // The index is sorted, so a binary search on the date prefix works.
        let row = self.index.partition_point(|ts| ts.date() < date);
        (row < self.index.len() && self.index[row].date() == date).then_some(row)
    }
}
