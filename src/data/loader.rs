//! Data loader for merged hourly tables.
//!
//! Reads a CSV or Parquet file with polars and converts it into a numeric
//! [`Dataset`]. The table must carry one timestamp column; every other
//! numeric or boolean column is kept as `f64`, anything else is dropped.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use super::types::{Dataset, DatasetError};

/// Accepted textual timestamp layouts.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Loader for hourly tables stored on local disk.
pub struct DataLoader {
    timestamp_column: String,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new("timestamp")
    }
}

impl DataLoader {
    pub fn new(timestamp_column: &str) -> Self {
        Self {
            timestamp_column: timestamp_column.to_string(),
        }
    }

    /// Scan a `.csv` or `.parquet` file.
    pub fn load_lazy(&self, path: &Path) -> Result<LazyFrame, LoaderError> {
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let lf = match extension.as_str() {
            "csv" => LazyCsvReader::new(path).with_has_header(true).finish()?,
            "parquet" => LazyFrame::scan_parquet(path, ScanArgsParquet::default())?,
            other => return Err(LoaderError::UnsupportedFormat(other.to_string())),
        };
        Ok(lf)
    }

    /// Load a file into a [`Dataset`].
    pub fn load(&self, path: &Path) -> Result<Dataset, LoaderError> {
        let df = self.load_lazy(path)?.collect()?;
        let dataset = dataframe_to_dataset(&df, &self.timestamp_column)?;
        info!(
            "Loaded {} rows x {} columns from {}",
            dataset.nrows(),
            dataset.ncols(),
            path.display()
        );
        Ok(dataset)
    }
}

/// Convert a DataFrame with a timestamp column into a [`Dataset`].
pub fn dataframe_to_dataset(df: &DataFrame, timestamp_column: &str) -> Result<Dataset, LoaderError> {
    let ts = df.column(timestamp_column)?;
    let index = parse_timestamps(ts)?;
    let mut dataset = Dataset::new(index);

    for column in df.get_columns() {
        let name = column.name().to_string();
        if name == timestamp_column {
            continue;
        }
        if !is_numeric(column.dtype()) {
            warn!("Dropping non-numeric column '{}' ({})", name, column.dtype());
            continue;
        }
        let casted = column.cast(&DataType::Float64)?;
        let values: Vec<f64> = casted
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        dataset.insert_column(&name, values)?;
    }

    Ok(dataset)
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn parse_timestamps(column: &Column) -> Result<Vec<NaiveDateTime>, LoaderError> {
    match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                let text = value.ok_or_else(|| {
                    LoaderError::InvalidData(format!("Missing timestamp at row {}", row))
                })?;
                parse_timestamp(text).ok_or_else(|| {
                    LoaderError::InvalidData(format!("Unparseable timestamp '{}' at row {}", text, row))
                })
            })
            .collect(),
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let raw = column.cast(&DataType::Int64)?;
            raw.i64()?
                .into_iter()
                .enumerate()
                .map(|(row, value)| {
                    value
                        .and_then(|v| datetime_from_epoch(v, unit))
                        .ok_or_else(|| {
                            LoaderError::InvalidData(format!("Invalid timestamp at row {}", row))
                        })
                })
                .collect()
        }
        other => Err(LoaderError::InvalidData(format!(
            "Timestamp column has unexpected type {}",
            other
        ))),
    }
}

/// Parse a timestamp in any of [`TIMESTAMP_FORMATS`].
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text.trim(), fmt).ok())
}

fn datetime_from_epoch(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value)?,
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value)?,
        TimeUnit::Nanoseconds => DateTime::from_timestamp_nanos(value),
    };
    Some(dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-05-01 13:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T13:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 13:00"), Some(expected));
        assert_eq!(parse_timestamp("May 1st"), None);
    }

    #[test]
    fn test_load_csv_drops_text_columns() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,load,is_holiday,zone").unwrap();
        writeln!(file, "2024-01-01 00:00:00,100.5,0,PL").unwrap();
        writeln!(file, "2024-01-01 01:00:00,101.5,1,PL").unwrap();
        writeln!(file, "2024-01-01 02:00:00,,0,PL").unwrap();
        file.flush().unwrap();

        let dataset = DataLoader::default().load(file.path()).unwrap();
        assert_eq!(dataset.nrows(), 3);
        assert_eq!(dataset.column_names(), &["load".to_string(), "is_holiday".to_string()]);
        let load = dataset.column("load").unwrap();
        assert_eq!(load[0], 100.5);
        assert!(load[2].is_nan());
        assert_eq!(dataset.column("is_holiday").unwrap(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_file_and_unknown_extension() {
        let loader = DataLoader::default();
        assert!(matches!(
            loader.load(Path::new("/nonexistent/data.csv")),
            Err(LoaderError::FileNotFound(_))
        ));

        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        assert!(matches!(
            loader.load(file.path()),
            Err(LoaderError::UnsupportedFormat(ext)) if ext == "xlsx"
        ));
    }
}
