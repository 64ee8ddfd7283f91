//! Publish-once numeric region shared by every worker.
//!
//! `SharedDataset` is the ownership token: it alone writes the region (while
//! copying the dataset in) and it alone releases it. Workers receive a
//! [`DatasetHandle`] by value and attach it to obtain a read-only
//! [`DatasetView`]; the view detaches itself when dropped.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use ndarray::{ArrayView1, ArrayView2, ShapeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::Dataset;

static NEXT_REGION: AtomicUsize = AtomicUsize::new(0);

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Cannot publish an empty dataset")]
    Empty,

    #[error("Region '{name}' released with {attached} view(s) still attached")]
    StillAttached { name: String, attached: usize },

    #[error("Region shape error: {0}")]
    Shape(#[from] ShapeError),
}

/// Element type stored in a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F64,
}

impl ElementType {
    pub fn size(&self) -> usize {
        match self {
            Self::F64 => std::mem::size_of::<f64>(),
        }
    }
}

/// Lightweight descriptor of a published region.
///
/// Cloning copies the descriptor only; the numeric payload is shared.
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    name: Arc<str>,
    shape: (usize, usize),
    dtype: ElementType,
    index: Arc<[NaiveDateTime]>,
    columns: Arc<[String]>,
    buffer: Arc<[f64]>,
    attached: Arc<AtomicUsize>,
}

impl DatasetHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Reconstruct a read-only view over the region.
    ///
    /// Fails only when the descriptor's shape disagrees with the buffer
    /// length, which a handle obtained from [`SharedDataset::handle`] never does.
    pub fn attach(&self) -> Result<DatasetView<'_>, SharedError> {
        let matrix = ArrayView2::from_shape(self.shape, &self.buffer[..])?;
        self.attached.fetch_add(1, Ordering::AcqRel);
        Ok(DatasetView {
            handle: self,
            matrix,
        })
    }
}

/// Worker-local read-only view. Detaches on drop.
pub struct DatasetView<'a> {
    handle: &'a DatasetHandle,
    matrix: ArrayView2<'a, f64>,
}

impl<'a> DatasetView<'a> {
    pub fn nrows(&self) -> usize {
        self.handle.shape.0
    }

    pub fn ncols(&self) -> usize {
        self.handle.shape.1
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.handle.columns.iter().position(|c| c == column)
    }

    pub fn timestamp(&self, row: usize) -> NaiveDateTime {
        self.handle.index[row]
    }

    pub fn value(&self, row: usize, column: usize) -> f64 {
        self.matrix[[row, column]]
    }

    pub fn column(&self, column: usize) -> ArrayView1<'_, f64> {
        self.matrix.column(column)
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }
}

impl Drop for DatasetView<'_> {
    fn drop(&mut self) {
        self.handle.attached.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Ownership token for a published dataset region.
pub struct SharedDataset {
    handle: DatasetHandle,
    released: bool,
}

impl SharedDataset {
    /// Copy the dataset once, row-major, into a new region and publish it.
    pub fn publish(dataset: &Dataset) -> Result<Self, SharedError> {
        let (rows, cols) = (dataset.nrows(), dataset.ncols());
        if rows == 0 || cols == 0 {
            return Err(SharedError::Empty);
        }

        let mut buffer = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                buffer.push(dataset.column_at(col)[row]);
            }
        }

        let name = format!(
            "forecast-backtest-{}-{}",
            process::id(),
            NEXT_REGION.fetch_add(1, Ordering::Relaxed)
        );
        let dtype = ElementType::F64;
        debug!(
            region = %name,
            rows,
            cols,
            bytes = rows * cols * dtype.size(),
            "Published dataset region"
        );

        Ok(Self {
            handle: DatasetHandle {
                name: name.into(),
                shape: (rows, cols),
                dtype,
                index: dataset.index().into(),
                columns: dataset.column_names().into(),
                buffer: buffer.into(),
                attached: Arc::new(AtomicUsize::new(0)),
            },
            released: false,
        })
    }

    /// Descriptor to hand to a worker.
    pub fn handle(&self) -> DatasetHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Size of the numeric payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.handle.shape.0 * self.handle.shape.1 * self.handle.dtype.size()
    }

    /// Number of worker views currently attached.
    pub fn attached_views(&self) -> usize {
        self.handle.attached.load(Ordering::Acquire)
    }

    /// Release the region. Fails if any worker view is still attached.
    pub fn release(mut self) -> Result<(), SharedError> {
        self.released = true;
        let attached = self.attached_views();
        if attached > 0 {
            return Err(SharedError::StillAttached {
                name: self.handle.name().to_string(),
                attached,
            });
        }
        debug!(region = %self.handle.name(), "Released dataset region");
        Ok(())
    }
}

impl Drop for SharedDataset {
    fn drop(&mut self) {
        if !self.released {
            warn!(region = %self.handle.name(), "Dataset region released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn small_dataset() -> Dataset {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let index = (0..3).map(|i| start + Duration::hours(i)).collect();
        Dataset::new(index)
            .with_column("a", vec![1.0, 2.0, 3.0])
            .unwrap()
            .with_column("b", vec![10.0, 20.0, 30.0])
            .unwrap()
    }

    #[test]
    fn test_publish_row_major_layout() {
        let shared = SharedDataset::publish(&small_dataset()).unwrap();
        assert_eq!(shared.byte_len(), 3 * 2 * 8);

        let handle = shared.handle();
        assert_eq!(handle.shape(), (3, 2));
        assert_eq!(handle.dtype(), ElementType::F64);
        assert_eq!(handle.columns(), &["a".to_string(), "b".to_string()]);

        let view = handle.attach().unwrap();
        assert_eq!(view.value(1, 1), 20.0);
        assert_eq!(view.column(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(view.position("b"), Some(1));
        drop(view);

        shared.release().unwrap();
    }

    #[test]
    fn test_handles_share_payload() {
        let shared = SharedDataset::publish(&small_dataset()).unwrap();
        let a = shared.handle();
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.buffer, &b.buffer));
        assert_eq!(a.name(), shared.name());
    }

    #[test]
    fn test_views_detach_on_drop() {
        let shared = SharedDataset::publish(&small_dataset()).unwrap();
        let handle = shared.handle();
        {
            let _v1 = handle.attach().unwrap();
            let _v2 = handle.attach().unwrap();
            assert_eq!(shared.attached_views(), 2);
        }
        assert_eq!(shared.attached_views(), 0);
        assert!(shared.release().is_ok());
    }

    #[test]
    fn test_attach_rejects_mismatched_shape() {
        let shared = SharedDataset::publish(&small_dataset()).unwrap();
        let mut handle = shared.handle();
        assert!(handle.attach().is_ok());

        handle.shape = (4, 2);
        assert!(matches!(handle.attach(), Err(SharedError::Shape(_))));
        assert_eq!(shared.attached_views(), 0);
        shared.release().unwrap();
    }

    #[test]
    fn test_release_with_attached_view_fails() {
        let shared = SharedDataset::publish(&small_dataset()).unwrap();
        let handle = shared.handle();
        let view = handle.attach().unwrap();
        let err = shared.release().unwrap_err();
        assert!(matches!(err, SharedError::StillAttached { attached: 1, .. }));
        drop(view);
    }

    #[test]
    fn test_region_names_are_unique() {
        let a = SharedDataset::publish(&small_dataset()).unwrap();
        let b = SharedDataset::publish(&small_dataset()).unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_empty_dataset_rejected() {
        assert!(matches!(
            SharedDataset::publish(&Dataset::new(vec![])),
            Err(SharedError::Empty)
        ));
    }
}
