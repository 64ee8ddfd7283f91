//! Shared dataset distribution.
//!
//! The prepared dataset is copied once into a region that every worker reads
//! through its own handle. Nothing writes to the region after publication.

pub mod region;

pub use region::{DatasetHandle, DatasetView, ElementType, SharedDataset, SharedError};
