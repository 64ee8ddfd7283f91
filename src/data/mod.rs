pub mod loader;
pub mod prepare;
pub mod types;

pub use loader::{DataLoader, LoaderError};
pub use prepare::{
    day_of_row, lag_column, lead_column, DatasetPreparer, PrepareError, PreparedDataset,
    DAY_COLUMN, HOURS_PER_DAY, HOUR_COLUMN, ONES_COLUMN,
};
pub use types::{Dataset, DatasetError};
