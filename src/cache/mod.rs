//! File-backed result cache.
//!
//! A model run with a cache path stores its full, sorted result list as a
//! JSON array. A later run that finds the artifact returns it unchanged and
//! skips the pipeline entirely.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::walkforward::result::{sort_results, ForecastResult};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to read cache artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt cache artifact {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write cache artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Location and policy of one model's cache artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCache {
    path: PathBuf,
    corrupt_as_miss: bool,
}

impl ResultCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            corrupt_as_miss: false,
        }
    }

    /// Treat an unreadable or corrupt artifact as a miss instead of an error.
    pub fn with_corrupt_as_miss(mut self, corrupt_as_miss: bool) -> Self {
        self.corrupt_as_miss = corrupt_as_miss;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Cached results, or `None` on a miss.
    pub fn load(&self) -> Result<Option<Vec<ForecastResult>>, CacheError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let loaded = fs::read_to_string(&self.path)
            .map_err(|source| CacheError::Read {
                path: self.path.clone(),
                source,
            })
            .and_then(|content| {
                serde_json::from_str::<Vec<ForecastResult>>(&content).map_err(|source| {
                    CacheError::Corrupt {
                        path: self.path.clone(),
                        source,
                    }
                })
            });

        match loaded {
            Ok(results) => {
                info!("Loaded {} cached results from {}", results.len(), self.path.display());
                Ok(Some(results))
            }
            Err(e) if self.corrupt_as_miss => {
                warn!("Ignoring unusable cache artifact: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the full result list, sorted, replacing any existing artifact.
    ///
    /// The list is written to a sibling temporary file first and renamed into
    /// place, so readers never observe a partial artifact.
    pub fn store(&self, results: &[ForecastResult]) -> Result<(), CacheError> {
        let mut sorted = results.to_vec();
        sort_results(&mut sorted);
        let content = serde_json::to_string_pretty(&sorted)?;

        let write_err = |source: io::Error| CacheError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, content).map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }

        info!("Cached {} results to {}", sorted.len(), self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}
