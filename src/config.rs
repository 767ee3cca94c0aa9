//! Run configuration.
//!
//! Defaults reproduce the historical loader: two workers per hardware thread,
//! label batches of 100 rows and trajectory batches of 2500 samples.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, LoaderError, Result};

/// Trajectory files with more newlines than this are skipped.
pub const DEFAULT_MAX_TRAJECTORY_LINES: usize = 2506;

/// Fixed header length of a `.plt` file.
pub const DEFAULT_TRAJECTORY_HEADER_LINES: usize = 6;

/// Configuration for a loader run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Root of the dataset tree (contains `Data/` and `labeled_ids.txt`)
    pub dataset_root: PathBuf,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Number of ingestion workers (and capacity of the work queue)
    pub worker_count: usize,
    /// Scratch capacity for activity labels; full buffers are flushed mid-file
    pub activity_batch_capacity: usize,
    /// Scratch capacity for trajectory samples; one flush per file
    pub sample_batch_capacity: usize,
    /// Newline threshold above which a trajectory file is skipped
    pub max_trajectory_lines: usize,
    /// Header lines skipped at the top of each trajectory file
    pub trajectory_header_lines: usize,
    /// SQLite busy timeout, in seconds
    pub busy_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("./dataset"),
            database_path: PathBuf::from("geolife.db"),
            worker_count: default_worker_count(),
            activity_batch_capacity: 100,
            sample_batch_capacity: 2500,
            max_trajectory_lines: DEFAULT_MAX_TRAJECTORY_LINES,
            trajectory_header_lines: DEFAULT_TRAJECTORY_HEADER_LINES,
            busy_timeout_secs: 10,
        }
    }
}

/// Two workers per available hardware thread.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

impl LoaderConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).io_context(path)?;
        let config: LoaderConfig = serde_json::from_str(&text)
            .map_err(|e| LoaderError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(LoaderError::config("worker_count must be at least 1"));
        }
        if self.activity_batch_capacity == 0 || self.sample_batch_capacity == 0 {
            return Err(LoaderError::config("batch capacities must be at least 1"));
        }
        let body_lines = self
            .max_trajectory_lines
            .saturating_sub(self.trajectory_header_lines);
        if self.sample_batch_capacity < body_lines {
            return Err(LoaderError::config(format!(
                "sample_batch_capacity ({}) must hold {} body lines",
                self.sample_batch_capacity, body_lines
            )));
        }
        Ok(())
    }

    /// Builder-style override of the worker count.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Builder-style override of the dataset root.
    pub fn with_dataset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dataset_root = root.into();
        self
    }

    /// Builder-style override of the database path.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_count >= 1);
        assert_eq!(config.sample_batch_capacity, 2500);
        assert_eq!(config.max_trajectory_lines, 2506);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = LoaderConfig::default().with_workers(0);
        assert!(matches!(config.validate(), Err(LoaderError::Config { .. })));
    }

    #[test]
    fn test_sample_capacity_must_cover_body() {
        let config = LoaderConfig {
            sample_batch_capacity: 100,
            ..LoaderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.json");
        fs::write(&path, r#"{ "worker_count": 3, "dataset_root": "/data/geolife" }"#).unwrap();

        let config = LoaderConfig::from_json_file(&path).unwrap();
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.dataset_root, PathBuf::from("/data/geolife"));
        assert_eq!(config.activity_batch_capacity, 100);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.json");
        fs::write(&path, "{ worker_count: ").unwrap();
        assert!(matches!(
            LoaderConfig::from_json_file(&path),
            Err(LoaderError::Config { .. })
        ));
    }
}
