//! Unified error handling for the loader.
//!
//! Every failure in the ingestion pipeline is fatal to the run. The coordinator
//! keeps the first error it sees and hands it back to the caller. Oversized
//! trajectory files are not errors; see [`crate::parser::FileOutcome`].

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Unified error type for loader operations.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Users or per-user files could not be listed
    #[error("Discovery failed for '{}': {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A single data file could not be opened or read
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed line or field in a label or trajectory file
    #[error("Parse error in '{}' line {line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Bulk write, query or transaction failure
    #[error("Persistence error during {operation}: {source}")]
    Persist {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Schema migration failure
    #[error("Schema migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A report could not be rendered for output
    #[error("Failed to render output: {source}")]
    Output {
        #[source]
        source: serde_json::Error,
    },

    /// A worker thread could not be started
    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },

    /// A worker thread terminated without reporting back
    #[error("Worker {worker} terminated unexpectedly")]
    WorkerPanicked { worker: usize },
}

impl LoaderError {
    pub(crate) fn parse(path: &Path, line: usize, message: impl Into<String>) -> Self {
        LoaderError::Parse {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        LoaderError::Config {
            message: message.into(),
        }
    }

    /// Short, stable name of the error class (used in logs and summaries).
    pub fn kind(&self) -> &'static str {
        match self {
            LoaderError::Discovery { .. } => "discovery",
            LoaderError::Io { .. } => "io",
            LoaderError::Parse { .. } => "parse",
            LoaderError::Persist { .. } => "persist",
            LoaderError::Migration(_) => "migration",
            LoaderError::Config { .. } => "config",
            LoaderError::Output { .. } => "output",
            LoaderError::Spawn { .. } => "spawn",
            LoaderError::WorkerPanicked { .. } => "worker",
        }
    }
}

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Extension trait for attaching a path to `std::io` failures.
pub trait IoResultExt<T> {
    /// Treat the failure as a discovery error (listing users or files).
    fn discovery_context(self, path: &Path) -> Result<T>;

    /// Treat the failure as an error reading one data file.
    fn io_context(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn discovery_context(self, path: &Path) -> Result<T> {
        self.map_err(|source| LoaderError::Discovery {
            path: path.to_path_buf(),
            source,
        })
    }

    fn io_context(self, path: &Path) -> Result<T> {
        self.map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Extension trait for tagging `rusqlite` failures with the operation that failed.
pub trait SqlResultExt<T> {
    fn persist_context(self, operation: &'static str) -> Result<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn persist_context(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| LoaderError::Persist { operation, source })
    }
}
