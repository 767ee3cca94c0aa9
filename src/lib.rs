//! # GeoLife Loader
//!
//! Concurrent ingestion of the GeoLife trajectory dataset into SQLite, plus the
//! fixed battery of analytical reports run over the loaded data.
//!
//! This library provides:
//! - Discovery of per-user directories and trajectory files
//! - Parsing of activity-label files and `.plt` trajectory files
//! - Lock-step matching of location samples against labeled activity intervals
//! - Batched, transactional bulk writes through a [`TrajectoryStore`]
//! - A fixed-size worker pool fed by a bounded queue ([`pipeline::run`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use geolife_loader::{pipeline, LoaderConfig, SqliteStore};
//!
//! let config = LoaderConfig::default();
//! let store = SqliteStore::open(&config.database_path, &config).unwrap();
//! let summary = pipeline::run(&config, &store, None).unwrap();
//! println!("{} samples in {:?}", summary.samples, summary.elapsed());
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{IoResultExt, LoaderError, Result, SqlResultExt};

// Run configuration
pub mod config;
pub use config::LoaderConfig;

// Geographic utilities (haversine distance, track length)
pub mod geo_utils;

// Filesystem layout and user discovery
pub mod dataset;
pub use dataset::DatasetLayout;

// Label and trajectory file parsing
pub mod parser;
pub use parser::FileOutcome;

// Sample-to-activity interval matching
pub mod matcher;
pub use matcher::{match_interval, IntervalCursor};

// Scratch buffers and bulk flushing
pub mod batch;
pub use batch::{BatchSink, BatchWriter, ScratchBuffer};

// Storage seam and SQLite implementation
pub mod migrations;
pub mod store;
pub use store::{SqliteStore, TrajectoryStore};

// Per-user ingestion worker
pub mod worker;
pub use worker::{Worker, WorkerStats};

// Pipeline coordinator (fan-out / fan-in)
pub mod pipeline;
pub use pipeline::{LoadSummary, ProgressCallback};

// Analytical reports
pub mod reports;

// ============================================================================
// Core Types
// ============================================================================

/// Sentinel used by the trajectory files for "altitude unknown".
pub const UNKNOWN_ALTITUDE: i32 = -777;

/// A dataset user, discovered from the directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Directory name under `Data/`, e.g. `"000"`
    pub id: String,
    /// Whether `labels.txt` is expected for this user
    pub has_labels: bool,
}

impl User {
    pub fn new(id: impl Into<String>, has_labels: bool) -> Self {
        Self {
            id: id.into(),
            has_labels,
        }
    }
}

/// One parsed row of a `labels.txt` file, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLabel {
    pub user_id: String,
    pub transportation_mode: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// A persisted activity interval. The store assigns `id` on insert.
///
/// The interval is half-open: a timestamp `t` belongs to it when
/// `start <= t < end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInterval {
    pub id: i64,
    pub user_id: String,
    pub transportation_mode: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ActivityInterval {
    /// Check if the timestamp falls inside `[start, end)`.
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// A GPS coordinate with latitude and longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One trajectory sample, tagged with its containing activity if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub user_id: String,
    /// Id of the activity interval containing `timestamp`
    pub activity_id: Option<i64>,
    pub point: GpsPoint,
    /// Altitude in feet, `None` when the source recorded -777
    pub altitude: Option<i32>,
    /// Fractional days since 1899-12-30
    pub date_days: f64,
    pub timestamp: NaiveDateTime,
}
