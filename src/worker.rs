//! Per-user ingestion.
//!
//! A [`Worker`] owns one scratch buffer per record kind, plus the chunk used
//! by the trajectory line-count pre-scan, and reuses them for every user it
//! is handed. For one user it:
//!
//! 1. loads `labels.txt` (labeled users only), flushing whenever the activity
//!    buffer fills
//! 2. fetches the user's persisted activities once, sorted by start
//! 3. walks the trajectory files in name order, matching each sample against
//!    the activities with a fresh cursor per file and flushing once per file

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchWriter, ScratchBuffer};
use crate::config::LoaderConfig;
use crate::dataset::DatasetLayout;
use crate::error::Result;
use crate::parser::{self, FileOutcome, TrajectoryFormat};
use crate::store::TrajectoryStore;
use crate::{ActivityLabel, LocationSample, User};

/// Counters accumulated by one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub users: usize,
    pub activities: usize,
    pub samples: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
}

impl WorkerStats {
    /// Add another worker's counters into this one.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.users += other.users;
        self.activities += other.activities;
        self.samples += other.samples;
        self.files_loaded += other.files_loaded;
        self.files_skipped += other.files_skipped;
    }
}

/// Processes whole users against a shared store.
pub struct Worker<'s, S: ?Sized> {
    id: usize,
    store: &'s S,
    layout: DatasetLayout,
    format: TrajectoryFormat,
    cancel: &'s AtomicBool,
    activity_buffer: ScratchBuffer<ActivityLabel>,
    sample_buffer: ScratchBuffer<LocationSample>,
    prescan: Vec<u8>,
    activity_writer: BatchWriter<'s, S>,
    sample_writer: BatchWriter<'s, S>,
    stats: WorkerStats,
}

impl<'s, S: TrajectoryStore + ?Sized> Worker<'s, S> {
    pub fn new(id: usize, store: &'s S, config: &LoaderConfig, cancel: &'s AtomicBool) -> Self {
        Self {
            id,
            store,
            layout: DatasetLayout::new(&config.dataset_root),
            format: TrajectoryFormat::from_config(config),
            cancel,
            activity_buffer: ScratchBuffer::with_capacity(config.activity_batch_capacity),
            sample_buffer: ScratchBuffer::with_capacity(config.sample_batch_capacity),
            prescan: parser::prescan_chunk(),
            activity_writer: BatchWriter::new(store),
            sample_writer: BatchWriter::new(store),
            stats: WorkerStats::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Whether the run this worker belongs to has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Ingest every file belonging to `user`.
    ///
    /// Stops between files once the cancellation flag is raised; the user is
    /// then not counted as processed.
    pub fn process_user(&mut self, user: &User) -> Result<()> {
        if user.has_labels {
            let path = self.layout.labels_path(&user.id);
            let count = parser::load_activities(
                &path,
                &user.id,
                &mut self.activity_buffer,
                &mut self.activity_writer,
            )?;
            self.stats.activities += count;
        }

        let intervals = self.store.activities_for_user(&user.id)?;
        let files = self.layout.trajectory_files(&user.id)?;

        for name in &files {
            if self.is_cancelled() {
                debug!("[Worker {}] Cancelled during user {}", self.id, user.id);
                return Ok(());
            }

            let path = self.layout.trajectory_path(&user.id, name);
            let outcome = parser::load_trajectory(
                &path,
                &user.id,
                &intervals,
                self.format,
                &mut self.prescan,
                &mut self.sample_buffer,
                &mut self.sample_writer,
            )?;

            match outcome {
                FileOutcome::Loaded(count) => {
                    self.stats.files_loaded += 1;
                    self.stats.samples += count;
                }
                FileOutcome::Skipped => {
                    self.stats.files_skipped += 1;
                    debug!(
                        "[Worker {}] Skipped oversized file {}",
                        self.id,
                        path.display()
                    );
                }
            }
        }

        self.stats.users += 1;
        debug!(
            "[Worker {}] User {} done: {} activities, {} files",
            self.id,
            user.id,
            intervals.len(),
            files.len()
        );
        Ok(())
    }

    /// Consume the worker, returning its counters.
    pub fn into_stats(self) -> WorkerStats {
        debug!(
            "[Worker {}] Wrote {} activity batches, {} sample batches",
            self.id,
            self.activity_writer.batches_written(),
            self.sample_writer.batches_written()
        );
        self.stats
    }
}
