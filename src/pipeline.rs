//! Pipeline coordinator.
//!
//! Fans users out to a fixed pool of workers over a bounded queue and fans
//! their results back in:
//!
//! ```text
//!  discover users ──► insert users ──► queue (capacity = workers)
//!                                        │
//!                      ┌─────────────────┼─────────────────┐
//!                      ▼                 ▼                 ▼
//!                  Worker 0          Worker 1   ...    Worker N-1
//!                      │                 │                 │
//!                      └──────── join (completion barrier) ┘
//! ```
//!
//! The first worker error raises a shared cancellation flag. The coordinator
//! stops enqueueing, workers drain the queue without processing it, and the
//! error is returned once every worker has finished.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::LoaderConfig;
use crate::dataset::DatasetLayout;
use crate::error::{LoaderError, Result};
use crate::store::TrajectoryStore;
use crate::worker::{Worker, WorkerStats};
use crate::User;

/// Called with `(completed_users, total_users)` after each user finishes.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Totals for a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSummary {
    pub workers: usize,
    pub users_discovered: usize,
    pub users: usize,
    pub activities: usize,
    pub samples: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub elapsed_ms: u64,
}

impl LoadSummary {
    fn new(workers: usize, users_discovered: usize, stats: WorkerStats, elapsed: Duration) -> Self {
        Self {
            workers,
            users_discovered,
            users: stats.users,
            activities: stats.activities,
            samples: stats.samples,
            files_loaded: stats.files_loaded,
            files_skipped: stats.files_skipped,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Load the whole dataset named by `config` into `store`.
pub fn run<S: TrajectoryStore + ?Sized>(
    config: &LoaderConfig,
    store: &S,
    progress: Option<ProgressCallback>,
) -> Result<LoadSummary> {
    config.validate()?;
    let started = Instant::now();

    let layout = DatasetLayout::new(&config.dataset_root);
    let users = layout.discover_users()?;
    store.insert_users(&users)?;

    info!(
        "[Pipeline] Loading {} users from {} with {} workers",
        users.len(),
        layout.root().display(),
        config.worker_count
    );

    let stats = dispatch(config, store, &users, progress.as_ref())?;
    let summary = LoadSummary::new(config.worker_count, users.len(), stats, started.elapsed());

    info!(
        "[Pipeline] Loaded {} users, {} activities, {} samples ({} files, {} skipped) in {:?}",
        summary.users,
        summary.activities,
        summary.samples,
        summary.files_loaded,
        summary.files_skipped,
        started.elapsed()
    );
    Ok(summary)
}

/// Keeps the first error reported by any worker.
struct FirstError {
    slot: Mutex<Option<LoaderError>>,
    cancel: AtomicBool,
}

impl FirstError {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cancel: AtomicBool::new(false),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn record(&self, err: LoaderError) {
        self.cancel.store(true, Ordering::Relaxed);
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            error!("[Pipeline] Cancelling run: {}", err);
            *slot = Some(err);
        } else {
            debug!("[Pipeline] Ignoring later error: {}", err);
        }
    }

    fn into_inner(self) -> Option<LoaderError> {
        self.slot.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

/// Run exactly `config.worker_count` workers over `users` and merge their counters.
pub fn dispatch<S: TrajectoryStore + ?Sized>(
    config: &LoaderConfig,
    store: &S,
    users: &[User],
    progress: Option<&ProgressCallback>,
) -> Result<WorkerStats> {
    let failure = FirstError::new();
    let completed = AtomicUsize::new(0);
    let (queue_tx, queue_rx) = bounded::<&User>(config.worker_count);

    let totals = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.worker_count);
        for id in 0..config.worker_count {
            let queue = queue_rx.clone();
            let failure = &failure;
            let completed = &completed;
            let spawned = thread::Builder::new()
                .name(format!("geolife-worker-{}", id))
                .spawn_scoped(scope, move || {
                    let worker = Worker::new(id, store, config, &failure.cancel);
                    match worker_loop(worker, queue, completed, users.len(), progress) {
                        Ok(stats) => Some(stats),
                        Err(e) => {
                            failure.record(e);
                            None
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    failure.record(LoaderError::Spawn { worker: id, source });
                    break;
                }
            }
        }
        drop(queue_rx);

        for user in users {
            if failure.is_cancelled() {
                warn!("[Pipeline] Stopped enqueueing after a failure");
                break;
            }
            // Fails only once every worker has exited
            if queue_tx.send(user).is_err() {
                break;
            }
        }
        drop(queue_tx);

        let mut totals = WorkerStats::default();
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Some(stats)) => totals.merge(&stats),
                Ok(None) => {}
                Err(_) => failure.record(LoaderError::WorkerPanicked { worker: id }),
            }
        }
        totals
    });

    match failure.into_inner() {
        Some(err) => Err(err),
        None => Ok(totals),
    }
}

/// Pull users until the queue closes. After cancellation the queue is
/// drained without processing so the coordinator never blocks.
fn worker_loop<S: TrajectoryStore + ?Sized>(
    mut worker: Worker<'_, S>,
    queue: Receiver<&User>,
    completed: &AtomicUsize,
    total: usize,
    progress: Option<&ProgressCallback>,
) -> Result<WorkerStats> {
    debug!("[Worker {}] Started", worker.id());

    for user in queue.iter() {
        if worker.is_cancelled() {
            continue;
        }
        worker.process_user(user)?;
        if worker.is_cancelled() {
            continue;
        }

        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(callback) = progress {
            callback(done, total);
        }
        if done % 50 == 0 || done == total {
            info!("[Pipeline] {}/{} users loaded", done, total);
        }
    }

    debug!("[Worker {}] Queue closed", worker.id());
    Ok(worker.into_stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::fs;
    use std::path::Path;

    fn build_dataset(root: &Path, users: usize) {
        fs::write(root.join("labeled_ids.txt"), "").unwrap();
        for i in 0..users {
            let dir = root.join("Data").join(format!("{:03}", i)).join("Trajectory");
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("a.plt"),
                "h\nh\nh\nh\nh\nh\n39.98,116.31,0,100,39744.4,2008-10-23,10:00:00\n",
            )
            .unwrap();
        }
    }

    #[test]
    fn test_every_user_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        build_dataset(dir.path(), 7);
        let config = LoaderConfig::default()
            .with_dataset_root(dir.path())
            .with_workers(3);
        let store = SqliteStore::in_memory().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });

        let summary = run(&config, &store, Some(progress)).unwrap();
        assert_eq!(summary.users_discovered, 7);
        assert_eq!(summary.users, 7);
        assert_eq!(summary.samples, 7);
        assert_eq!(summary.workers, 3);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, (1..=7).map(|d| (d, 7)).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_users() {
        let dir = tempfile::tempdir().unwrap();
        build_dataset(dir.path(), 0);
        fs::create_dir_all(dir.path().join("Data")).unwrap();
        let config = LoaderConfig::default()
            .with_dataset_root(dir.path())
            .with_workers(4);
        let store = SqliteStore::in_memory().unwrap();

        let summary = run(&config, &store, None).unwrap();
        assert_eq!(summary.users, 0);
        assert_eq!(summary.samples, 0);
    }

    #[test]
    fn test_invalid_config_rejected_before_discovery() {
        let config = LoaderConfig::default()
            .with_dataset_root("/definitely/not/here")
            .with_workers(0);
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            run(&config, &store, None),
            Err(LoaderError::Config { .. })
        ));
    }

    #[test]
    fn test_summary_serializes() {
        let summary = LoadSummary::new(2, 3, WorkerStats::default(), Duration::from_millis(1500));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(summary.elapsed(), Duration::from_millis(1500));
    }
}
