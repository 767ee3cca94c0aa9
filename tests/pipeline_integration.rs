//! End-to-end pipeline tests over synthetic dataset trees.
//!
//! Each test builds a dataset under a temp directory, loads it into a
//! file-backed SQLite database and inspects what was persisted.

mod common;

use common::{plt, plt_row, plt_with_rows, DatasetBuilder, PLT_HEADER};
use geolife_loader::{pipeline, reports, LoaderConfig, LoaderError, SqliteStore, TrajectoryStore};
use tempfile::TempDir;

fn open_store(dir: &TempDir, config: &LoaderConfig) -> SqliteStore {
    SqliteStore::open(&dir.path().join("geolife.db"), config).expect("failed to open store")
}

fn sample_activity_ids(store: &SqliteStore, user_id: &str) -> Vec<Option<i64>> {
    store
        .with_connection("read samples", |conn| {
            let mut stmt = conn
                .prepare("SELECT activity_id FROM samples WHERE user_id = ?1 ORDER BY date_time")?;
            let rows = stmt.query_map([user_id], |row| row.get(0))?;
            rows.collect()
        })
        .unwrap()
}

fn sample_count(store: &SqliteStore) -> i64 {
    reports::table_counts(store).unwrap().samples
}

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_walk_then_bike_end_to_end() {
    let dataset = DatasetBuilder::new()
        .user(
            "010",
            Some("2008/10/23 10:00:00\t2008/10/23 10:30:00\twalk\n2008/10/23 10:30:00\t2008/10/23 11:00:00\tbike\n"),
        )
        .trajectory(
            "010",
            "20081023100000.plt",
            &plt(&["09:59:00", "10:05:00", "10:30:00", "10:45:00", "11:05:00"]),
        )
        .user("000", None)
        .trajectory("000", "20081023.plt", &plt(&["10:05:00"]))
        .build();
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default()
        .with_dataset_root(dataset.path())
        .with_workers(2);
    let store = open_store(&db_dir, &config);

    let summary = pipeline::run(&config, &store, None).unwrap();
    assert_eq!(summary.users, 2);
    assert_eq!(summary.activities, 2);
    assert_eq!(summary.samples, 6);

    let intervals = store.activities_for_user("010").unwrap();
    let (walk, bike) = (intervals[0].id, intervals[1].id);
    assert_eq!(intervals[0].transportation_mode, "walk");
    assert_eq!(
        sample_activity_ids(&store, "010"),
        vec![None, Some(walk), Some(bike), Some(bike), None]
    );
    // Unlabeled users never match an activity
    assert_eq!(sample_activity_ids(&store, "000"), vec![None]);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_parse_error_aborts_with_nothing_from_that_file() {
    let mut broken = PLT_HEADER.to_string();
    for i in 7..200 {
        broken.push_str(&plt_row(&format!("10:{:02}:{:02}", (i / 60) % 60, i % 60)));
    }
    broken.push_str("abc,116.318417,0,492,39744.12,2008-10-23,12:00:00\n");
    broken.push_str(&plt_row("12:00:01"));

    let dataset = DatasetBuilder::new()
        .user("000", None)
        .trajectory("000", "broken.plt", &broken)
        .build();
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default()
        .with_dataset_root(dataset.path())
        .with_workers(1);
    let store = open_store(&db_dir, &config);

    let err = pipeline::run(&config, &store, None).unwrap_err();
    match err {
        LoaderError::Parse { line, ref path, .. } => {
            assert_eq!(line, 200);
            assert!(path.ends_with("broken.plt"));
        }
        other => panic!("expected parse error, got {:?}", other),
    }
    assert_eq!(sample_count(&store), 0);
}

#[test]
fn test_failure_stops_run_without_hanging() {
    // Many users, one of them broken; the run must terminate with the error
    let mut builder = DatasetBuilder::new();
    for i in 0..40 {
        let id = format!("{:03}", i);
        builder = builder
            .user(&id, None)
            .trajectory(&id, "a.plt", &plt(&["10:00:00", "10:00:05"]));
    }
    let dataset = builder
        .trajectory("007", "b.plt", "h\nh\nh\nh\nh\nh\nnot,a,valid,row\n")
        .build();
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default()
        .with_dataset_root(dataset.path())
        .with_workers(3);
    let store = open_store(&db_dir, &config);

    let err = pipeline::run(&config, &store, None).unwrap_err();
    assert_eq!(err.kind(), "parse");
    // Samples already committed stay committed; nothing from the bad file
    assert!(sample_count(&store) <= 80);
    assert_eq!(sample_count(&store) % 2, 0);
}

#[test]
fn test_missing_labels_file_fails_run() {
    let dataset = DatasetBuilder::new().user("010", Some("")).build();
    std::fs::remove_file(dataset.path().join("Data/010/labels.txt")).unwrap();
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default().with_dataset_root(dataset.path());
    let store = open_store(&db_dir, &config);

    let err = pipeline::run(&config, &store, None).unwrap_err();
    assert!(matches!(err, LoaderError::Io { .. }));
}

#[test]
fn test_missing_dataset_is_discovery_error() {
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default().with_dataset_root(db_dir.path().join("nope"));
    let store = open_store(&db_dir, &config);

    let err = pipeline::run(&config, &store, None).unwrap_err();
    assert!(matches!(err, LoaderError::Discovery { .. }));
}

// ============================================================================
// Oversized files
// ============================================================================

#[test]
fn test_line_threshold_boundary() {
    // 6 header lines + 2500 rows = 2506 newlines: loaded
    // 6 header lines + 2501 rows = 2507 newlines: skipped
    let dataset = DatasetBuilder::new()
        .user("000", None)
        .trajectory("000", "at_limit.plt", &plt_with_rows(2500))
        .trajectory("000", "over_limit.plt", &plt_with_rows(2501))
        .build();
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default()
        .with_dataset_root(dataset.path())
        .with_workers(1);
    let store = open_store(&db_dir, &config);

    let summary = pipeline::run(&config, &store, None).unwrap();
    assert_eq!(summary.files_loaded, 1);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.samples, 2500);
    assert_eq!(sample_count(&store), 2500);
}

// ============================================================================
// Worker pool
// ============================================================================

#[test]
fn test_every_user_exactly_once_for_any_pool_size() {
    for users in [0usize, 1, 5, 13] {
        for workers in [1usize, 2, 4, 8] {
            let mut builder = DatasetBuilder::new();
            for i in 0..users {
                let id = format!("{:03}", i);
                builder = builder
                    .user(&id, None)
                    .trajectory(&id, "a.plt", &plt(&["10:00:00"]));
            }
            let dataset = builder.build();
            let db_dir = TempDir::new().unwrap();
            let config = LoaderConfig::default()
                .with_dataset_root(dataset.path())
                .with_workers(workers);
            let store = open_store(&db_dir, &config);

            let summary = pipeline::run(&config, &store, None).unwrap();
            assert_eq!(summary.users, users, "U={} N={}", users, workers);
            assert_eq!(summary.workers, workers);
            assert_eq!(sample_count(&store), users as i64, "U={} N={}", users, workers);

            let distinct: i64 = store
                .with_connection("distinct users", |conn| {
                    conn.query_row("SELECT COUNT(DISTINCT user_id) FROM samples", [], |row| {
                        row.get(0)
                    })
                })
                .unwrap();
            assert_eq!(distinct, users as i64);
        }
    }
}

// ============================================================================
// Reports after a load
// ============================================================================

#[test]
fn test_reports_over_loaded_dataset() {
    let dataset = DatasetBuilder::new()
        .user(
            "112",
            Some("2008/10/23 10:00:00\t2008/10/23 11:00:00\twalk\n2008/10/23 12:00:00\t2008/10/23 12:30:00\ttaxi\n"),
        )
        .trajectory(
            "112",
            "a.plt",
            &plt(&["10:00:00", "10:01:00", "10:10:00", "12:05:00"]),
        )
        .build();
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default().with_dataset_root(dataset.path());
    let store = open_store(&db_dir, &config);
    pipeline::run(&config, &store, None).unwrap();

    let report = reports::run_all(&store).unwrap();
    assert_eq!(report.counts.users, 1);
    assert_eq!(report.counts.activities, 2);
    assert_eq!(report.counts.samples, 4);
    assert_eq!(report.taxi_users, vec!["112"]);
    // Same coordinates throughout, so no distance
    assert!(report.walked_km_user_112_2008.abs() < 1e-9);
    // 10:01 -> 10:10 is a nine-minute gap inside the walk
    assert_eq!(report.invalid_activities.len(), 1);
    assert_eq!(report.invalid_activities[0].count, 1);
}

#[test]
fn test_drop_all_empties_database() {
    let dataset = DatasetBuilder::new()
        .user("000", None)
        .trajectory("000", "a.plt", &plt(&["10:00:00"]))
        .build();
    let db_dir = TempDir::new().unwrap();
    let config = LoaderConfig::default().with_dataset_root(dataset.path());
    let store = open_store(&db_dir, &config);
    pipeline::run(&config, &store, None).unwrap();

    store.drop_all().unwrap();
    drop(store);

    // Reopening migrates a fresh schema
    let store = open_store(&db_dir, &config);
    assert_eq!(sample_count(&store), 0);
}
