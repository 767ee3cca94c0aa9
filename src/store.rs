//! Persistence seam and its SQLite implementation.
//!
//! Workers share one store by reference. [`SqliteStore`] serializes access to a
//! single connection behind a mutex, so at most one statement runs at a time;
//! parsing and matching happen outside the lock.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Transaction};

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result, SqlResultExt};
use crate::migrations;
use crate::{ActivityInterval, ActivityLabel, LocationSample, User};

/// Upper bound on bound parameters per statement (SQLite's default limit).
const MAX_BOUND_PARAMETERS: usize = 32_766;

const ACTIVITY_COLUMNS: &[&str] = &[
    "user_id",
    "transportation_mode",
    "start_date_time",
    "end_date_time",
];

const SAMPLE_COLUMNS: &[&str] = &[
    "user_id",
    "activity_id",
    "lat",
    "lon",
    "altitude",
    "date_days",
    "date_time",
];

/// Storage operations the ingestion pipeline depends on.
pub trait TrajectoryStore: Send + Sync {
    /// Insert users, updating `has_labels` for ids that already exist.
    fn insert_users(&self, users: &[User]) -> Result<()>;

    /// All users, ordered by id.
    fn users(&self) -> Result<Vec<User>>;

    /// A user's persisted activity intervals, ordered by start time.
    fn activities_for_user(&self, user_id: &str) -> Result<Vec<ActivityInterval>>;

    /// Persist a batch of activity labels as one atomic write.
    fn bulk_insert_activities(&self, labels: &[ActivityLabel]) -> Result<()>;

    /// Persist a batch of samples as one atomic write.
    fn bulk_insert_samples(&self, samples: &[LocationSample]) -> Result<()>;
}

/// SQLite-backed [`TrajectoryStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the database at `path` and migrate it to the latest schema.
    pub fn open(path: &Path, config: &LoaderConfig) -> Result<Self> {
        let conn = Connection::open(path).persist_context("open database")?;
        let store = Self::init(conn, config)?;
        info!("[SqliteStore] Opened {}", path.display());
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().persist_context("open database")?;
        Self::init(conn, &LoaderConfig::default())
    }

    fn init(conn: Connection, config: &LoaderConfig) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .persist_context("set busy timeout")?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .persist_context("enable WAL")?;
        conn.pragma_update(None, "foreign_keys", true)
            .persist_context("enable foreign keys")?;
        debug!("[SqliteStore] journal_mode={}", mode);

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Apply any pending schema migrations.
    pub fn migrate(&self) -> Result<()> {
        migrations::apply(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction drops the transaction, which rolls it back,
        // so the connection is still usable after poisoning.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Verify the connection answers a trivial query.
    pub fn ping(&self) -> Result<()> {
        self.lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .persist_context("ping")?;
        Ok(())
    }

    /// Run a read-only closure against the connection.
    pub fn with_connection<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        f(&self.lock()).persist_context(operation)
    }

    /// Drop every table and reset the schema version.
    pub fn drop_all(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                r#"
                DROP TABLE IF EXISTS samples;
                DROP TABLE IF EXISTS activities;
                DROP TABLE IF EXISTS users;
                PRAGMA user_version = 0;
                "#,
            )
            .persist_context("drop tables")?;
        info!("[SqliteStore] Dropped all tables");
        Ok(())
    }

    /// Run `f` inside one transaction, rolling back explicitly on failure.
    fn in_transaction<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction().persist_context(operation)?;
        let outcome = f(&tx);

        match outcome {
            Ok(value) => {
                tx.commit().persist_context(operation)?;
                Ok(value)
            }
            Err(source) => {
                if let Err(e) = tx.rollback() {
                    warn!("[SqliteStore] Rollback after failed {} failed: {}", operation, e);
                }
                Err(LoaderError::Persist { operation, source })
            }
        }
    }
}

/// Build `INSERT INTO table (cols) VALUES (?,..),(?,..)` for `rows` rows.
fn multi_row_insert(table: &str, columns: &[&str], rows: usize) -> String {
    let group = format!("({})", vec!["?"; columns.len()].join(","));
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, columns.join(", "));
    sql.push_str(&vec![group.as_str(); rows].join(","));
    sql
}

/// Insert `records` in as few statements as the parameter limit allows.
fn insert_rows<T>(
    tx: &Transaction<'_>,
    table: &str,
    columns: &[&str],
    records: &[T],
    bind: impl Fn(&T) -> Vec<&dyn ToSql>,
) -> rusqlite::Result<usize> {
    let rows_per_statement = (MAX_BOUND_PARAMETERS / columns.len()).max(1);
    let mut inserted = 0;

    for chunk in records.chunks(rows_per_statement) {
        let sql = multi_row_insert(table, columns, chunk.len());
        let mut stmt = tx.prepare_cached(&sql)?;
        let values: Vec<&dyn ToSql> = chunk.iter().flat_map(|r| bind(r)).collect();
        inserted += stmt.execute(values.as_slice())?;
    }
    Ok(inserted)
}

impl TrajectoryStore for SqliteStore {
    fn insert_users(&self, users: &[User]) -> Result<()> {
        self.in_transaction("insert users", |tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO users (id, has_labels) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET has_labels = excluded.has_labels",
            )?;
            for user in users {
                stmt.execute(params![user.id, user.has_labels])?;
            }
            Ok(())
        })?;
        info!("[SqliteStore] Inserted {} users", users.len());
        Ok(())
    }

    fn users(&self) -> Result<Vec<User>> {
        self.with_connection("list users", |conn| {
            let mut stmt = conn.prepare("SELECT id, has_labels FROM users ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(User {
                    id: row.get(0)?,
                    has_labels: row.get(1)?,
                })
            })?;
            rows.collect()
        })
    }

    fn activities_for_user(&self, user_id: &str) -> Result<Vec<ActivityInterval>> {
        self.with_connection("fetch activities", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, transportation_mode, start_date_time, end_date_time
                 FROM activities
                 WHERE user_id = ?1
                 ORDER BY start_date_time, id",
            )?;
            let rows = stmt.query_map([user_id], |row| {
                Ok(ActivityInterval {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    transportation_mode: row.get(2)?,
                    start: row.get(3)?,
                    end: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }

    fn bulk_insert_activities(&self, labels: &[ActivityLabel]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.in_transaction("bulk insert activities", |tx| {
            insert_rows(tx, "activities", ACTIVITY_COLUMNS, labels, |label| {
                vec![
                    &label.user_id as &dyn ToSql,
                    &label.transportation_mode,
                    &label.start,
                    &label.end,
                ]
            })
        })?;
        Ok(())
    }

    fn bulk_insert_samples(&self, samples: &[LocationSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.in_transaction("bulk insert samples", |tx| {
            insert_rows(tx, "samples", SAMPLE_COLUMNS, samples, |sample| {
                vec![
                    &sample.user_id as &dyn ToSql,
                    &sample.activity_id,
                    &sample.point.latitude,
                    &sample.point.longitude,
                    &sample.altitude,
                    &sample.date_days,
                    &sample.timestamp,
                ]
            })
        })?;
        Ok(())
    }
}
