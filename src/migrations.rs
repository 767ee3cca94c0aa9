//! Schema migrations for the trajectory database.
//!
//! Timestamps are stored as ISO-8601 text (`YYYY-MM-DD HH:MM:SS`), which sorts
//! chronologically and works with SQLite's date functions.

use log::info;
use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::Result;

/// Ordered list of schema migrations. Append only.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            r#"
            CREATE TABLE users (
                id TEXT PRIMARY KEY,
                has_labels INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                transportation_mode TEXT NOT NULL,
                start_date_time TEXT NOT NULL,
                end_date_time TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                activity_id INTEGER,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                altitude INTEGER,
                date_days REAL NOT NULL,
                date_time TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (activity_id) REFERENCES activities(id) ON DELETE SET NULL
            );
            "#,
        ),
        M::up(
            r#"
            CREATE INDEX idx_activities_user_start ON activities(user_id, start_date_time);
            CREATE INDEX idx_activities_mode ON activities(transportation_mode);
            CREATE INDEX idx_samples_activity ON samples(activity_id);
            CREATE INDEX idx_samples_user_time ON samples(user_id, date_time);
            "#,
        ),
    ])
}

/// Bring `conn` up to the latest schema version.
pub fn apply(conn: &mut Connection) -> Result<()> {
    let migrations = migrations();
    let before = migrations.current_version(conn)?;
    migrations.to_latest(conn)?;
    let after = migrations.current_version(conn)?;

    if before != after {
        info!("[Migrations] Schema migrated from {} to {}", before, after);
    }
    Ok(())
}
