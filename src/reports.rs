//! Analytical reports over a loaded database.
//!
//! Each report is a plain function over a [`SqliteStore`] returning typed,
//! serializable rows. [`run_all`] runs the whole battery in order.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use log::debug;
use rayon::prelude::*;
use rusqlite::params;
use serde::Serialize;

use crate::error::{LoaderError, Result};
use crate::geo_utils::polyline_length;
use crate::store::SqliteStore;
use crate::GpsPoint;

/// Number of rows returned by the "top N" reports.
pub const TOP_N: usize = 20;

/// Gaps longer than this many whole minutes make an activity invalid.
pub const MAX_SAMPLE_GAP_MINUTES: i64 = 4;

/// Tiananmen gate of the Forbidden City.
pub const FORBIDDEN_CITY: GpsPoint = GpsPoint {
    latitude: 39.916,
    longitude: 116.397,
};

/// Half-width of the box around [`FORBIDDEN_CITY`], in degrees.
pub const NEAR_DEGREES: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub users: i64,
    pub activities: i64,
    pub samples: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserCount {
    pub user_id: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeCount {
    pub transportation_mode: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearValue {
    pub year: i32,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusiestYear {
    /// Year with the most activities, by activity count
    pub by_activities: Option<YearValue>,
    /// Year with the most recorded whole hours
    pub by_hours: Option<YearValue>,
    pub same_year: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AltitudeGain {
    pub user_id: String,
    /// Sum of positive altitude deltas, in feet
    pub gained_feet: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMode {
    pub user_id: String,
    pub transportation_mode: String,
    pub count: i64,
}

/// Every report, as emitted by the `report` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullReport {
    pub counts: TableCounts,
    pub average_activities_per_user: f64,
    pub top_users_by_activities: Vec<UserCount>,
    pub taxi_users: Vec<String>,
    pub mode_counts: Vec<ModeCount>,
    pub busiest_year: BusiestYear,
    pub walked_km_user_112_2008: f64,
    pub top_altitude_gain: Vec<AltitudeGain>,
    pub invalid_activities: Vec<UserCount>,
    pub forbidden_city_visitors: Vec<String>,
    pub top_mode_per_user: Vec<UserMode>,
}

impl FullReport {
    /// Pretty-printed JSON, as printed by `report --json`.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|source| LoaderError::Output { source })
    }
}

/// Run every report in order.
pub fn run_all(store: &SqliteStore) -> Result<FullReport> {
    let report = FullReport {
        counts: table_counts(store)?,
        average_activities_per_user: average_activities_per_user(store)?,
        top_users_by_activities: top_users_by_activities(store, TOP_N)?,
        taxi_users: users_with_mode(store, "taxi")?,
        mode_counts: mode_counts(store)?,
        busiest_year: busiest_year(store)?,
        walked_km_user_112_2008: distance_walked_km(store, "112", 2008)?,
        top_altitude_gain: top_altitude_gain(store, TOP_N)?,
        invalid_activities: invalid_activities(store)?,
        forbidden_city_visitors: users_near(store, FORBIDDEN_CITY, NEAR_DEGREES)?,
        top_mode_per_user: top_mode_per_user(store)?,
    };
    debug!("[Reports] Completed report battery");
    Ok(report)
}

/// Row counts of the three tables.
pub fn table_counts(store: &SqliteStore) -> Result<TableCounts> {
    store.with_connection("count rows", |conn| {
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
        };
        Ok(TableCounts {
            users: count("users")?,
            activities: count("activities")?,
            samples: count("samples")?,
        })
    })
}

/// Mean activity count over users with at least one activity.
pub fn average_activities_per_user(store: &SqliteStore) -> Result<f64> {
    store.with_connection("average activities", |conn| {
        conn.query_row(
            "SELECT COALESCE(AVG(count), 0.0)
             FROM (SELECT user_id, COUNT(*) AS count FROM activities GROUP BY user_id)",
            [],
            |row| row.get(0),
        )
    })
}

pub fn top_users_by_activities(store: &SqliteStore, limit: usize) -> Result<Vec<UserCount>> {
    store.with_connection("top users by activities", |conn| {
        let mut stmt = conn.prepare(
            "SELECT user_id, COUNT(*) AS count FROM activities
             GROUP BY user_id
             ORDER BY count DESC, user_id
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(UserCount {
                user_id: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        rows.collect()
    })
}

/// Users with at least one activity in `mode`, compared case-insensitively.
pub fn users_with_mode(store: &SqliteStore, mode: &str) -> Result<Vec<String>> {
    store.with_connection("users with mode", |conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM activities
             WHERE lower(transportation_mode) = lower(?1)
             ORDER BY user_id",
        )?;
        let rows = stmt.query_map([mode], |row| row.get(0))?;
        rows.collect()
    })
}

pub fn mode_counts(store: &SqliteStore) -> Result<Vec<ModeCount>> {
    store.with_connection("mode counts", |conn| {
        let mut stmt = conn.prepare(
            "SELECT transportation_mode, COUNT(*) AS count FROM activities
             GROUP BY transportation_mode
             ORDER BY count DESC, transportation_mode",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ModeCount {
                transportation_mode: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        rows.collect()
    })
}

/// Year with the most activities and year with the most whole hours.
///
/// Each activity contributes its duration truncated to whole hours.
pub fn busiest_year(store: &SqliteStore) -> Result<BusiestYear> {
    let (by_activities, by_hours) = store.with_connection("busiest year", |conn| {
        let top = |sql: &str| -> rusqlite::Result<Option<YearValue>> {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query_map([], |row| {
                Ok(YearValue {
                    year: row.get(0)?,
                    value: row.get(1)?,
                })
            })?;
            rows.next().transpose()
        };

        let by_activities = top(
            "SELECT CAST(strftime('%Y', start_date_time) AS INTEGER) AS year, COUNT(*) AS value
             FROM activities
             GROUP BY year
             ORDER BY value DESC, year
             LIMIT 1",
        )?;
        let by_hours = top(
            "SELECT CAST(strftime('%Y', start_date_time) AS INTEGER) AS year,
                    SUM((strftime('%s', end_date_time) - strftime('%s', start_date_time)) / 3600) AS value
             FROM activities
             GROUP BY year
             ORDER BY value DESC, year
             LIMIT 1",
        )?;
        Ok((by_activities, by_hours))
    })?;

    let same_year = matches!(
        (&by_activities, &by_hours),
        (Some(a), Some(h)) if a.year == h.year
    );
    Ok(BusiestYear {
        by_activities,
        by_hours,
        same_year,
    })
}

/// Kilometres walked by `user_id` in walk activities starting in `year`.
///
/// Distances are summed between consecutive samples of the same activity.
pub fn distance_walked_km(store: &SqliteStore, user_id: &str, year: i32) -> Result<f64> {
    let tracks: Vec<(i64, GpsPoint)> = store.with_connection("distance walked", |conn| {
        let mut stmt = conn.prepare(
            "SELECT s.activity_id, s.lat, s.lon
             FROM samples s
             JOIN activities a ON a.id = s.activity_id
             WHERE a.user_id = ?1
               AND lower(a.transportation_mode) = 'walk'
               AND CAST(strftime('%Y', a.start_date_time) AS INTEGER) = ?2
             ORDER BY s.activity_id, s.date_time, s.id",
        )?;
        let rows = stmt.query_map(params![user_id, year], |row| {
            Ok((row.get(0)?, GpsPoint::new(row.get(1)?, row.get(2)?)))
        })?;
        rows.collect()
    })?;

    let meters: f64 = group_by_key(tracks)
        .into_iter()
        .map(|(_, points)| polyline_length(&points))
        .sum();
    Ok(meters / 1000.0)
}

/// Users ranked by altitude gained during walk activities.
///
/// Only positive deltas between consecutive known altitudes within one
/// activity count. Users without walks appear with zero gain.
pub fn top_altitude_gain(store: &SqliteStore, limit: usize) -> Result<Vec<AltitudeGain>> {
    let (users, rows) = store.with_connection("altitude gain", |conn| {
        let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id")?;
        let users: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare(
            "SELECT a.user_id, s.activity_id, s.altitude
             FROM samples s
             JOIN activities a ON a.id = s.activity_id
             WHERE lower(a.transportation_mode) = 'walk' AND s.altitude IS NOT NULL
             ORDER BY a.user_id, s.activity_id, s.date_time, s.id",
        )?;
        let rows: Vec<(String, i64, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok((users, rows))
    })?;

    let mut per_user: HashMap<String, Vec<(i64, i64)>> = HashMap::new();
    for (user_id, activity_id, altitude) in rows {
        per_user
            .entry(user_id)
            .or_default()
            .push((activity_id, altitude));
    }

    let mut gains: Vec<AltitudeGain> = users
        .into_par_iter()
        .map(|user_id| {
            let gained_feet = per_user
                .get(&user_id)
                .map(|samples| altitude_gain(samples))
                .unwrap_or(0);
            AltitudeGain {
                user_id,
                gained_feet,
            }
        })
        .collect();

    gains.sort_by(|a, b| {
        b.gained_feet
            .cmp(&a.gained_feet)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    gains.truncate(limit);
    Ok(gains)
}

/// Sum of positive deltas between consecutive `(activity_id, altitude)`
/// pairs that share an activity.
pub fn altitude_gain(samples: &[(i64, i64)]) -> i64 {
    samples
        .windows(2)
        .filter(|w| w[0].0 == w[1].0 && w[1].1 > w[0].1)
        .map(|w| w[1].1 - w[0].1)
        .sum()
}

/// Per user, the number of activities with a gap of more than
/// [`MAX_SAMPLE_GAP_MINUTES`] whole minutes between consecutive samples.
pub fn invalid_activities(store: &SqliteStore) -> Result<Vec<UserCount>> {
    let rows: Vec<(String, i64, NaiveDateTime)> =
        store.with_connection("invalid activities", |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, activity_id, date_time FROM samples
                 WHERE activity_id IS NOT NULL
                 ORDER BY activity_id, date_time, id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect()
        })?;

    let mut invalid: Vec<(String, i64)> = rows
        .windows(2)
        .filter(|w| w[0].1 == w[1].1)
        .filter(|w| (w[1].2 - w[0].2).num_minutes() > MAX_SAMPLE_GAP_MINUTES)
        .map(|w| (w[1].0.clone(), w[1].1))
        .collect();
    invalid.dedup();

    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for (user_id, _) in invalid {
        *counts.entry(user_id).or_insert(0) += 1;
    }
    Ok(counts
        .into_iter()
        .map(|(user_id, count)| UserCount { user_id, count })
        .collect())
}

/// Users with any sample inside the box of half-width `degrees` around `center`.
pub fn users_near(store: &SqliteStore, center: GpsPoint, degrees: f64) -> Result<Vec<String>> {
    store.with_connection("users near point", |conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM samples
             WHERE ABS(lat - ?1) <= ?3 AND ABS(lon - ?2) <= ?3
             ORDER BY user_id",
        )?;
        let rows = stmt.query_map(
            params![center.latitude, center.longitude, degrees],
            |row| row.get(0),
        )?;
        rows.collect()
    })
}

/// Each user's most frequent transportation mode. Ties go to the mode that
/// sorts first.
pub fn top_mode_per_user(store: &SqliteStore) -> Result<Vec<UserMode>> {
    let rows: Vec<UserMode> = store.with_connection("top mode per user", |conn| {
        let mut stmt = conn.prepare(
            "SELECT user_id, transportation_mode, COUNT(*) AS count FROM activities
             GROUP BY user_id, transportation_mode
             ORDER BY user_id, count DESC, transportation_mode",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserMode {
                user_id: row.get(0)?,
                transportation_mode: row.get(1)?,
                count: row.get(2)?,
            })
        })?;
        rows.collect()
    })?;

    let mut top: Vec<UserMode> = Vec::new();
    for row in rows {
        if top.last().map(|prev| prev.user_id != row.user_id).unwrap_or(true) {
            top.push(row);
        }
    }
    Ok(top)
}

/// Split `(key, value)` pairs, already ordered by key, into runs of equal key.
fn group_by_key<K: PartialEq, V>(pairs: Vec<(K, V)>) -> Vec<(K, Vec<V>)> {
    let mut groups: Vec<(K, Vec<V>)> = Vec::new();
    for (key, value) in pairs {
        match groups.last_mut() {
            Some((last, values)) if *last == key => values.push(value),
            _ => groups.push((key, vec![value])),
        }
    }
    groups
}
