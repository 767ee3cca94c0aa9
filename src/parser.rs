//! Record parsing for activity-label files and `.plt` trajectory files.
//!
//! ## Label files
//!
//! One header line, then tab-separated rows:
//!
//! ```text
//! Start Time\tEnd Time\tTransportation Mode
//! 2008/04/02 11:24:21\t2008/04/02 11:50:45\tbus
//! ```
//!
//! ## Trajectory files
//!
//! Six header lines, then comma-separated rows of latitude, longitude, an
//! unused zero, altitude in feet (-777 when unknown), fractional days, date
//! and time:
//!
//! ```text
//! 39.984702,116.318417,0,492,39744.1201851852,2008-10-23,02:53:04
//! ```
//!
//! Any malformed row is a [`LoaderError::Parse`]. Oversized trajectory files
//! are not errors and come back as [`FileOutcome::Skipped`].

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;

use crate::batch::{BatchSink, ScratchBuffer};
use crate::config::LoaderConfig;
use crate::error::{IoResultExt, LoaderError, Result};
use crate::matcher::IntervalCursor;
use crate::{ActivityInterval, ActivityLabel, GpsPoint, LocationSample, UNKNOWN_ALTITUDE};

/// Timestamp format used in `labels.txt`.
pub const LABEL_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Timestamp format of the joined date and time fields of a trajectory row.
pub const TRAJECTORY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LABEL_HEADER_LINES: usize = 1;
const PRESCAN_CHUNK_SIZE: usize = 1024 * 1024;

/// Allocate a chunk for [`is_valid_line_count`]. Workers keep one for their
/// whole life and reuse it for every file.
pub fn prescan_chunk() -> Vec<u8> {
    vec![0u8; PRESCAN_CHUNK_SIZE]
}

/// Result of loading one trajectory file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was parsed and this many samples were flushed
    Loaded(usize),
    /// The file exceeded the line threshold and contributed nothing
    Skipped,
}

/// Shape limits of trajectory files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrajectoryFormat {
    /// Files containing more newlines than this are skipped
    pub max_lines: usize,
    /// Lines discarded at the top of each file
    pub header_lines: usize,
}

impl TrajectoryFormat {
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            max_lines: config.max_trajectory_lines,
            header_lines: config.trajectory_header_lines,
        }
    }
}

impl Default for TrajectoryFormat {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

// ============================================================================
// Line Parsing
// ============================================================================

/// Parse one data row of a label file.
pub fn parse_label_line(
    line: &str,
    user_id: &str,
    path: &Path,
    line_no: usize,
) -> Result<ActivityLabel> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 3 {
        return Err(LoaderError::parse(
            path,
            line_no,
            format!("expected 3 tab-separated fields, found {}", fields.len()),
        ));
    }

    let start = parse_timestamp(fields[0].trim(), LABEL_TIME_FORMAT, path, line_no)?;
    let end = parse_timestamp(fields[1].trim(), LABEL_TIME_FORMAT, path, line_no)?;

    Ok(ActivityLabel {
        user_id: user_id.to_string(),
        transportation_mode: fields[2].trim().to_string(),
        start,
        end,
    })
}

/// Parse one data row of a trajectory file. The activity reference is left empty.
pub fn parse_trajectory_line(
    line: &str,
    user_id: &str,
    path: &Path,
    line_no: usize,
) -> Result<LocationSample> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 7 {
        return Err(LoaderError::parse(
            path,
            line_no,
            format!("expected 7 comma-separated fields, found {}", fields.len()),
        ));
    }

    let latitude: f64 = parse_number(fields[0], "latitude", path, line_no)?;
    let longitude: f64 = parse_number(fields[1], "longitude", path, line_no)?;
    // Some files record altitude with a fractional part
    let altitude: f64 = parse_number(fields[3], "altitude", path, line_no)?;
    let date_days: f64 = parse_number(fields[4], "date", path, line_no)?;
    let joined = format!("{} {}", fields[5].trim(), fields[6].trim());
    let timestamp = parse_timestamp(&joined, TRAJECTORY_TIME_FORMAT, path, line_no)?;

    let altitude = altitude as i32;
    Ok(LocationSample {
        user_id: user_id.to_string(),
        activity_id: None,
        point: GpsPoint::new(latitude, longitude),
        altitude: (altitude != UNKNOWN_ALTITUDE).then_some(altitude),
        date_days,
        timestamp,
    })
}

fn parse_number<T: FromStr>(field: &str, name: &str, path: &Path, line_no: usize) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let field = field.trim();
    field.parse().map_err(|e| {
        LoaderError::parse(path, line_no, format!("invalid {} '{}': {}", name, field, e))
    })
}

fn parse_timestamp(value: &str, format: &str, path: &Path, line_no: usize) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, format).map_err(|e| {
        LoaderError::parse(path, line_no, format!("invalid timestamp '{}': {}", value, e))
    })
}

// ============================================================================
// Line-Count Pre-scan
// ============================================================================

/// Count newline bytes, reading through `chunk`, stopping as soon as the
/// count exceeds `max_lines`.
///
/// Returns `Ok(false)` for an oversized input; only read failures are errors.
pub fn is_valid_line_count<R: Read>(
    mut reader: R,
    max_lines: usize,
    chunk: &mut [u8],
) -> io::Result<bool> {
    if chunk.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "prescan chunk must not be empty",
        ));
    }
    let mut count = 0usize;

    loop {
        let read = match reader.read(chunk) {
            Ok(0) => return Ok(true),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        count += chunk[..read].iter().filter(|&&b| b == b'\n').count();
        if count > max_lines {
            return Ok(false);
        }
    }
}

// ============================================================================
// File Loading
// ============================================================================

/// Text of one line from `BufRead::lines`. Bytes that are not valid UTF-8
/// make the row malformed rather than the file unreadable.
fn line_text(line: io::Result<String>, path: &Path, line_no: usize) -> Result<String> {
    match line {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            Err(LoaderError::parse(path, line_no, format!("invalid UTF-8: {}", e)))
        }
        Err(e) => Err(e).io_context(path),
    }
}

/// Parse a user's label file into `buffer`, flushing through `sink` whenever
/// the buffer fills and once more at the end of the file.
///
/// Returns the number of labels parsed. Memory stays bounded by the buffer
/// capacity regardless of file size.
pub fn load_activities<S: BatchSink<ActivityLabel> + ?Sized>(
    path: &Path,
    user_id: &str,
    buffer: &mut ScratchBuffer<ActivityLabel>,
    sink: &mut S,
) -> Result<usize> {
    buffer.clear();
    let file = File::open(path).io_context(path)?;
    let reader = BufReader::new(file);
    let mut total = 0;

    for (index, line) in reader.lines().enumerate().skip(LABEL_HEADER_LINES) {
        let line = line_text(line, path, index + 1)?;
        let row = line.trim();
        if row.is_empty() {
            continue;
        }

        let label = parse_label_line(row, user_id, path, index + 1)?;
        if let Err(label) = buffer.try_push(label) {
            buffer.flush_into(sink)?;
            if buffer.try_push(label).is_err() {
                return Err(LoaderError::config("activity_batch_capacity must be at least 1"));
            }
        }
        total += 1;

        if buffer.is_full() {
            buffer.flush_into(sink)?;
        }
    }

    buffer.flush_into(sink)?;
    Ok(total)
}

/// Parse one trajectory file, tag each sample with its containing activity,
/// and flush the whole file through `sink` in a single batch.
///
/// `intervals` must be the user's persisted activities sorted by start time.
/// `prescan` is scratch space for the line-count check. Nothing is written for a file that fails to parse.
pub fn load_trajectory<S: BatchSink<LocationSample> + ?Sized>(
    path: &Path,
    user_id: &str,
    intervals: &[ActivityInterval],
    format: TrajectoryFormat,
    prescan: &mut [u8],
    buffer: &mut ScratchBuffer<LocationSample>,
    sink: &mut S,
) -> Result<FileOutcome> {
    buffer.clear();
    let mut file = File::open(path).io_context(path)?;

    if !is_valid_line_count(&mut file, format.max_lines, prescan).io_context(path)? {
        return Ok(FileOutcome::Skipped);
    }
    file.seek(SeekFrom::Start(0)).io_context(path)?;

    match fill_samples(file, path, user_id, intervals, format, buffer) {
        Ok(true) => {}
        Ok(false) => {
            buffer.clear();
            return Ok(FileOutcome::Skipped);
        }
        Err(e) => {
            buffer.clear();
            return Err(e);
        }
    }

    let count = buffer.flush_into(sink)?;
    Ok(FileOutcome::Loaded(count))
}

/// Returns `Ok(false)` when the file holds more samples than the buffer.
fn fill_samples(
    file: File,
    path: &Path,
    user_id: &str,
    intervals: &[ActivityInterval],
    format: TrajectoryFormat,
    buffer: &mut ScratchBuffer<LocationSample>,
) -> Result<bool> {
    let reader = BufReader::new(file);
    let mut cursor = IntervalCursor::new(intervals);

    for (index, line) in reader.lines().enumerate().skip(format.header_lines) {
        let line = line_text(line, path, index + 1)?;
        let row = line.trim();
        if row.is_empty() {
            continue;
        }

        let mut sample = parse_trajectory_line(row, user_id, path, index + 1)?;
        sample.activity_id = cursor.activity_for(sample.timestamp);
        if buffer.try_push(sample).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}
