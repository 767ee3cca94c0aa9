//! Lock-step matching of sample timestamps against activity intervals.
//!
//! Both the samples of one trajectory file and a user's activity intervals are
//! in non-decreasing time order, so a single forward-only cursor over the
//! intervals is enough: each interval is passed at most once per file, giving
//! O(samples + intervals) work.
//!
//! Intervals are half-open, `[start, end)`, sorted by start and non-overlapping.

use chrono::NaiveDateTime;

use crate::ActivityInterval;

/// Match `timestamp` against the head of `intervals`.
///
/// Returns `(advance, activity_id)`: how many intervals the caller should drop
/// from the front of the suffix before the next call, and the id of the
/// interval containing `timestamp`, if any.
///
/// - before the first interval's start: no match, advance 0
/// - inside the first interval: match it, advance 0
/// - at or after its end: skip every interval that ended at or before
///   `timestamp`, then match the next one if it has started
///
/// A one-interval lookahead would match the next interval even when it has
/// also ended. This never does: a returned id always contains `timestamp`.
///
/// Timestamps earlier than a previous call are never matched against intervals
/// the cursor has already passed.
pub fn match_interval(
    timestamp: NaiveDateTime,
    intervals: &[ActivityInterval],
) -> (usize, Option<i64>) {
    let mut advance = 0;
    while let Some(interval) = intervals.get(advance) {
        if timestamp < interval.start {
            return (advance, None);
        }
        if timestamp < interval.end {
            return (advance, Some(interval.id));
        }
        advance += 1;
    }
    (advance, None)
}

/// Forward-only cursor over a user's sorted activity intervals.
///
/// Create one per trajectory file; the interval slice itself is shared
/// read-only for the whole user.
#[derive(Debug, Clone)]
pub struct IntervalCursor<'a> {
    intervals: &'a [ActivityInterval],
    offset: usize,
}

impl<'a> IntervalCursor<'a> {
    pub fn new(intervals: &'a [ActivityInterval]) -> Self {
        Self {
            intervals,
            offset: 0,
        }
    }

    /// Index of the first interval still in play.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Find the activity containing `timestamp` and advance past expired intervals.
    pub fn activity_for(&mut self, timestamp: NaiveDateTime) -> Option<i64> {
        if self.offset >= self.intervals.len() {
            return None;
        }
        let (advance, activity_id) = match_interval(timestamp, &self.intervals[self.offset..]);
        self.offset += advance;
        activity_id
    }
}
