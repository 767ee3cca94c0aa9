//! Worker-local scratch buffers and the bulk writer that drains them.
//!
//! Each worker owns one [`ScratchBuffer`] per record kind for its whole
//! lifetime. Buffers are cleared, never reallocated, between flushes, and are
//! only ever reachable through `&mut`, so no locking happens on the hot path.

use log::trace;

use crate::error::Result;
use crate::store::TrajectoryStore;
use crate::{ActivityLabel, LocationSample};

/// Fixed-capacity buffer of parsed records awaiting a bulk write.
#[derive(Debug)]
pub struct ScratchBuffer<T> {
    records: Vec<T>,
    capacity: usize,
}

impl<T> ScratchBuffer<T> {
    /// Create an empty buffer that holds at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Append a record, handing it back if the buffer is already full.
    pub fn try_push(&mut self, record: T) -> std::result::Result<(), T> {
        if self.is_full() {
            return Err(record);
        }
        self.records.push(record);
        Ok(())
    }

    /// The valid prefix of the buffer.
    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    /// Drop pending records without writing them.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Write the pending records through `sink` and reset the buffer.
    ///
    /// Returns the number of records handed to the sink. On error the buffer
    /// is still reset so no record can be written twice.
    pub fn flush_into<S: BatchSink<T> + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        let count = self.records.len();
        let result = sink.flush(&self.records);
        self.records.clear();
        result.map(|_| count)
    }
}

/// Destination for one bulk write of `T` records.
pub trait BatchSink<T> {
    /// Persist `records` as a single bulk write. An empty slice is a no-op.
    fn flush(&mut self, records: &[T]) -> Result<()>;
}

/// Bulk writer backed by a [`TrajectoryStore`].
///
/// A worker keeps one writer for activity labels and one for samples; each
/// tracks how many records and batches it has written.
pub struct BatchWriter<'s, S: ?Sized> {
    store: &'s S,
    records_written: usize,
    batches_written: usize,
}

impl<'s, S: TrajectoryStore + ?Sized> BatchWriter<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            records_written: 0,
            batches_written: 0,
        }
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn batches_written(&self) -> usize {
        self.batches_written
    }

    fn record(&mut self, count: usize) {
        self.records_written += count;
        self.batches_written += 1;
    }
}

impl<S: TrajectoryStore + ?Sized> BatchSink<ActivityLabel> for BatchWriter<'_, S> {
    fn flush(&mut self, records: &[ActivityLabel]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        trace!("[BatchWriter] Flushing {} activities", records.len());
        self.store.bulk_insert_activities(records)?;
        self.record(records.len());
        Ok(())
    }
}

impl<S: TrajectoryStore + ?Sized> BatchSink<LocationSample> for BatchWriter<'_, S> {
    fn flush(&mut self, records: &[LocationSample]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        trace!("[BatchWriter] Flushing {} samples", records.len());
        self.store.bulk_insert_samples(records)?;
        self.record(records.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the size of every flush it receives.
    #[derive(Default)]
    struct RecordingSink {
        flushes: Vec<Vec<u32>>,
    }

    impl BatchSink<u32> for RecordingSink {
        fn flush(&mut self, records: &[u32]) -> Result<()> {
            if !records.is_empty() {
                self.flushes.push(records.to_vec());
            }
            Ok(())
        }
    }

    #[test]
    fn test_try_push_respects_capacity() {
        let mut buffer = ScratchBuffer::with_capacity(2);
        assert!(buffer.try_push(1).is_ok());
        assert!(buffer.try_push(2).is_ok());
        assert!(buffer.is_full());
        assert_eq!(buffer.try_push(3), Err(3));
        assert_eq!(buffer.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_flush_resets_buffer() {
        let mut buffer = ScratchBuffer::with_capacity(4);
        let mut sink = RecordingSink::default();
        for i in 0..3 {
            buffer.try_push(i).unwrap();
        }

        assert_eq!(buffer.flush_into(&mut sink).unwrap(), 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(sink.flushes, vec![vec![0, 1, 2]]);

        // Flushing an empty buffer writes nothing
        assert_eq!(buffer.flush_into(&mut sink).unwrap(), 0);
        assert_eq!(sink.flushes.len(), 1);
    }

    #[test]
    fn test_reuse_does_not_leak_previous_batch() {
        let mut buffer = ScratchBuffer::with_capacity(3);
        let mut sink = RecordingSink::default();
        for i in 0..3 {
            buffer.try_push(i).unwrap();
        }
        buffer.flush_into(&mut sink).unwrap();
        buffer.try_push(10).unwrap();
        buffer.flush_into(&mut sink).unwrap();

        assert_eq!(sink.flushes, vec![vec![0, 1, 2], vec![10]]);
    }
}
