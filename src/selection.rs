//! Replacement-selection run generation.
//!
//! Reads the input sequentially through a fixed working set of
//! [`HEAP_BLOCKS`] block buffers' worth of records and emits sorted runs to
//! a run file. Records that arrive too late for the current run are frozen
//! at the tail of the working set and seed the next run, which is what lets
//! runs grow to roughly twice the working-set size on random input.

use std::fs;
use std::path::Path;

use crate::buffer::{BufferPool, RecordCursor, RecordWriter};
use crate::heap::{self, CapacityError};
use crate::record::{Record, RECORD_BYTES};
use crate::run::{Run, RunTracker};
use crate::sort::SortError;

/// Number of blocks in the replacement-selection working set.
pub const HEAP_BLOCKS: usize = 8;

/// Bounded working set for replacement selection.
///
/// One backing array of `capacity` slots split into an active heap region
/// `[0, heap_len)` (a valid min-heap) and a frozen region
/// `[frozen_start, capacity)` holding records deferred to the next run.
/// Invariant: `heap_len <= frozen_start`; the indices never leave this
/// struct.
struct Workspace {
    slots: Vec<Record>,
    heap_len: usize,
    frozen_start: usize,
}

impl Workspace {
    fn new(capacity: usize) -> Self {
        Workspace {
            // placeholder records; only [0, heap_len) and
            // [frozen_start, capacity) are ever read
            slots: vec![Record::new(0, 0.0); capacity],
            heap_len: 0,
            frozen_start: capacity,
        }
    }

    fn heap_len(&self) -> usize {
        self.heap_len
    }

    fn is_empty(&self) -> bool {
        self.heap_len == 0
    }

    fn has_frozen(&self) -> bool {
        self.frozen_start < self.slots.len()
    }

    /// Adds a record to the active heap region.
    fn insert(&mut self, record: Record) -> Result<(), CapacityError> {
        if self.heap_len == self.frozen_start {
            return Err(CapacityError {
                capacity: self.slots.len(),
            });
        }

        self.slots[self.heap_len] = record;
        self.heap_len += 1;
        heap::sift_up(&mut self.slots[..self.heap_len], self.heap_len - 1);
        return Ok(());
    }

    /// Returns the current minimum without removing it.
    fn peek_min(&self) -> Option<Record> {
        (self.heap_len > 0).then(|| self.slots[0])
    }

    /// Removes and returns the current minimum.
    fn pop_min(&mut self) -> Option<Record> {
        if self.heap_len == 0 {
            return None;
        }

        self.heap_len -= 1;
        self.slots.swap(0, self.heap_len);
        heap::sift_down(&mut self.slots[..self.heap_len], 0);
        return Some(self.slots[self.heap_len]);
    }

    /// Overwrites the minimum with `record` in place and returns the old
    /// minimum; a single O(log n) emit-and-insert step.
    fn replace_min(&mut self, record: Record) -> Option<Record> {
        if self.heap_len == 0 {
            return None;
        }

        let min = self.slots[0];
        self.slots[0] = record;
        heap::sift_down(&mut self.slots[..self.heap_len], 0);
        return Some(min);
    }

    /// Parks a record in the frozen region for the next run, shrinking the
    /// space available to the active heap by one slot.
    fn freeze(&mut self, record: Record) -> Result<(), CapacityError> {
        if self.heap_len == self.frozen_start {
            return Err(CapacityError {
                capacity: self.slots.len(),
            });
        }

        self.frozen_start -= 1;
        self.slots[self.frozen_start] = record;
        return Ok(());
    }

    /// Promotes the frozen region to become the active heap for the next
    /// run. The active region must be empty.
    fn promote_frozen(&mut self) {
        let capacity = self.slots.len();
        let frozen = capacity - self.frozen_start;

        self.slots.copy_within(self.frozen_start.., 0);
        self.heap_len = frozen;
        self.frozen_start = capacity;
        heap::heapify(&mut self.slots[..self.heap_len]);
    }
}

/// Runs replacement selection over `input`, writing sorted runs to
/// `run_file` and returning the tracker describing them.
///
/// The run file is created (or truncated). Empty input yields an empty
/// tracker and an empty run file. Every produced run except possibly the
/// last is at least as long as the working set
/// (`HEAP_BLOCKS × records_per_block` records).
pub fn generate_runs(
    input: &Path,
    run_file: &Path,
    records_per_block: usize,
) -> Result<RunTracker, SortError> {
    let capacity = HEAP_BLOCKS * records_per_block;

    let in_file = fs::File::open(input).map_err(|source| SortError::Open {
        path: input.into(),
        source,
    })?;
    let in_len = in_file.metadata().map_err(SortError::Io)?.len();

    let out_file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(run_file)
        .map_err(|source| SortError::Open {
            path: run_file.into(),
            source,
        })?;

    let mut reader = RecordCursor::new(BufferPool::new(in_file, records_per_block), 0, in_len);
    let mut writer = RecordWriter::new(BufferPool::new(out_file, records_per_block), 0);
    let mut workspace = Workspace::new(capacity);
    let mut tracker = RunTracker::new();

    // initial fill: up to one full working set
    while workspace.heap_len() < capacity {
        match reader.next_record()? {
            Some(record) => workspace.insert(record)?,
            None => break,
        }
    }
    log::debug!("initial working-set load: {} records", workspace.heap_len());

    let mut run_start = 0u64;
    let mut run_length = 0u64;

    while let Some(min) = workspace.peek_min() {
        // Decide where the emitted minimum's replacement goes: a key no
        // smaller than the outgoing minimum's may still join the current
        // run (ties included); smaller keys are frozen for the next run.
        let emitted = match reader.next_record()? {
            Some(next) if next.key().total_cmp(&min.key()).is_ge() => workspace.replace_min(next),
            Some(next) => {
                let emitted = workspace.pop_min();
                workspace.freeze(next)?;
                emitted
            }
            None => workspace.pop_min(),
        };

        if let Some(record) = emitted {
            writer.put_record(record)?;
            run_length += 1;
        }

        if workspace.is_empty() {
            tracker.push(Run::new(run_start, run_length));
            log::debug!("run closed: start={} length={}", run_start, run_length);
            run_start += run_length * RECORD_BYTES as u64;
            run_length = 0;

            if workspace.has_frozen() {
                workspace.promote_frozen();
            }
        }
    }

    writer.finish()?;
    log::info!(
        "replacement selection produced {} runs ({} records)",
        tracker.len(),
        tracker.total_records()
    );
    return Ok(tracker);
}
