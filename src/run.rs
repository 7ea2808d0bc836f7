//! Run descriptors and the tracker that schedules them.

use crate::record::RECORD_BYTES;

/// One sorted run: `length` records stored contiguously at byte offset
/// `start` of a run file. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Byte offset of the first record.
    pub start: u64,
    /// Number of records in the run.
    pub length: u64,
}

impl Run {
    /// Creates a run descriptor.
    pub fn new(start: u64, length: u64) -> Self {
        Run { start, length }
    }

    /// Returns the run size in bytes.
    pub fn byte_len(&self) -> u64 {
        self.length * RECORD_BYTES as u64
    }

    /// Returns the byte offset one past the last record.
    pub fn end(&self) -> u64 {
        self.start + self.byte_len()
    }
}

/// Ordered collection of run descriptors in creation order.
///
/// Runs are appended as replacement selection closes them out and consumed
/// in order by the merge phase; each merge pass produces a brand-new
/// tracker rather than mutating the old one in place.
#[derive(Debug, Default)]
pub struct RunTracker {
    runs: Vec<Run>,
}

impl RunTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        RunTracker { runs: Vec::new() }
    }

    /// Appends a run at the tail.
    pub fn push(&mut self, run: Run) {
        self.runs.push(run);
    }

    /// Returns the run at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Run> {
        self.runs.get(index)
    }

    /// Removes and returns the run at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> Run {
        self.runs.remove(index)
    }

    /// Iterates runs in creation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Run> {
        self.runs.iter()
    }

    /// Returns the index of the first run starting at byte offset `start`.
    /// Linear scan; used for diagnostics, not on the hot path.
    pub fn position_by_start(&self, start: u64) -> Option<usize> {
        self.runs.iter().position(|run| run.start == start)
    }

    /// Checks whether any tracked run starts at byte offset `start`.
    pub fn contains_start(&self, start: u64) -> bool {
        self.position_by_start(start).is_some()
    }

    /// Returns the number of tracked runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Checks whether the tracker holds no runs.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Returns the total record count over all tracked runs.
    pub fn total_records(&self) -> u64 {
        self.runs.iter().map(|run| run.length).sum()
    }
}

impl<'a> IntoIterator for &'a RunTracker {
    type Item = &'a Run;
    type IntoIter = std::slice::Iter<'a, Run>;

    fn into_iter(self) -> Self::IntoIter {
        self.runs.iter()
    }
}
