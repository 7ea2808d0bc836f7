//! Multiway run merging.
//!
//! Combines the runs recorded in a [`RunTracker`] into one sorted run,
//! merging up to [`FAN_IN`] runs per group and iterating passes (ping-pong
//! between two scratch files) until a single run remains. At most `FAN_IN`
//! run buffers plus one output buffer are live during any group; the bound
//! is enforced by the merge heap's fixed capacity.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::{BufferPool, RecordCursor, RecordWriter};
use crate::heap::MinHeap;
use crate::record::{Record, RECORD_BYTES};
use crate::run::{Run, RunTracker};
use crate::sort::SortError;

/// Number of runs merged together in one group.
pub const FAN_IN: usize = 8;

/// Counters describing a completed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of full passes over the data. Merging `R` runs takes
    /// `⌈log₈ R⌉` passes.
    pub passes: usize,
    /// Total records carried through each pass.
    pub records: u64,
}

/// Result of merging a tracker down to a single run.
#[derive(Debug)]
pub struct MergeOutcome {
    /// Scratch file holding the final run.
    pub file: PathBuf,
    /// The final run descriptor.
    pub run: Run,
    pub stats: MergeStats,
}

/// A heap candidate: a record tagged with the index of the run (within the
/// current group) it was read from, so the drain loop knows which run to
/// refill from. Ordering follows the record; the tag merely rides along.
#[derive(Debug, PartialEq, Eq)]
struct MergeEntry {
    record: Record,
    run: usize,
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .cmp(&other.record)
            .then_with(|| self.run.cmp(&other.run))
    }
}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Multiway merge engine over a pair of scratch files.
pub struct MultiwayMerger {
    records_per_block: usize,
}

impl MultiwayMerger {
    /// Creates a merger using blocks of `records_per_block` records.
    pub fn new(records_per_block: usize) -> Self {
        MultiwayMerger { records_per_block }
    }

    /// Merges the tracked runs until one remains.
    ///
    /// `scratch[0]` must hold the runs described by `tracker`; passes
    /// alternate between the two scratch files. Returns where the final
    /// run ended up along with pass counters. An empty tracker yields an
    /// empty run.
    pub fn merge(&self, mut tracker: RunTracker, scratch: [&Path; 2]) -> Result<MergeOutcome, SortError> {
        let records = tracker.total_records();
        let mut current = 0;
        let mut passes = 0;

        while tracker.len() > 1 {
            log::debug!("merge pass {}: {} runs", passes + 1, tracker.len());
            let next = self.merge_pass(&tracker, scratch[current], scratch[1 - current])?;
            debug_assert_eq!(next.total_records(), tracker.total_records());

            tracker = next;
            current = 1 - current;
            passes += 1;
            log::info!("merge pass {} complete: {} runs remain", passes, tracker.len());
        }

        let run = tracker.get(0).copied().unwrap_or(Run::new(0, 0));
        return Ok(MergeOutcome {
            file: scratch[current].to_path_buf(),
            run,
            stats: MergeStats { passes, records },
        });
    }

    /// Runs one full pass: groups of up to [`FAN_IN`] consecutive runs from
    /// `tracker` (read from `input`) are each merged into one run written
    /// to `output`. Returns the tracker describing the new runs.
    fn merge_pass(
        &self,
        tracker: &RunTracker,
        input: &Path,
        output: &Path,
    ) -> Result<RunTracker, SortError> {
        let out_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)
            .map_err(|source| SortError::Open {
                path: output.into(),
                source,
            })?;
        let mut writer = RecordWriter::new(BufferPool::new(out_file, self.records_per_block), 0);

        let mut next = RunTracker::new();
        let mut out_offset = 0u64;

        let mut index = 0;
        while index < tracker.len() {
            let group: Vec<Run> = tracker.iter().skip(index).take(FAN_IN).copied().collect();
            index += group.len();

            let merged = self.merge_group(&group, input, &mut writer)?;
            next.push(Run::new(out_offset, merged));
            out_offset += merged * RECORD_BYTES as u64;
        }

        writer.finish()?;
        return Ok(next);
    }

    /// Merges one group of runs into the output writer, returning the
    /// number of records emitted.
    fn merge_group(
        &self,
        group: &[Run],
        input: &Path,
        writer: &mut RecordWriter,
    ) -> Result<u64, SortError> {
        // one cursor (and thus one buffer pool and file handle) per run
        let mut cursors = Vec::with_capacity(group.len());
        for run in group {
            let file = fs::File::open(input).map_err(|source| SortError::Open {
                path: input.into(),
                source,
            })?;
            let pool = BufferPool::new(file, self.records_per_block);
            cursors.push(RecordCursor::new(pool, run.start, run.end()));
        }

        // seed the heap with each run's first record
        let mut heap: MinHeap<MergeEntry> = MinHeap::with_capacity(FAN_IN);
        for (run, cursor) in cursors.iter_mut().enumerate() {
            if let Some(record) = cursor.next_record()? {
                heap.insert(MergeEntry { record, run })?;
            }
        }

        let mut emitted = 0u64;
        loop {
            let run = match heap.peek() {
                Some(entry) => entry.run,
                None => break,
            };

            // pull the replacement from the run that produced the minimum
            let entry = match cursors[run].next_record()? {
                Some(record) => heap.replace_root(MergeEntry { record, run }),
                None => heap.remove_min(),
            };

            if let Some(entry) = entry {
                writer.put_record(entry.record)?;
                emitted += 1;
            }
        }

        log::debug!("merged group of {} runs: {} records", group.len(), emitted);
        return Ok(emitted);
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rand::Rng;
    use rstest::*;

    use super::{MultiwayMerger, FAN_IN};
    use crate::buffer::{BufferPool, RecordCursor, RecordWriter};
    use crate::record::Record;
    use crate::run::{Run, RunTracker};

    const RECORDS_PER_BLOCK: usize = 4;

    /// Writes `runs` back to back into `path` and returns their tracker.
    fn write_runs(path: &Path, runs: &[Vec<Record>]) -> RunTracker {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .unwrap();
        let mut writer = RecordWriter::new(BufferPool::new(file, RECORDS_PER_BLOCK), 0);

        let mut tracker = RunTracker::new();
        let mut start = 0u64;
        for run in runs {
            for &record in run {
                writer.put_record(record).unwrap();
            }
            let descriptor = Run::new(start, run.len() as u64);
            start = descriptor.end();
            tracker.push(descriptor);
        }
        writer.finish().unwrap();
        return tracker;
    }

    fn read_all(path: &Path) -> Vec<Record> {
        let file = fs::File::open(path).unwrap();
        let mut cursor = RecordCursor::new(BufferPool::new(file, RECORDS_PER_BLOCK), 0, u64::MAX);
        let mut records = Vec::new();
        while let Some(record) = cursor.next_record().unwrap() {
            records.push(record);
        }
        return records;
    }

    /// Pre-sorted runs of varying lengths with interleaved key ranges.
    fn random_runs(count: usize) -> Vec<Vec<Record>> {
        let mut rng = rand::thread_rng();
        let mut id = 0i64;
        Vec::from_iter((0..count).map(|_| {
            let length = rng.gen_range(1..40);
            let mut keys = Vec::from_iter((0..length).map(|_| rng.gen_range(0.0..1000.0)));
            keys.sort_by(f64::total_cmp);
            Vec::from_iter(keys.into_iter().map(|key| {
                id += 1;
                Record::new(id, key)
            }))
        }))
    }

    #[rstest]
    // ⌈log₈ R⌉ passes: R runs with fan-in 8
    #[case(1, 0)]
    #[case(2, 1)]
    #[case(8, 1)]
    #[case(9, 2)]
    #[case(20, 2)]
    #[case(64, 2)]
    #[case(65, 3)]
    fn test_pass_count(#[case] run_count: usize, #[case] expected_passes: usize) {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");

        let runs = random_runs(run_count);
        let total: u64 = runs.iter().map(|run| run.len() as u64).sum();
        let tracker = write_runs(&first, &runs);

        let merger = MultiwayMerger::new(RECORDS_PER_BLOCK);
        let outcome = merger.merge(tracker, [&first, &second]).unwrap();

        assert_eq!(outcome.stats.passes, expected_passes);
        assert_eq!(outcome.stats.records, total);
        assert_eq!(outcome.run.length, total);
    }

    #[rstest]
    fn test_merged_output_is_sorted_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");

        let runs = random_runs(20);
        let mut expected: Vec<Record> = runs.iter().flatten().copied().collect();
        expected.sort();
        let tracker = write_runs(&first, &runs);

        let merger = MultiwayMerger::new(RECORDS_PER_BLOCK);
        let outcome = merger.merge(tracker, [&first, &second]).unwrap();

        let mut merged = read_all(&outcome.file);
        merged.truncate(outcome.run.length as usize);
        assert!(merged.windows(2).all(|pair| pair[0].key() <= pair[1].key()));

        // same multiset of records in and out
        let mut actual = merged;
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[rstest]
    fn test_record_count_conserved_across_each_pass() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");

        // 20 runs need two passes with fan-in 8
        let runs = random_runs(20);
        let tracker = write_runs(&first, &runs);
        let total = tracker.total_records();

        let merger = MultiwayMerger::new(RECORDS_PER_BLOCK);

        let after_first = merger.merge_pass(&tracker, &first, &second).unwrap();
        assert_eq!(after_first.len(), (20 + FAN_IN - 1) / FAN_IN);
        assert_eq!(after_first.total_records(), total);

        let after_second = merger.merge_pass(&after_first, &second, &first).unwrap();
        assert_eq!(after_second.len(), 1);
        assert_eq!(after_second.total_records(), total);
    }

    #[rstest]
    fn test_single_run_needs_no_pass() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");

        let runs = vec![Vec::from_iter((0..10).map(|i| Record::new(i, i as f64)))];
        let tracker = write_runs(&first, &runs);

        let merger = MultiwayMerger::new(RECORDS_PER_BLOCK);
        let outcome = merger.merge(tracker, [&first, &second]).unwrap();

        assert_eq!(outcome.stats.passes, 0);
        assert_eq!(outcome.file, first);
        assert_eq!(outcome.run, Run::new(0, 10));
    }

    #[rstest]
    fn test_empty_tracker_yields_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");
        fs::File::create(&first).unwrap();

        let merger = MultiwayMerger::new(RECORDS_PER_BLOCK);
        let outcome = merger.merge(RunTracker::new(), [&first, &second]).unwrap();

        assert_eq!(outcome.stats.passes, 0);
        assert_eq!(outcome.run, Run::new(0, 0));
    }

    #[rstest]
    fn test_runs_not_aligned_to_block_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");

        // lengths chosen so every run after the first starts mid-block
        let runs = vec![
            Vec::from_iter((0..3).map(|i| Record::new(i, 10.0 + i as f64))),
            Vec::from_iter((0..5).map(|i| Record::new(10 + i, 5.0 + i as f64))),
            Vec::from_iter((0..1).map(|i| Record::new(20 + i, 0.5))),
        ];
        let mut expected: Vec<Record> = runs.iter().flatten().copied().collect();
        expected.sort();
        let tracker = write_runs(&first, &runs);

        let merger = MultiwayMerger::new(RECORDS_PER_BLOCK);
        let outcome = merger.merge(tracker, [&first, &second]).unwrap();

        let merged = read_all(&outcome.file);
        assert_eq!(merged.len(), 9);
        let mut actual = merged.clone();
        actual.sort();
        assert_eq!(actual, expected);
        assert!(merged.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
