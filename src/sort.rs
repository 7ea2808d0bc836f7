//! External sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use crate::buffer::BufferPool;
use crate::heap::CapacityError;
use crate::merge::MultiwayMerger;
use crate::record::{Record, RECORD_BYTES};
use crate::run::Run;
use crate::selection;

/// Reference block size: 512 records, 8192 bytes.
pub const DEFAULT_RECORDS_PER_BLOCK: usize = 512;

/// Sorting error. All variants are fatal: a sort either completes or makes
/// no claim about the output, and the engine never retries.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// File open/creation error.
    Open { path: PathBuf, source: io::Error },
    /// Read failure at a byte offset.
    Read { offset: u64, source: io::Error },
    /// Write failure at a byte offset.
    Write { offset: u64, source: io::Error },
    /// Common I/O error.
    Io(io::Error),
    /// A partial record (shorter than 16 bytes) found before true
    /// end-of-file; the engine refuses to sort garbage.
    TruncatedRecord { offset: u64 },
    /// A fixed-capacity heap overflowed. This is a logic error in run or
    /// merge-group scheduling, not a user-recoverable condition.
    HeapCapacity { capacity: usize },
    /// Invalid sorter configuration.
    Config(&'static str),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::Open { source, .. } => Some(source),
            SortError::Read { source, .. } => Some(source),
            SortError::Write { source, .. } => Some(source),
            SortError::Io(err) => Some(err),
            SortError::TruncatedRecord { .. } => None,
            SortError::HeapCapacity { .. } => None,
            SortError::Config(..) => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::Open { path, source } => {
                write!(f, "file {} not opened: {}", path.display(), source)
            }
            SortError::Read { offset, source } => {
                write!(f, "read at byte offset {} failed: {}", offset, source)
            }
            SortError::Write { offset, source } => {
                write!(f, "write at byte offset {} failed: {}", offset, source)
            }
            SortError::Io(err) => write!(f, "I/O operation failed: {}", err),
            SortError::TruncatedRecord { offset } => {
                write!(f, "truncated record at byte offset {}", offset)
            }
            SortError::HeapCapacity { capacity } => {
                write!(f, "heap capacity of {} records exceeded", capacity)
            }
            SortError::Config(message) => write!(f, "invalid configuration: {}", message),
        }
    }
}

impl From<CapacityError> for SortError {
    fn from(err: CapacityError) -> Self {
        SortError::HeapCapacity {
            capacity: err.capacity,
        }
    }
}

/// Counters describing a completed sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSummary {
    /// Total records sorted.
    pub records: u64,
    /// Runs produced by replacement selection.
    pub runs: usize,
    /// Merge passes taken to reduce those runs to one.
    pub merge_passes: usize,
}

/// External sorter builder. Provides methods for [`ExternalSorter`]
/// initialization.
#[derive(Debug, Clone, Default)]
pub struct ExternalSorterBuilder {
    /// Records per block; block size in bytes is this times 16.
    records_per_block: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(self.records_per_block, self.tmp_dir.as_deref())
    }

    /// Sets the block size in records.
    pub fn with_records_per_block(mut self, records_per_block: usize) -> ExternalSorterBuilder {
        self.records_per_block = Some(records_per_block);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }
}

/// External sorter for files of fixed-length binary records.
///
/// Runs single-threaded with bounded working memory: replacement selection
/// holds at most `8 × records_per_block` records, and every merge group
/// holds at most 8 run buffers plus one output buffer.
pub struct ExternalSorter {
    records_per_block: usize,
    /// Owns the intermediate run files; deleted on drop, success or not.
    tmp_dir: tempfile::TempDir,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `records_per_block` - Block size in records. If the parameter is
    ///   [`None`] the reference size of [`DEFAULT_RECORDS_PER_BLOCK`] is
    ///   used.
    /// * `tmp_path` - Directory to be used to store temporary data. If the
    ///   parameter is [`None`] the default OS temporary directory will be
    ///   used.
    pub fn new(records_per_block: Option<usize>, tmp_path: Option<&Path>) -> Result<Self, SortError> {
        let records_per_block = records_per_block.unwrap_or(DEFAULT_RECORDS_PER_BLOCK);
        if records_per_block == 0 {
            return Err(SortError::Config("records_per_block must be at least 1"));
        }

        return Ok(ExternalSorter {
            records_per_block,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
        });
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts the records of `input` into `output`.
    ///
    /// `output` may equal `input`: the input is fully consumed into the
    /// scratch run file before the output is opened. On failure no claim is
    /// made about the output's contents; intermediate files are removed
    /// either way.
    ///
    /// # Arguments
    /// * `input` - File of zero or more 16-byte records
    /// * `output` - Destination for the fully sorted records
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortSummary, SortError> {
        let run_file = self.tmp_dir.path().join("runs.bin");
        let merge_file = self.tmp_dir.path().join("merge.bin");

        let tracker = selection::generate_runs(input, &run_file, self.records_per_block)?;
        let records = tracker.total_records();
        let runs = tracker.len();

        if tracker.is_empty() {
            // empty input sorts to an empty output
            fs::File::create(output).map_err(|source| SortError::Open {
                path: output.into(),
                source,
            })?;
            return Ok(SortSummary {
                records: 0,
                runs: 0,
                merge_passes: 0,
            });
        }

        let merger = MultiwayMerger::new(self.records_per_block);
        let outcome = merger.merge(tracker, [&run_file, &merge_file])?;

        self.export_run(&outcome.file, outcome.run, output)?;
        log::info!(
            "sorted {} records: {} runs, {} merge passes",
            records,
            runs,
            outcome.stats.passes
        );

        return Ok(SortSummary {
            records,
            runs,
            merge_passes: outcome.stats.passes,
        });
    }

    /// Copies the final run out of its scratch file to the output path.
    fn export_run(&self, scratch: &Path, run: Run, output: &Path) -> Result<(), SortError> {
        let mut scratch_file = fs::File::open(scratch).map_err(|source| SortError::Open {
            path: scratch.into(),
            source,
        })?;
        scratch_file
            .seek(SeekFrom::Start(run.start))
            .map_err(SortError::Io)?;
        let mut reader = io::BufReader::new(scratch_file).take(run.byte_len());

        let out_file = fs::File::create(output).map_err(|source| SortError::Open {
            path: output.into(),
            source,
        })?;
        let mut writer = io::BufWriter::new(out_file);

        io::copy(&mut reader, &mut writer).map_err(SortError::Io)?;
        writer.flush().map_err(SortError::Io)?;
        return Ok(());
    }
}

/// Decodes the first record of each block of `path`.
///
/// A reporting convenience layered on top of the sort, not part of its
/// contract; the final, possibly short, block contributes a record as long
/// as it holds at least one.
pub fn first_records(path: &Path, records_per_block: usize) -> Result<Vec<Record>, SortError> {
    let file = fs::File::open(path).map_err(|source| SortError::Open {
        path: path.into(),
        source,
    })?;
    let file_len = file.metadata().map_err(SortError::Io)?.len();
    let block_bytes = (records_per_block * RECORD_BYTES) as u64;

    let mut pool = BufferPool::new(file, records_per_block);
    let mut firsts = Vec::new();
    let mut offset = 0;
    while offset < file_len {
        let buffer = pool.get_buffer_at(offset, block_bytes)?;
        if let Some(record) = buffer.get_next_record() {
            firsts.push(record);
        }
        offset += block_bytes;
    }

    return Ok(firsts);
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{first_records, ExternalSorter, ExternalSorterBuilder, SortError};
    use crate::buffer::{BufferPool, RecordCursor, RecordWriter};
    use crate::record::Record;

    const RECORDS_PER_BLOCK: usize = 4;

    fn write_records(path: &Path, records: &[Record]) {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .unwrap();
        let mut writer = RecordWriter::new(BufferPool::new(file, RECORDS_PER_BLOCK), 0);
        for &record in records {
            writer.put_record(record).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_records(path: &Path) -> Vec<Record> {
        let file = fs::File::open(path).unwrap();
        let mut cursor = RecordCursor::new(BufferPool::new(file, RECORDS_PER_BLOCK), 0, u64::MAX);
        let mut records = Vec::new();
        while let Some(record) = cursor.next_record().unwrap() {
            records.push(record);
        }
        return records;
    }

    fn sorter(dir: &Path) -> ExternalSorter {
        ExternalSorterBuilder::new()
            .with_records_per_block(RECORDS_PER_BLOCK)
            .with_tmp_dir(dir)
            .build()
            .unwrap()
    }

    #[rstest]
    // enough records for several working sets and a short final block
    #[case(1000)]
    // ten working sets plus a ragged tail
    #[case(323)]
    // a single working set
    #[case(32)]
    // a single block
    #[case(3)]
    fn test_sort_file_end_to_end(#[case] count: usize) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.bin");

        let mut records = Vec::from_iter((0..count).map(|i| Record::new(i as i64, i as f64)));
        records.shuffle(&mut rand::thread_rng());
        write_records(&input, &records);

        let summary = sorter(dir.path()).sort_file(&input, &output).unwrap();
        assert_eq!(summary.records, count as u64);

        let sorted = read_records(&output);
        assert_eq!(sorted.len(), count);
        assert!(sorted.windows(2).all(|pair| pair[0].key() <= pair[1].key()));

        // same multiset of records in and out
        let mut expected = records;
        expected.sort();
        let mut actual = sorted;
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[rstest]
    fn test_empty_input_sorts_to_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.bin");
        write_records(&input, &[]);

        let summary = sorter(dir.path()).sort_file(&input, &output).unwrap();

        assert_eq!(summary.records, 0);
        assert_eq!(summary.runs, 0);
        assert_eq!(summary.merge_passes, 0);
        assert_eq!(fs::metadata(&output).unwrap().len(), 0);
    }

    #[rstest]
    fn test_single_record_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.bin");
        write_records(&input, &[Record::new(7, 3.5)]);

        let summary = sorter(dir.path()).sort_file(&input, &output).unwrap();

        assert_eq!(summary.records, 1);
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.merge_passes, 0);
        assert_eq!(read_records(&output), vec![Record::new(7, 3.5)]);
    }

    #[rstest]
    fn test_sorting_a_sorted_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        let output1 = dir.path().join("output1.bin");
        let output2 = dir.path().join("output2.bin");

        let mut records = Vec::from_iter((0..200).map(|i| Record::new(i as i64, i as f64)));
        records.shuffle(&mut rand::thread_rng());
        write_records(&input, &records);

        sorter(dir.path()).sort_file(&input, &output1).unwrap();
        sorter(dir.path()).sort_file(&output1, &output2).unwrap();

        assert_eq!(fs::read(&output1).unwrap(), fs::read(&output2).unwrap());
    }

    #[rstest]
    fn test_sort_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");

        let mut records = Vec::from_iter((0..100).map(|i| Record::new(i as i64, i as f64)));
        records.shuffle(&mut rand::thread_rng());
        write_records(&input, &records);

        let summary = sorter(dir.path()).sort_file(&input, &input).unwrap();
        assert_eq!(summary.records, 100);

        let sorted = read_records(&input);
        assert_eq!(sorted.len(), 100);
        assert!(sorted.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[rstest]
    fn test_intermediate_files_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.bin");

        let mut records = Vec::from_iter((0..100).map(|i| Record::new(i as i64, i as f64)));
        records.shuffle(&mut rand::thread_rng());
        write_records(&input, &records);

        {
            let sorter = ExternalSorterBuilder::new()
                .with_records_per_block(RECORDS_PER_BLOCK)
                .with_tmp_dir(&scratch)
                .build()
                .unwrap();
            sorter.sort_file(&input, &output).unwrap();
        }

        // the sorter's temporary directory is gone once it is dropped
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[rstest]
    fn test_zero_records_per_block_rejected() {
        let err = ExternalSorterBuilder::new()
            .with_records_per_block(0)
            .build()
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, SortError::Config(..)));
    }

    #[rstest]
    fn test_first_records_per_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        // two full blocks and a short final one
        let records = Vec::from_iter((0..9).map(|i| Record::new(i as i64, i as f64)));
        write_records(&path, &records);

        let firsts = first_records(&path, RECORDS_PER_BLOCK).unwrap();
        assert_eq!(firsts, vec![records[0], records[4], records[8]]);
    }
}
