//! `runsort` is a bounded-memory external merge sort for files of
//! fixed-length binary records.
//!
//! Records are 16 bytes on disk — an 8-byte integer identifier followed by
//! an 8-byte IEEE-754 key, big-endian — and are ordered by key. Sorting
//! happens in two phases. During the first phase a heap-based
//! replacement-selection pass reads the input through a working set of 8
//! block buffers and writes sorted runs (typically about twice the
//! working-set size) to a scratch file. During the second phase those runs
//! are merged 8 at a time, pass after pass, until a single sorted run
//! remains and is written to the output path. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `runsort` provides the following guarantees:
//!
//! * **Bounded memory:**
//!   at most `8 × records_per_block` records are resident during run
//!   generation, and at most 8 run buffers plus one output buffer are open
//!   during any merge group. Both bounds are enforced by fixed-capacity
//!   structures, not by convention.
//! * **All-or-nothing:**
//!   a sort either completes with a fully sorted output holding the same
//!   multiset of records as the input, or fails with a [`SortError`] and
//!   makes no claim about the output. Intermediate files are cleaned up on
//!   both paths.
//! * **Single-threaded, synchronous:**
//!   no worker threads, no suspension; I/O blocks the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use runsort::ExternalSorterBuilder;
//!
//! fn main() {
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_records_per_block(512)
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter
//!         .sort_file(Path::new("records.bin"), Path::new("sorted.bin"))
//!         .unwrap();
//!
//!     println!(
//!         "{} records sorted in {} runs and {} merge passes",
//!         summary.records, summary.runs, summary.merge_passes
//!     );
//! }
//! ```

pub mod buffer;
pub mod heap;
pub mod merge;
pub mod record;
pub mod run;
pub mod selection;
pub mod sort;

pub use buffer::{BlockBuffer, BufferPool, RecordCursor, RecordWriter};
pub use heap::MinHeap;
pub use merge::{MergeStats, MultiwayMerger, FAN_IN};
pub use record::{Record, RECORD_BYTES};
pub use run::{Run, RunTracker};
pub use selection::{generate_runs, HEAP_BLOCKS};
pub use sort::{
    first_records, ExternalSorter, ExternalSorterBuilder, SortError, SortSummary,
    DEFAULT_RECORDS_PER_BLOCK,
};
