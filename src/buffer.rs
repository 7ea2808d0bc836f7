//! Block buffers and the single-buffer pool they live in.
//!
//! All file I/O in the engine goes through a [`BlockBuffer`]: one
//! block-sized byte window bound to a file offset. A [`BufferPool`] owns
//! exactly one file handle and materializes at most one buffer at a time,
//! flushing the outgoing window before the next one is loaded so no writes
//! are lost as the window slides forward.

use std::fs;
use std::io::prelude::*;
use std::io::SeekFrom;

use crate::record::{Record, RECORD_BYTES};
use crate::sort::SortError;

/// One in-memory window over a block-sized region of a file.
///
/// A buffer is used either for reading (constructed by loading the window
/// eagerly from the file; short loads at end-of-file are permitted) or for
/// writing (constructed empty and filled with [`BlockBuffer::put_record`]).
/// The two access patterns are never interleaved on the same window.
pub struct BlockBuffer {
    window: Vec<u8>,
    /// Maximum window size in bytes.
    limit: usize,
    /// Read cursor into `window`.
    pos: usize,
    /// Byte offset in the file this window is bound to.
    offset: u64,
    dirty: bool,
}

impl BlockBuffer {
    /// Loads a window of up to `limit` bytes from `file` at `offset`.
    ///
    /// A short load at end-of-file yields a partially filled window; a load
    /// that ends mid-record is a [`SortError::TruncatedRecord`].
    fn load(file: &mut fs::File, offset: u64, limit: usize) -> Result<Self, SortError> {
        file.seek(SeekFrom::Start(offset))
            .map_err(|source| SortError::Read { offset, source })?;

        let mut window = vec![0u8; limit];
        let mut filled = 0;
        while filled < limit {
            let read = file.read(&mut window[filled..]).map_err(|source| SortError::Read {
                offset: offset + filled as u64,
                source,
            })?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        window.truncate(filled);

        if filled % RECORD_BYTES != 0 {
            return Err(SortError::TruncatedRecord {
                offset: offset + (filled - filled % RECORD_BYTES) as u64,
            });
        }

        return Ok(BlockBuffer {
            window,
            limit,
            pos: 0,
            offset,
            dirty: false,
        });
    }

    /// Creates an empty write window of up to `limit` bytes bound to
    /// `offset`.
    fn fresh(offset: u64, limit: usize) -> Self {
        BlockBuffer {
            window: Vec::with_capacity(limit),
            limit,
            pos: 0,
            offset,
            dirty: false,
        }
    }

    /// Decodes and returns the next record in the window, advancing the
    /// cursor. Returns [`None`] once fewer than [`RECORD_BYTES`] bytes
    /// remain.
    pub fn get_next_record(&mut self) -> Option<Record> {
        if self.pos + RECORD_BYTES > self.window.len() {
            return None;
        }

        let record = Record::decode(&self.window[self.pos..self.pos + RECORD_BYTES]);
        self.pos += RECORD_BYTES;
        return Some(record);
    }

    /// Encodes and appends a record to the window, marking it dirty.
    /// Returns `false` (leaving the window untouched) if the window is
    /// full.
    pub fn put_record(&mut self, record: Record) -> bool {
        if self.is_full() {
            return false;
        }

        let mut encoded = [0u8; RECORD_BYTES];
        record.encode(&mut encoded);
        self.window.extend_from_slice(&encoded);
        self.dirty = true;
        return true;
    }

    /// Checks whether at least one more record can be read from the window.
    pub fn has_remaining(&self) -> bool {
        self.pos + RECORD_BYTES <= self.window.len()
    }

    /// Checks whether the window has no room left for another record.
    pub fn is_full(&self) -> bool {
        self.window.len() + RECORD_BYTES > self.limit
    }

    /// Returns the number of valid bytes in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Checks whether the window holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Returns the byte offset the window is bound to.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Checks whether the window holds unwritten records.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the window back to `file` at its bound offset if it is dirty;
    /// a no-op otherwise. Only the valid prefix of the window is written,
    /// so a short final block does not pad the file.
    pub fn flush(&mut self, file: &mut fs::File) -> Result<(), SortError> {
        if !self.dirty {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset)).map_err(|source| SortError::Write {
            offset: self.offset,
            source,
        })?;
        file.write_all(&self.window).map_err(|source| SortError::Write {
            offset: self.offset,
            source,
        })?;
        self.dirty = false;
        return Ok(());
    }
}

/// Owns one file handle and the single live [`BlockBuffer`] bound to it.
///
/// Requesting a buffer at a new offset flushes the outgoing buffer first,
/// so the read/write window can slide forward without losing writes.
pub struct BufferPool {
    file: fs::File,
    block_bytes: usize,
    current: Option<BlockBuffer>,
}

impl BufferPool {
    /// Creates a pool over an open file, with blocks of
    /// `records_per_block` records.
    pub fn new(file: fs::File, records_per_block: usize) -> Self {
        BufferPool {
            file,
            block_bytes: records_per_block * RECORD_BYTES,
            current: None,
        }
    }

    /// Returns the block size in bytes.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Flushes the current buffer and loads a read window at `offset`.
    ///
    /// The window spans up to one block, further capped by `bound` bytes so
    /// a window never reads past the end of the run it belongs to.
    pub fn get_buffer_at(&mut self, offset: u64, bound: u64) -> Result<&mut BlockBuffer, SortError> {
        self.flush()?;
        let limit = (self.block_bytes as u64).min(bound) as usize;
        let buffer = BlockBuffer::load(&mut self.file, offset, limit)?;
        return Ok(self.current.insert(buffer));
    }

    /// Flushes the current buffer and binds a fresh, empty write window at
    /// `offset`.
    pub fn put_buffer_at(&mut self, offset: u64) -> Result<&mut BlockBuffer, SortError> {
        self.flush()?;
        return Ok(self.current.insert(BlockBuffer::fresh(offset, self.block_bytes)));
    }

    /// Returns the live buffer, if any.
    pub fn current_buffer(&mut self) -> Option<&mut BlockBuffer> {
        self.current.as_mut()
    }

    /// Flushes the live buffer if it is dirty.
    pub fn flush(&mut self) -> Result<(), SortError> {
        if let Some(buffer) = self.current.as_mut() {
            buffer.flush(&mut self.file)?;
        }
        return Ok(());
    }
}

impl Drop for BufferPool {
    // backstop only; owners flush explicitly on success paths
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("buffer flush on drop failed: {}", err);
        }
    }
}

/// Sequential record reader over the byte range `[start, end)` of a file,
/// sliding one block window at a time through a [`BufferPool`].
pub struct RecordCursor {
    pool: BufferPool,
    /// Offset the next window will be loaded at.
    offset: u64,
    end: u64,
}

impl RecordCursor {
    /// Creates a cursor over `[start, end)`. The pool must be freshly
    /// constructed (no live buffer).
    pub fn new(pool: BufferPool, start: u64, end: u64) -> Self {
        RecordCursor {
            pool,
            offset: start,
            end,
        }
    }

    /// Returns the next record, or [`None`] once the range (or the file)
    /// is exhausted.
    pub fn next_record(&mut self) -> Result<Option<Record>, SortError> {
        loop {
            if let Some(buffer) = self.pool.current_buffer() {
                if let Some(record) = buffer.get_next_record() {
                    return Ok(Some(record));
                }
            }

            if self.offset >= self.end {
                return Ok(None);
            }

            let buffer = self.pool.get_buffer_at(self.offset, self.end - self.offset)?;
            if buffer.is_empty() {
                // end of file reached before the declared bound
                return Ok(None);
            }
            self.offset += buffer.len() as u64;
        }
    }
}

/// Sequential record writer that fills one block window at a time,
/// flushing each filled window through its [`BufferPool`] before sliding
/// to the next block offset.
pub struct RecordWriter {
    pool: BufferPool,
    /// Offset the next window will be bound to.
    offset: u64,
    written: u64,
}

impl RecordWriter {
    /// Creates a writer appending from the block-aligned `start` offset.
    pub fn new(pool: BufferPool, start: u64) -> Self {
        RecordWriter {
            pool,
            offset: start,
            written: 0,
        }
    }

    /// Appends one record, sliding to a new block window when the current
    /// one fills up.
    pub fn put_record(&mut self, record: Record) -> Result<(), SortError> {
        loop {
            if let Some(buffer) = self.pool.current_buffer() {
                if buffer.put_record(record) {
                    self.written += 1;
                    return Ok(());
                }
            }

            let next = self.offset;
            self.offset += self.pool.block_bytes() as u64;
            self.pool.put_buffer_at(next)?;
        }
    }

    /// Returns the number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes the final, possibly short, window.
    pub fn finish(mut self) -> Result<(), SortError> {
        self.pool.flush()
    }
}
