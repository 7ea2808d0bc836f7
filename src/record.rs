//! Fixed-length binary record.

use std::cmp::Ordering;

/// Number of bytes a record occupies on disk.
pub const RECORD_BYTES: usize = 16;

/// A single fixed-size record: an 8-byte integer identifier followed by an
/// 8-byte IEEE-754 key. Records are immutable once constructed and are
/// ordered by key; the identifier only breaks ties so that the order is
/// total.
///
/// The on-disk layout is big-endian: bytes 0–7 hold the identifier, bytes
/// 8–15 hold the key.
#[derive(Debug, Clone, Copy)]
pub struct Record {
    id: i64,
    key: f64,
}

impl Record {
    /// Creates a record from its identifier and sort key.
    pub fn new(id: i64, key: f64) -> Self {
        Record { id, key }
    }

    /// Returns the record identifier.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the sort key.
    pub fn key(&self) -> f64 {
        self.key
    }

    /// Encodes the record into its 16-byte big-endian on-disk layout.
    ///
    /// `buf` must be exactly [`RECORD_BYTES`] long.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.id.to_be_bytes());
        buf[8..RECORD_BYTES].copy_from_slice(&self.key.to_be_bytes());
    }

    /// Decodes a record from its 16-byte big-endian on-disk layout.
    ///
    /// `buf` must be exactly [`RECORD_BYTES`] long.
    pub fn decode(buf: &[u8]) -> Self {
        let mut id_bytes = [0u8; 8];
        let mut key_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&buf[..8]);
        key_bytes.copy_from_slice(&buf[8..RECORD_BYTES]);

        Record {
            id: i64::from_be_bytes(id_bytes),
            key: f64::from_be_bytes(key_bytes),
        }
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        // total_cmp keeps the order total even for NaN keys
        self.key
            .total_cmp(&other.key)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Record {}
