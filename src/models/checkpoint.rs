//! Represents a durable record that one part of one object was transferred.

use serde::Serialize;
use sqlx::FromRow;

/// A row of the checkpoint table.
///
/// Several rows may exist for the same `(key, bucket, part)`; readers only
/// ever look at distinct part numbers.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Random identifier, unique per insert.
    pub id: String,

    /// Object key (or local path) the part belongs to.
    pub key: String,

    /// Bucket of the object, empty for local destinations.
    pub bucket: String,

    /// Part number (1-based).
    pub part: i64,

    /// Byte range the part covered when it was written. A later run with a
    /// different chunk plan must not trust the part number alone.
    pub part_offset: i64,
    pub part_length: i64,

    /// Entity tag of the part when the destination is remote multipart storage.
    pub etag: Option<String>,
}

/// The byte range one checkpointed part vouches for.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointedRange {
    pub part: i32,
    pub offset: u64,
    pub length: u64,
}
