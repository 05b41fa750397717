//! Represents one contiguous byte range of an object.

use serde::Serialize;

/// A part derived from a chunk plan. Never persisted; only its completion is.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartDescriptor {
    /// Part number (1-based).
    pub part_number: i32,

    /// Byte offset of the first byte of this part.
    pub offset: u64,

    /// Length in bytes. Only the final part may be shorter than the chunk size.
    pub length: u64,

    /// Number of parts in the whole object.
    pub total_parts: i32,
}

impl PartDescriptor {
    /// Inclusive end offset, as used by HTTP `Range` headers.
    ///
    /// Only meaningful for non-empty parts.
    pub fn last_byte(&self) -> u64 {
        self.offset + self.length.saturating_sub(1)
    }
}

/// A part that has been written at the destination.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,

    /// Entity tag returned by remote multipart storage. `None` for local writes.
    pub etag: Option<String>,
}
