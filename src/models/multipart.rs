//! Represents destination-side multipart upload sessions and their parts.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An in-flight multipart upload found on the destination.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct InFlightUpload {
    /// Object key being uploaded.
    pub key: String,

    /// Unique upload ID assigned by the destination.
    pub upload_id: String,

    /// When the upload was initiated.
    pub initiated_at: DateTime<Utc>,
}

/// A part the destination already holds for some upload.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    /// Part number (1-based).
    pub part_number: i32,

    /// ETag hash for this part.
    pub etag: String,

    /// Size in bytes, when the destination reports it.
    pub size: Option<u64>,
}
