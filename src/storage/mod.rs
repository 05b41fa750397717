//! Storage collaborators the engine moves bytes between.
//!
//! - `s3`: `ObjectStore` backed by `aws-sdk-s3` (AWS and S3-compatible providers)
//! - `retrying`: decorator applying the shared retry policy to any `ObjectStore`
//! - `http`: ranged GET source for plain HTTP(S) URLs
//! - `local`: local filesystem helpers (shared positioned file access, walking, rename)

use crate::{
    errors::StorageResult,
    models::{
        multipart::{InFlightUpload, UploadedPart},
        object::ObjectMetadata,
    },
};
use async_trait::async_trait;
use bytes::Bytes;

pub mod http;
pub mod local;
pub mod retrying;
pub mod s3;

/// Result of a HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub metadata: ObjectMetadata,
}

/// One entry of an object listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,

    /// Child prefixes, only populated when a delimiter was given.
    pub common_prefixes: Vec<String>,

    /// Token for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// The object-store operations the engine needs.
///
/// Ranges are inclusive on both ends, like HTTP `Range` headers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectHead>>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<Bytes>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> StorageResult<ListPage>;

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<InFlightUpload>>;

    async fn list_uploaded_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<UploadedPart>>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<String>;

    /// Upload one part; returns its entity tag.
    ///
    /// `content_md5` is the base64 MD5 digest of `body`.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: &str,
    ) -> StorageResult<String>;

    /// `parts` must be ordered by part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_md5: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()>;
}

/// Base64 MD5 digest, the form `Content-MD5` headers expect.
pub fn content_md5(data: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose};
    general_purpose::STANDARD.encode(md5::compute(data).0)
}
