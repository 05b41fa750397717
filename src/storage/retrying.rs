//! Applies the shared `RetryPolicy` to every call of an inner `ObjectStore`.

use super::{ListPage, ObjectHead, ObjectStore};
use crate::{
    errors::StorageResult,
    models::{
        multipart::{InFlightUpload, UploadedPart},
        object::ObjectMetadata,
    },
    services::retry::RetryPolicy,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct RetryingStore {
    inner: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ObjectStore for RetryingStore {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectHead>> {
        self.policy
            .run("head_object", || self.inner.head_object(bucket, key))
            .await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.policy
            .run("get_object", || self.inner.get_object(bucket, key))
            .await
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<Bytes> {
        self.policy
            .run("get_object_range", || {
                self.inner.get_object_range(bucket, key, start, end)
            })
            .await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> StorageResult<ListPage> {
        self.policy
            .run("list_objects", || {
                self.inner
                    .list_objects(bucket, prefix, delimiter, continuation)
            })
            .await
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<InFlightUpload>> {
        self.policy
            .run("list_multipart_uploads", || {
                self.inner.list_multipart_uploads(bucket, prefix)
            })
            .await
    }

    async fn list_uploaded_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<UploadedPart>> {
        self.policy
            .run("list_uploaded_parts", || {
                self.inner.list_uploaded_parts(bucket, key, upload_id)
            })
            .await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<String> {
        self.policy
            .run("create_multipart_upload", || {
                self.inner.create_multipart_upload(bucket, key, metadata)
            })
            .await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: &str,
    ) -> StorageResult<String> {
        self.policy
            .run("upload_part", || {
                self.inner.upload_part(
                    bucket,
                    key,
                    upload_id,
                    part_number,
                    body.clone(),
                    content_md5,
                )
            })
            .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        self.policy
            .run("complete_multipart_upload", || {
                self.inner
                    .complete_multipart_upload(bucket, key, upload_id, parts)
            })
            .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_md5: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        self.policy
            .run("put_object", || {
                self.inner
                    .put_object(bucket, key, body.clone(), content_md5, metadata)
            })
            .await
    }
}
