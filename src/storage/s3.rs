//! S3Store: `ObjectStore` over `aws-sdk-s3`, for AWS and S3-compatible
//! providers reached through a custom endpoint.
//!
//! The SDK's own retries are disabled; callers wrap the store in
//! `RetryingStore` so that one policy governs every attempt.

use super::{ListPage, ListedObject, ObjectHead, ObjectStore};
use crate::{
    errors::{StorageError, StorageResult},
    models::{
        multipart::{InFlightUpload, UploadedPart},
        object::ObjectMetadata,
    },
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, retry::RetryConfig, timeout::TimeoutConfig};
use aws_sdk_s3::{
    Client,
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl, RequestPayer, StorageClass},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, time::Duration};
use tracing::debug;

/// How to reach one bucket.
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    /// Named profile from the shared AWS config/credentials files.
    pub profile: Option<String>,
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible providers (path-style addressing).
    pub endpoint: Option<String>,

    /// Send unsigned requests (public buckets).
    pub no_sign_request: bool,

    /// Add `x-amz-request-payer: requester` on reads.
    pub request_payer: bool,

    /// Storage class applied to objects this store writes.
    pub storage_class: Option<String>,

    /// Canned ACL applied to objects this store writes.
    pub acl: Option<String>,

    pub timeout: Duration,
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    request_payer: bool,
    storage_class: Option<StorageClass>,
    acl: Option<ObjectCannedAcl>,
}

impl S3Store {
    pub async fn connect(options: &S3Options) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(options.timeout)
                    .build(),
            );
        if let Some(profile) = &options.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if options.no_sign_request {
            loader = loader.no_credentials();
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::from_client(Client::from_conf(builder.build()), options)
    }

    pub fn from_client(client: Client, options: &S3Options) -> Self {
        Self {
            client,
            request_payer: options.request_payer,
            storage_class: options.storage_class.as_deref().map(StorageClass::from),
            acl: options.acl.as_deref().map(ObjectCannedAcl::from),
        }
    }

    fn request_payer(&self) -> Option<RequestPayer> {
        self.request_payer.then_some(RequestPayer::Requester)
    }
}

fn user_metadata(metadata: &ObjectMetadata) -> Option<HashMap<String, String>> {
    if metadata.user.is_empty() {
        None
    } else {
        Some(metadata.user.clone().into_iter().collect())
    }
}

/// Map an SDK error onto the transient/permanent split.
fn classify<E>(operation: &'static str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::transient(operation, message)
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let throttled = matches!(
                service.err().code(),
                Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable")
            );
            if status >= 500 || status == 429 || throttled {
                StorageError::transient(operation, message)
            } else {
                StorageError::permanent(operation, message)
            }
        }
        _ => StorageError::permanent(operation, message),
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service) if service.raw().status().as_u16() == 404)
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos()).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectHead>> {
        let output = match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_request_payer(self.request_payer())
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => return Ok(None),
            Err(err) => return Err(classify("head_object", err)),
        };

        let metadata = ObjectMetadata {
            content_type: output.content_type().map(str::to_string),
            content_encoding: output.content_encoding().map(str::to_string),
            content_language: output.content_language().map(str::to_string),
            cache_control: output.cache_control().map(str::to_string),
            content_disposition: output.content_disposition().map(str::to_string),
            user: output
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        };
        Ok(Some(ObjectHead {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            metadata,
        }))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(|err| classify("get_object", err))?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::transient("get_object", err.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<Bytes> {
        debug!(bucket, key, start, end, "ranged GET");
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(format!("bytes={}-{}", start, end))
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(|err| classify("get_object_range", err))?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::transient("get_object_range", err.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> StorageResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .set_continuation_token(continuation.map(str::to_string))
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(|err| classify("list_objects", err))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ListedObject {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();
        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(str::to_string))
            .collect();
        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_token,
        })
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<InFlightUpload>> {
        let mut uploads = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .map_err(|err| classify("list_multipart_uploads", err))?;

            uploads.extend(output.uploads().iter().filter_map(|upload| {
                Some(InFlightUpload {
                    key: upload.key()?.to_string(),
                    upload_id: upload.upload_id()?.to_string(),
                    initiated_at: upload
                        .initiated()
                        .map(to_chrono)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                })
            }));

            if !output.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = output.next_key_marker().map(str::to_string);
            upload_id_marker = output.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }
        Ok(uploads)
    }

    async fn list_uploaded_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<UploadedPart>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_parts()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await
                .map_err(|err| classify("list_uploaded_parts", err))?;

            parts.extend(output.parts().iter().filter_map(|part| {
                Some(UploadedPart {
                    part_number: part.part_number()?,
                    etag: part.e_tag()?.to_string(),
                    size: part.size().map(|s| s.max(0) as u64),
                })
            }));

            if !output.is_truncated().unwrap_or(false) {
                break;
            }
            marker = output.next_part_number_marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }
        Ok(parts)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_storage_class(self.storage_class.clone())
            .set_acl(self.acl.clone())
            .set_content_type(metadata.content_type.clone())
            .set_content_encoding(metadata.content_encoding.clone())
            .set_content_language(metadata.content_language.clone())
            .set_cache_control(metadata.cache_control.clone())
            .set_content_disposition(metadata.content_disposition.clone())
            .set_metadata(user_metadata(metadata))
            .send()
            .await
            .map_err(|err| classify("create_multipart_upload", err))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::permanent("create_multipart_upload", "missing UploadId"))
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
        let length = body.len() as i64;
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(length)
            .content_md5(content_md5)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| classify("upload_part", err))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StorageError::permanent("upload_part", "missing ETag"))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(part.etag.clone())
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| classify("complete_multipart_upload", err))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_md5: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        let length = body.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(length)
            .content_md5(content_md5)
            .set_storage_class(self.storage_class.clone())
            .set_acl(self.acl.clone())
            .set_content_type(metadata.content_type.clone())
            .set_content_encoding(metadata.content_encoding.clone())
            .set_content_language(metadata.content_language.clone())
            .set_cache_control(metadata.cache_control.clone())
            .set_content_disposition(metadata.content_disposition.clone())
            .set_metadata(user_metadata(metadata))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| classify("put_object", err))?;
        Ok(())
    }
}
