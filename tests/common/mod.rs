//! In-memory `ObjectStore` for integration tests.
//!
//! Counts concurrent part operations, injects a pseudo-random delay per
//! call, and fails chosen parts or ranges on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use s3trans::{
    config::TransferConfig,
    errors::{StorageError, StorageResult},
    models::{
        multipart::{InFlightUpload, UploadedPart},
        object::ObjectMetadata,
    },
    services::{
        checkpoint_store::CheckpointStore, ignore::IgnoreList, orchestrator::TransferEngine,
        retry::RetryPolicy,
    },
    storage::{ListPage, ListedObject, ObjectHead, ObjectStore, content_md5},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const KB: u64 = 1024;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

struct Upload {
    bucket: String,
    key: String,
    initiated_at: DateTime<Utc>,
    metadata: ObjectMetadata,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    uploads: HashMap<String, Upload>,
    next_upload: u64,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
    max_delay_ms: AtomicU64,
    seed: AtomicU64,
    page_size: AtomicUsize,

    in_flight: AtomicUsize,
    peak: AtomicUsize,

    pub upload_part_calls: AtomicUsize,
    pub range_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub create_calls: AtomicUsize,

    failing_parts: Mutex<BTreeSet<i32>>,
    failing_offsets: Mutex<BTreeSet<u64>>,
    fail_upload_listing: AtomicBool,
}

/// Decrements the in-flight counter when a part operation ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn etag_of(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

/// Deterministic test payload of `len` bytes.
pub fn payload(len: u64) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
            .collect::<Vec<_>>(),
    )
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seed: AtomicU64::new(0x9E37_79B9_7F4A_7C15),
            page_size: AtomicUsize::new(1000),
            ..Default::default()
        })
    }

    pub fn with_delay(self: Arc<Self>, max_delay_ms: u64) -> Arc<Self> {
        self.max_delay_ms.store(max_delay_ms, Ordering::SeqCst);
        self
    }

    pub fn with_page_size(self: Arc<Self>, page_size: usize) -> Arc<Self> {
        self.page_size.store(page_size.max(1), Ordering::SeqCst);
        self
    }

    pub fn put(&self, bucket: &str, key: &str, data: Bytes) {
        self.put_with_metadata(bucket, key, data, ObjectMetadata::default());
    }

    pub fn put_with_metadata(&self, bucket: &str, key: &str, data: Bytes, metadata: ObjectMetadata) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((bucket.into(), key.into()), StoredObject { data, metadata });
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    pub fn uploaded_part_numbers(&self, upload_id: &str) -> Vec<i32> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn fail_parts(&self, parts: impl IntoIterator<Item = i32>) {
        self.failing_parts.lock().unwrap().extend(parts);
    }

    pub fn fail_offsets(&self, offsets: impl IntoIterator<Item = u64>) {
        self.failing_offsets.lock().unwrap().extend(offsets);
    }

    pub fn fail_upload_listing(&self, fail: bool) {
        self.fail_upload_listing.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing_parts.lock().unwrap().clear();
        self.failing_offsets.lock().unwrap().clear();
        self.fail_upload_listing.store(false, Ordering::SeqCst);
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        for counter in [
            &self.upload_part_calls,
            &self.range_calls,
            &self.put_calls,
            &self.complete_calls,
            &self.head_calls,
            &self.create_calls,
            &self.peak,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Insert an in-flight upload holding the given parts, as an
    /// interrupted earlier run would have left behind.
    pub fn seed_upload(&self, bucket: &str, key: &str, parts: &[(i32, Bytes)], age_secs: i64) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("seeded-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: bucket.into(),
                key: key.into(),
                initiated_at: Utc::now() - ChronoDuration::seconds(age_secs),
                metadata: ObjectMetadata::default(),
                parts: parts
                    .iter()
                    .map(|(n, data)| (*n, (data.clone(), etag_of(data))))
                    .collect(),
            },
        );
        upload_id
    }

    async fn jitter(&self) {
        let max = self.max_delay_ms.load(Ordering::SeqCst);
        if max == 0 {
            return;
        }
        // xorshift
        let mut x = self.seed.load(Ordering::SeqCst);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.seed.store(x, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(x % (max + 1))).await;
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

fn not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::NotFound {
        bucket: bucket.into(),
        key: key.into(),
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectHead>> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.jitter().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| ObjectHead {
                size: o.data.len() as u64,
                metadata: o.metadata.clone(),
            }))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.jitter().await;
        self.object(bucket, key).ok_or_else(|| not_found(bucket, key))
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<Bytes> {
        let _guard = self.enter();
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.jitter().await;
        if self.failing_offsets.lock().unwrap().contains(&start) {
            return Err(StorageError::permanent("get_object_range", "injected failure"));
        }
        let data = self.object(bucket, key).ok_or_else(|| not_found(bucket, key))?;
        let end = (end as usize).min(data.len().saturating_sub(1));
        Ok(data.slice(start as usize..=end))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> StorageResult<ListPage> {
        self.jitter().await;
        let mut entries: Vec<(String, Option<u64>)> = Vec::new();
        {
            let state = self.state.lock().unwrap();
            let mut seen_prefixes = BTreeSet::new();
            for ((b, key), object) in state.objects.iter() {
                if b != bucket || !key.starts_with(prefix) {
                    continue;
                }
                let rest = &key[prefix.len()..];
                match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                    Some(cut) => {
                        let common = format!("{}{}", prefix, &rest[..cut]);
                        if seen_prefixes.insert(common.clone()) {
                            entries.push((common, None));
                        }
                    }
                    None => entries.push((key.clone(), Some(object.data.len() as u64))),
                }
            }
        }

        let page_size = self.page_size.load(Ordering::SeqCst);
        let start: usize = continuation.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + page_size).min(entries.len());
        let mut page = ListPage::default();
        for (name, size) in &entries[start.min(end)..end] {
            match size {
                Some(size) => page.objects.push(ListedObject {
                    key: name.clone(),
                    size: *size,
                }),
                None => page.common_prefixes.push(name.clone()),
            }
        }
        if end < entries.len() {
            page.next_token = Some(end.to_string());
        }
        Ok(page)
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<InFlightUpload>> {
        if self.fail_upload_listing.load(Ordering::SeqCst) {
            return Err(StorageError::permanent("list_multipart_uploads", "access denied"));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .uploads
            .iter()
            .filter(|(_, u)| u.bucket == bucket && u.key.starts_with(prefix))
            .map(|(id, u)| InFlightUpload {
                key: u.key.clone(),
                upload_id: id.clone(),
                initiated_at: u.initiated_at,
            })
            .collect())
    }

    async fn list_uploaded_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<UploadedPart>> {
        let state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| StorageError::permanent("list_uploaded_parts", "NoSuchUpload"))?;
        Ok(upload
            .parts
            .iter()
            .map(|(n, (data, etag))| UploadedPart {
                part_number: *n,
                etag: etag.clone(),
                size: Some(data.len() as u64),
            })
            .collect())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: bucket.into(),
                key: key.into(),
                initiated_at: Utc::now(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        digest: &str,
    ) -> StorageResult<String> {
        let _guard = self.enter();
        self.upload_part_calls.fetch_add(1, Ordering::SeqCst);
        self.jitter().await;
        if self.failing_parts.lock().unwrap().contains(&part_number) {
            return Err(StorageError::permanent("upload_part", "injected failure"));
        }
        if content_md5(&body) != digest {
            return Err(StorageError::permanent("upload_part", "BadDigest"));
        }
        let etag = etag_of(&body);
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::permanent("upload_part", "NoSuchUpload"))?;
        upload.parts.insert(part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::permanent("complete_multipart_upload", "NoSuchUpload"))?;

        let mut data = Vec::new();
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(StorageError::permanent("complete_multipart_upload", "InvalidPartOrder"));
            }
            previous = part.part_number;
            let (bytes, etag) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| StorageError::permanent("complete_multipart_upload", "InvalidPart"))?;
            if *etag != part.etag {
                return Err(StorageError::permanent("complete_multipart_upload", "InvalidPart"));
            }
            data.extend_from_slice(bytes);
        }
        state.objects.insert(
            (upload.bucket, upload.key),
            StoredObject {
                data: Bytes::from(data),
                metadata: upload.metadata,
            },
        );
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        digest: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.jitter().await;
        if content_md5(&body) != digest {
            return Err(StorageError::permanent("put_object", "BadDigest"));
        }
        self.put_with_metadata(bucket, key, body, metadata.clone());
        Ok(())
    }
}

/// Small chunks so a few KB make a multipart object.
pub fn test_config() -> TransferConfig {
    TransferConfig {
        workers: 2,
        resumable_threshold: 4 * KB,
        chunk_size: KB,
        retry: RetryPolicy::none(),
        ..Default::default()
    }
}

pub async fn open_checkpoints(dir: &TempDir) -> CheckpointStore {
    CheckpointStore::open(&dir.path().join("s3trans.db"), RetryPolicy::none())
        .await
        .unwrap()
}

pub fn engine(config: TransferConfig, checkpoints: &CheckpointStore) -> TransferEngine {
    TransferEngine::new(config, checkpoints.clone(), IgnoreList::default()).unwrap()
}
