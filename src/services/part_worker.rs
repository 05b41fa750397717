//! PartWorker: moves one part's bytes from source to destination and
//! records the completion.

use crate::{
    errors::{StorageError, StorageResult},
    models::part::{CompletedPart, PartDescriptor},
    services::{checkpoint_store::CheckpointStore, metrics::TransferMetrics},
    storage::{ObjectStore, content_md5, http::HttpSource, local::SharedFile},
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a part's bytes are read from.
pub enum PartSource {
    Remote {
        store: Arc<dyn ObjectStore>,
        bucket: String,
        key: String,
    },
    Local(Arc<SharedFile>),
    Http {
        source: HttpSource,
        url: String,
    },
}

impl PartSource {
    async fn read(&self, part: &PartDescriptor) -> StorageResult<Bytes> {
        let (start, end) = (part.offset, part.last_byte());
        let data = match self {
            Self::Remote { store, bucket, key } => {
                store.get_object_range(bucket, key, start, end).await?
            }
            Self::Local(file) => file.read_at(start, part.length).await?,
            Self::Http { source, url } => source.get_range(url, start, end).await?,
        };
        if data.len() as u64 != part.length {
            return Err(StorageError::ShortRead {
                offset: part.offset,
                expected: part.length,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }
}

/// Where a part's bytes are written to.
pub enum PartSink {
    Multipart {
        store: Arc<dyn ObjectStore>,
        bucket: String,
        key: String,
        upload_id: String,
    },
    File(Arc<SharedFile>),
}

impl PartSink {
    async fn write(&self, part: &PartDescriptor, data: Bytes) -> StorageResult<Option<String>> {
        match self {
            Self::Multipart {
                store,
                bucket,
                key,
                upload_id,
            } => {
                let digest = content_md5(&data);
                let etag = store
                    .upload_part(bucket, key, upload_id, part.part_number, data, &digest)
                    .await?;
                Ok(Some(etag))
            }
            Self::File(file) => {
                file.write_at(part.offset, &data).await?;
                Ok(None)
            }
        }
    }
}

/// Shared by every part task of one object.
pub struct PartWorker {
    pub source: PartSource,
    pub sink: PartSink,
    pub checkpoints: CheckpointStore,

    /// `(key, bucket)` of the destination, under which checkpoints are kept.
    pub scope: (String, String),
    pub metrics: Arc<TransferMetrics>,
}

impl PartWorker {
    /// Read, write, then checkpoint one part.
    ///
    /// Nothing is recorded unless the write succeeded. A failed checkpoint
    /// write is logged and the part still counts as done.
    pub async fn transfer(&self, part: PartDescriptor) -> StorageResult<CompletedPart> {
        let (key, bucket) = (&self.scope.0, &self.scope.1);
        debug!(
            bucket = %bucket,
            key = %key,
            part_number = part.part_number,
            total_parts = part.total_parts,
            "part started"
        );

        let data = self.source.read(&part).await?;
        let etag = self.sink.write(&part, data).await?;

        if let Err(err) = self
            .checkpoints
            .record_part_complete(key, bucket, &part, etag.as_deref())
            .await
        {
            warn!(
                bucket = %bucket,
                key = %key,
                part_number = part.part_number,
                "checkpoint write failed, part may be re-sent on resume: {}",
                err
            );
        }
        self.metrics.record_part();

        debug!(
            bucket = %bucket,
            key = %key,
            part_number = part.part_number,
            total_parts = part.total_parts,
            "part finished"
        );
        Ok(CompletedPart {
            part_number: part.part_number,
            etag,
        })
    }
}
