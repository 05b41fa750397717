//! Decides, per object, whether to skip it, start it fresh, or resume it.

use crate::{
    config::TransferConfig,
    errors::{StorageError, StorageResult, TransferError, TransferResult},
    models::{
        checkpoint::CheckpointedRange,
        multipart::{InFlightUpload, UploadedPart},
        object::{Location, ObjectDescriptor},
    },
    services::{
        checkpoint_store::CheckpointStore,
        chunk_planner::{self, ChunkPlan},
    },
    storage::{ObjectStore, local},
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferDecision {
    /// The destination already matches the source.
    Skip,
    /// Start from part 1.
    Fresh,
    Resume(ResumePoint),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// An in-flight multipart upload on the destination.
    Session(String),
    /// Parts recorded in the checkpoint store for a local `.partial` file.
    Checkpoints(Vec<i32>),
}

/// Objects below the threshold, and empty ones, go single-shot.
pub fn is_resumable(config: &TransferConfig, size: u64) -> bool {
    size > 0 && size >= config.resumable_threshold
}

/// The most recently initiated in-flight upload for `key`.
pub fn latest_upload<'a>(in_flight: &'a [InFlightUpload], key: &str) -> Option<&'a InFlightUpload> {
    in_flight
        .iter()
        .filter(|upload| upload.key == key)
        .max_by_key(|upload| upload.initiated_at)
}

/// Parts a recovered session already holds, by part number, or `None`
/// when any of them does not fit `plan`.
pub fn reconcile_uploaded(
    plan: &ChunkPlan,
    uploaded: &[UploadedPart],
) -> Option<BTreeMap<i32, String>> {
    let mut parts = BTreeMap::new();
    for part in uploaded {
        let expected = plan.part(part.part_number)?;
        if part.size.is_some_and(|size| size != expected.length) {
            return None;
        }
        parts.insert(part.part_number, part.etag.clone());
    }
    Some(parts)
}

/// True when every checkpointed range is exactly the part of the same
/// number in `plan`.
pub fn ranges_fit_plan(plan: &ChunkPlan, ranges: &[CheckpointedRange]) -> bool {
    ranges.iter().all(|range| {
        plan.part(range.part)
            .is_some_and(|part| part.offset == range.offset && part.length == range.length)
    })
}

/// Plan an object bound for remote storage.
///
/// `target_index` is the pre-fetched destination listing, if any.
/// `in_flight` is `None` when the destination's uploads could not be listed,
/// which disables resumption.
pub async fn plan_remote(
    store: &dyn ObjectStore,
    config: &TransferConfig,
    object: &ObjectDescriptor,
    target_index: Option<&HashMap<String, u64>>,
    in_flight: Option<&[InFlightUpload]>,
) -> StorageResult<TransferDecision> {
    let Location::Remote { bucket, key } = &object.destination else {
        return Err(StorageError::permanent(
            "plan_remote",
            format!("{} is not a remote location", object.destination),
        ));
    };

    if config.skip_compare {
        return Ok(TransferDecision::Fresh);
    }

    let matches = match target_index {
        Some(index) if !config.transfer_metadata => index.get(key) == Some(&object.size),
        _ => match store.head_object(bucket, key).await? {
            Some(head) => {
                head.size == object.size
                    && (!config.transfer_metadata || head.metadata.matches(&object.metadata))
            }
            None => false,
        },
    };
    if matches {
        info!(bucket = %bucket, key = %key, "destination matches source, skipping");
        return Ok(TransferDecision::Skip);
    }

    if !is_resumable(config, object.size) {
        return Ok(TransferDecision::Fresh);
    }

    match in_flight.and_then(|uploads| latest_upload(uploads, key)) {
        Some(upload) => {
            info!(bucket = %bucket, key = %key, upload_id = %upload.upload_id, "resuming multipart upload");
            Ok(TransferDecision::Resume(ResumePoint::Session(
                upload.upload_id.clone(),
            )))
        }
        None => Ok(TransferDecision::Fresh),
    }
}

/// Plan an object bound for the local filesystem.
///
/// Existence is a size-only comparison; resume state comes from the
/// checkpoint store and must agree with the `.partial` file on disk.
pub async fn plan_local(
    checkpoints: &CheckpointStore,
    config: &TransferConfig,
    object: &ObjectDescriptor,
) -> TransferResult<TransferDecision> {
    let Location::Local(path) = &object.destination else {
        return Err(TransferError::PlanningFailed {
            location: object.destination.to_string(),
            source: StorageError::permanent("plan_local", "destination is not a local path"),
        });
    };

    if config.skip_compare {
        return Ok(TransferDecision::Fresh);
    }

    if local::stat_size(path).await? == Some(object.size) {
        info!(path = %path.display(), "local file matches source size, skipping");
        return Ok(TransferDecision::Skip);
    }

    if !is_resumable(config, object.size) {
        return Ok(TransferDecision::Fresh);
    }

    let (key, bucket) = object.destination.checkpoint_scope();
    let ranges = checkpoints.list_completed_ranges(&key, &bucket).await?;
    if ranges.is_empty() {
        return Ok(TransferDecision::Fresh);
    }

    let partial = local::partial_path(path);
    let plan = chunk_planner::plan(object.size, config.chunk_size);
    let stale = if local::stat_size(&partial).await?.is_none() {
        warn!(path = %partial.display(), "checkpoints found without a partial file, starting over");
        true
    } else if !ranges_fit_plan(&plan, &ranges) {
        warn!(path = %path.display(), "checkpoints do not fit the current chunk plan, starting over");
        true
    } else {
        false
    };
    if stale {
        checkpoints.clear_completed_parts(&key, &bucket).await?;
        return Ok(TransferDecision::Fresh);
    }

    let mut completed: Vec<i32> = ranges.iter().map(|range| range.part).collect();
    completed.dedup();
    debug!(path = %path.display(), completed = completed.len(), "resuming local download");
    Ok(TransferDecision::Resume(ResumePoint::Checkpoints(completed)))
}
