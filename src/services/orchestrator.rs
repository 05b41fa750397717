//! TransferEngine: enumerates a source, plans every object and drives its
//! parts through the gates to completion.
//!
//! Per object: PLANNED → IN_PROGRESS → COMPLETING → DONE, or SKIPPED /
//! FAILED. Failures stay local to their object; only an invalid
//! configuration or a broken source enumeration ends the run early, and
//! even then the already-spawned objects are waited for.

use crate::{
    config::{CompareMode, TransferConfig},
    errors::{StorageError, TransferError, TransferResult},
    models::{
        multipart::{InFlightUpload, UploadedPart},
        object::{Location, ObjectDescriptor, ObjectMetadata},
        part::CompletedPart,
    },
    services::{
        checkpoint_store::CheckpointStore,
        chunk_planner::{self, ChunkPlan},
        gate::ConcurrencyGate,
        ignore::IgnoreList,
        listing,
        metrics::{TransferMetrics, TransferSummary},
        object_planner::{self, ResumePoint, TransferDecision},
        part_worker::{PartSink, PartSource, PartWorker},
    },
    storage::{ObjectStore, content_md5, http::HttpSource, local, local::SharedFile},
};
use bytes::Bytes;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// One side of a transfer.
#[derive(Clone)]
pub enum Endpoint {
    S3 {
        store: Arc<dyn ObjectStore>,
        bucket: String,
        prefix: String,
    },
    Local {
        root: PathBuf,
    },
    /// Source only: a fixed list of URLs.
    Http {
        source: HttpSource,
        urls: Vec<String>,
    },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 { bucket, prefix, .. } => write!(f, "s3://{}/{}", bucket, prefix),
            Self::Local { root } => write!(f, "{}", root.display()),
            Self::Http { urls, .. } => write!(f, "{} http url(s)", urls.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Skipped,
}

/// An enumerated object whose size may still need resolving.
enum Pending {
    Known(ObjectDescriptor),
    Url { url: String, destination: PathBuf },
}

/// State shared by every object task of one run.
struct Run {
    from: Endpoint,
    to: Endpoint,
    target_index: Option<HashMap<String, u64>>,

    /// `None` when listing failed, which disables remote resumption.
    in_flight: Option<Vec<InFlightUpload>>,
}

#[derive(Clone)]
pub struct TransferEngine {
    config: Arc<TransferConfig>,
    checkpoints: CheckpointStore,
    gate: ConcurrencyGate,
    metrics: Arc<TransferMetrics>,
    ignore: Arc<IgnoreList>,
}

impl TransferEngine {
    pub fn new(
        config: TransferConfig,
        checkpoints: CheckpointStore,
        ignore: IgnoreList,
    ) -> TransferResult<Self> {
        config.validate()?;
        let metrics = Arc::new(TransferMetrics::new());
        Ok(Self {
            gate: ConcurrencyGate::new(config.workers, metrics.clone()),
            config: Arc::new(config),
            checkpoints,
            metrics,
            ignore: Arc::new(ignore),
        })
    }

    /// Transfer everything under `from` to `to` and report the totals.
    ///
    /// Per-object failures are counted in the summary. `Err` means the run
    /// could not start, or enumerating the source broke off.
    pub async fn run(&self, from: Endpoint, to: Endpoint) -> TransferResult<TransferSummary> {
        let started = Instant::now();
        check_direction(&from, &to)?;
        info!(from = %from, to = %to, workers = self.config.workers, "transfer run started");

        let run = Arc::new(self.prepare(from, to).await);
        let tracker = TaskTracker::new();
        let enumerated = self.enumerate(&run, &tracker).await;
        tracker.close();
        tracker.wait().await;

        let summary = self.metrics.snapshot(started.elapsed());
        info!(
            objects = summary.objects,
            bytes = summary.bytes,
            skipped = summary.skipped,
            failed = summary.failed,
            parts = summary.parts,
            elapsed_secs = summary.elapsed_secs,
            "transfer run finished"
        );
        enumerated?;
        Ok(summary)
    }

    async fn prepare(&self, from: Endpoint, to: Endpoint) -> Run {
        let mut target_index = None;
        let mut in_flight = None;

        if let Endpoint::S3 {
            store,
            bucket,
            prefix,
        } = &to
        {
            match store.list_multipart_uploads(bucket, prefix).await {
                Ok(uploads) => {
                    info!(bucket = %bucket, prefix = %prefix, count = uploads.len(), "found in-flight multipart uploads");
                    in_flight = Some(uploads);
                }
                Err(err) => {
                    warn!(bucket = %bucket, prefix = %prefix, "cannot list in-flight multipart uploads, resume disabled: {}", err);
                }
            }

            let cfg = &self.config;
            if cfg.compare_mode == CompareMode::List && !cfg.skip_compare && !cfg.transfer_metadata
            {
                match listing::index_destination(store.clone(), self.gate.clone(), bucket, prefix)
                    .await
                {
                    Ok(index) => target_index = Some(index),
                    Err(err) => {
                        warn!(bucket = %bucket, prefix = %prefix, "destination listing failed, falling back to HEAD: {}", err);
                    }
                }
            }
        }

        Run {
            from,
            to,
            target_index,
            in_flight,
        }
    }

    async fn enumerate(&self, run: &Arc<Run>, tracker: &TaskTracker) -> TransferResult<()> {
        match &run.from {
            Endpoint::S3 {
                store,
                bucket,
                prefix,
            } => {
                let mut token: Option<String> = None;
                loop {
                    let page = store
                        .list_objects(bucket, prefix, None, token.as_deref())
                        .await
                        .map_err(|source| TransferError::Enumeration {
                            location: format!("s3://{}/{}", bucket, prefix),
                            source,
                        })?;
                    for listed in page.objects {
                        if self.ignore.is_ignored(&listed.key) {
                            info!(bucket = %bucket, key = %listed.key, "ignored");
                            continue;
                        }
                        let relative = relative_key(&listed.key, prefix);
                        let Some(destination) = destination_for(&run.to, &relative) else {
                            warn!(bucket = %bucket, key = %listed.key, "key escapes the destination, skipping");
                            continue;
                        };
                        let metadata = guessed_metadata(&listed.key);
                        let object = ObjectDescriptor::new(
                            Location::remote(bucket.clone(), listed.key),
                            destination,
                            listed.size,
                        )
                        .with_metadata(metadata);
                        self.dispatch(run, tracker, Pending::Known(object)).await?;
                    }
                    match page.next_token {
                        Some(next) => token = Some(next),
                        None => break,
                    }
                }
            }
            Endpoint::Local { root } => {
                let files = local::walk_files(root).await.map_err(|err| {
                    TransferError::Enumeration {
                        location: root.display().to_string(),
                        source: StorageError::Io(err),
                    }
                })?;
                for (path, size) in files {
                    let relative = upload_key(root, &path);
                    if self.ignore.is_ignored(&relative) {
                        info!(path = %path.display(), "ignored");
                        continue;
                    }
                    let Some(destination) = destination_for(&run.to, &relative) else {
                        continue;
                    };
                    let object = ObjectDescriptor::new(Location::Local(path), destination, size)
                        .with_metadata(guessed_metadata(&relative));
                    self.dispatch(run, tracker, Pending::Known(object)).await?;
                }
            }
            Endpoint::Http { urls, .. } => {
                let Endpoint::Local { root } = &run.to else {
                    return Err(TransferError::FatalConfig(
                        "http sources can only be downloaded locally".into(),
                    ));
                };
                for url in urls {
                    if self.ignore.is_ignored(url) {
                        info!(url = %url, "ignored");
                        continue;
                    }
                    let destination = root.join(url_file_name(url));
                    self.dispatch(
                        run,
                        tracker,
                        Pending::Url {
                            url: url.clone(),
                            destination,
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Wait for an object slot, then hand the object to its own task.
    async fn dispatch(
        &self,
        run: &Arc<Run>,
        tracker: &TaskTracker,
        pending: Pending,
    ) -> TransferResult<()> {
        let permit = self.gate.acquire_object().await?;
        let engine = self.clone();
        let run = run.clone();
        tracker.spawn(async move {
            let _permit = permit;
            engine.process(&run, pending).await;
        });
        Ok(())
    }

    async fn process(&self, run: &Run, pending: Pending) {
        let object = match self.resolve(run, pending).await {
            Ok(object) => object,
            Err(err) => {
                self.metrics.record_failed();
                error!("transfer failed: {}", err);
                return;
            }
        };

        info!(
            source = %object.source,
            destination = %object.destination,
            size = object.size,
            active_workers = self.metrics.active_workers(),
            "object started"
        );
        match self.transfer_object(run, &object).await {
            Ok(Outcome::Done) => {
                self.metrics.record_done(object.size);
                info!(source = %object.source, destination = %object.destination, size = object.size, "object transferred");
            }
            Ok(Outcome::Skipped) => {
                self.metrics.record_skipped(object.size);
            }
            Err(err) => {
                self.metrics.record_failed();
                error!(source = %object.source, destination = %object.destination, "transfer failed: {}", err);
            }
        }
    }

    /// Fill in what enumeration did not know: HTTP sizes and S3 metadata.
    async fn resolve(&self, run: &Run, pending: Pending) -> TransferResult<ObjectDescriptor> {
        let object = match pending {
            Pending::Known(object) => object,
            Pending::Url { url, destination } => {
                let Endpoint::Http { source, .. } = &run.from else {
                    return Err(TransferError::FatalConfig("url without an http source".into()));
                };
                let size = source.content_length(&url).await.map_err(|source| {
                    TransferError::PlanningFailed {
                        location: url.clone(),
                        source,
                    }
                })?;
                ObjectDescriptor::new(Location::Url(url), Location::Local(destination), size)
            }
        };

        if !self.config.transfer_metadata {
            return Ok(object);
        }
        let (Endpoint::S3 { store, .. }, Location::Remote { bucket, key }) =
            (&run.from, &object.source)
        else {
            return Ok(object);
        };
        let planning_failed = |source| TransferError::PlanningFailed {
            location: object.source.to_string(),
            source,
        };
        let head = store
            .head_object(bucket, key)
            .await
            .map_err(planning_failed)?
            .ok_or_else(|| {
                planning_failed(StorageError::NotFound {
                    bucket: bucket.clone(),
                    key: key.clone(),
                })
            })?;
        Ok(object.with_metadata(head.metadata))
    }

    async fn transfer_object(&self, run: &Run, object: &ObjectDescriptor) -> TransferResult<Outcome> {
        match &run.to {
            Endpoint::S3 { store, .. } => self.transfer_to_remote(run, store, object).await,
            Endpoint::Local { .. } => self.transfer_to_local(run, object).await,
            Endpoint::Http { .. } => Err(TransferError::FatalConfig(
                "http is not a valid destination".into(),
            )),
        }
    }

    async fn transfer_to_remote(
        &self,
        run: &Run,
        store: &Arc<dyn ObjectStore>,
        object: &ObjectDescriptor,
    ) -> TransferResult<Outcome> {
        let location = object.destination.to_string();
        let decision = object_planner::plan_remote(
            store.as_ref(),
            &self.config,
            object,
            run.target_index.as_ref(),
            run.in_flight.as_deref(),
        )
        .await
        .map_err(|source| TransferError::PlanningFailed {
            location: location.clone(),
            source,
        })?;
        if decision == TransferDecision::Skip {
            return Ok(Outcome::Skipped);
        }

        let Location::Remote { bucket, key } = &object.destination else {
            return Err(TransferError::FatalConfig(format!("{} is not remote", location)));
        };

        if !object_planner::is_resumable(&self.config, object.size) {
            let body = self.read_whole(run, object).await?;
            let digest = content_md5(&body);
            store
                .put_object(bucket, key, body, &digest, &object.metadata)
                .await?;
            debug!(bucket = %bucket, key = %key, "uploaded in one request");
            return Ok(Outcome::Done);
        }

        let plan = chunk_planner::plan(object.size, self.config.chunk_size);
        let (upload_id, mut completed) = self
            .open_session(store, bucket, key, object, &plan, decision)
            .await?;

        let source = self.part_source(run, object).await?;
        let sink = PartSink::Multipart {
            store: store.clone(),
            bucket: bucket.clone(),
            key: key.clone(),
            upload_id: upload_id.clone(),
        };
        let already: BTreeSet<i32> = completed.keys().copied().collect();
        for part in self.run_parts(object, &plan, source, sink, &already).await? {
            completed.insert(part.part_number, part.etag.unwrap_or_default());
        }

        if completed.len() != plan.part_count() {
            return Err(TransferError::Incomplete {
                location,
                completed: completed.len(),
                total: plan.part_count(),
            });
        }

        let parts: Vec<UploadedPart> = completed
            .into_iter()
            .map(|(part_number, etag)| UploadedPart {
                part_number,
                etag,
                size: None,
            })
            .collect();
        store
            .complete_multipart_upload(bucket, key, &upload_id, &parts)
            .await?;
        info!(bucket = %bucket, key = %key, upload_id = %upload_id, total_parts = parts.len(), "multipart upload completed");

        self.clear_checkpoints(&object.destination).await;
        Ok(Outcome::Done)
    }

    /// Recover the session the planner chose, or create a new one.
    ///
    /// The destination's own part listing is the source of truth for what
    /// a recovered session already holds.
    async fn open_session(
        &self,
        store: &Arc<dyn ObjectStore>,
        bucket: &str,
        key: &str,
        object: &ObjectDescriptor,
        plan: &ChunkPlan,
        decision: TransferDecision,
    ) -> TransferResult<(String, BTreeMap<i32, String>)> {
        if let TransferDecision::Resume(ResumePoint::Session(upload_id)) = decision {
            match store.list_uploaded_parts(bucket, key, &upload_id).await {
                Ok(uploaded) => match object_planner::reconcile_uploaded(plan, &uploaded) {
                    Some(parts) => {
                        info!(bucket, key, upload_id = %upload_id, existing = parts.len(), total_parts = plan.part_count(), "resumed multipart upload");
                        return Ok((upload_id, parts));
                    }
                    None => {
                        warn!(bucket, key, upload_id = %upload_id, "uploaded parts do not fit the chunk plan, starting a new upload");
                    }
                },
                Err(err) => {
                    warn!(bucket, key, upload_id = %upload_id, "cannot list uploaded parts, starting a new upload: {}", err);
                }
            }
        }

        self.clear_checkpoints(&object.destination).await;
        let upload_id = store
            .create_multipart_upload(bucket, key, &object.metadata)
            .await
            .map_err(|source| TransferError::PlanningFailed {
                location: object.destination.to_string(),
                source,
            })?;
        info!(bucket, key, upload_id = %upload_id, total_parts = plan.part_count(), "created multipart upload");
        Ok((upload_id, BTreeMap::new()))
    }

    async fn transfer_to_local(&self, run: &Run, object: &ObjectDescriptor) -> TransferResult<Outcome> {
        let decision = object_planner::plan_local(&self.checkpoints, &self.config, object).await?;
        if decision == TransferDecision::Skip {
            return Ok(Outcome::Skipped);
        }

        let Location::Local(path) = &object.destination else {
            return Err(TransferError::FatalConfig(format!(
                "{} is not a local path",
                object.destination
            )));
        };

        if !object_planner::is_resumable(&self.config, object.size) {
            let body = self.read_whole(run, object).await?;
            local::write_whole(path, &body).await?;
            debug!(path = %path.display(), "downloaded in one request");
            return Ok(Outcome::Done);
        }

        let plan = chunk_planner::plan(object.size, self.config.chunk_size);
        let partial = local::partial_path(path);
        let already: BTreeSet<i32> = match decision {
            TransferDecision::Resume(ResumePoint::Checkpoints(parts)) => {
                info!(path = %path.display(), existing = parts.len(), total_parts = plan.part_count(), "resuming download");
                parts.into_iter().collect()
            }
            _ => {
                let (key, bucket) = object.destination.checkpoint_scope();
                self.checkpoints.clear_completed_parts(&key, &bucket).await?;
                local::remove_if_exists(&partial).await?;
                BTreeSet::new()
            }
        };

        local::ensure_parent(path).await?;
        let file = Arc::new(SharedFile::open_write(&partial).await?);
        let source = self.part_source(run, object).await?;
        let newly = self
            .run_parts(object, &plan, source, PartSink::File(file.clone()), &already)
            .await?;
        file.sync().await?;
        drop(file);

        let completed = already.len() + newly.len();
        if completed != plan.part_count() {
            return Err(TransferError::Incomplete {
                location: path.display().to_string(),
                completed,
                total: plan.part_count(),
            });
        }

        local::finalize(&partial, path).await?;
        self.clear_checkpoints(&object.destination).await;
        Ok(Outcome::Done)
    }

    /// Spawn one task per part not in `already`, each admitted by the part
    /// gate, and join them all. Failed parts are logged and left out.
    async fn run_parts(
        &self,
        object: &ObjectDescriptor,
        plan: &ChunkPlan,
        source: PartSource,
        sink: PartSink,
        already: &BTreeSet<i32>,
    ) -> TransferResult<Vec<CompletedPart>> {
        let worker = Arc::new(PartWorker {
            source,
            sink,
            checkpoints: self.checkpoints.clone(),
            scope: object.destination.checkpoint_scope(),
            metrics: self.metrics.clone(),
        });

        let mut tasks = JoinSet::new();
        for part in plan.parts().filter(|p| !already.contains(&p.part_number)) {
            let permit = self.gate.acquire_part().await?;
            let worker = worker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (part, worker.transfer(part).await)
            });
        }

        let mut completed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(part))) => completed.push(part),
                Ok((part, Err(source))) => {
                    let err = TransferError::PartFailed {
                        location: object.destination.to_string(),
                        part_number: part.part_number,
                        total_parts: part.total_parts,
                        source,
                    };
                    error!(source = %object.source, part_number = part.part_number, "{}", err);
                }
                Err(err) => {
                    error!(source = %object.source, "part task did not finish: {}", err);
                }
            }
        }
        Ok(completed)
    }

    async fn part_source(&self, run: &Run, object: &ObjectDescriptor) -> TransferResult<PartSource> {
        match (&run.from, &object.source) {
            (Endpoint::S3 { store, .. }, Location::Remote { bucket, key }) => Ok(PartSource::Remote {
                store: store.clone(),
                bucket: bucket.clone(),
                key: key.clone(),
            }),
            (_, Location::Local(path)) => Ok(PartSource::Local(Arc::new(
                SharedFile::open_read(path).await?,
            ))),
            (Endpoint::Http { source, .. }, Location::Url(url)) => Ok(PartSource::Http {
                source: source.clone(),
                url: url.clone(),
            }),
            _ => Err(TransferError::FatalConfig(format!(
                "no reader for {}",
                object.source
            ))),
        }
    }

    /// The whole object in memory, for the single-shot path.
    async fn read_whole(&self, run: &Run, object: &ObjectDescriptor) -> TransferResult<Bytes> {
        match (&run.from, &object.source) {
            (Endpoint::S3 { store, .. }, Location::Remote { bucket, key }) => {
                Ok(store.get_object(bucket, key).await?)
            }
            (_, Location::Local(path)) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            (Endpoint::Http { source, .. }, Location::Url(url)) => {
                if object.size == 0 {
                    return Ok(Bytes::new());
                }
                Ok(source.get_range(url, 0, object.size - 1).await?)
            }
            _ => Err(TransferError::FatalConfig(format!(
                "no reader for {}",
                object.source
            ))),
        }
    }

    async fn clear_checkpoints(&self, destination: &Location) {
        let (key, bucket) = destination.checkpoint_scope();
        if let Err(err) = self.checkpoints.clear_completed_parts(&key, &bucket).await {
            warn!(bucket = %bucket, key = %key, "cannot clear checkpoints: {}", err);
        }
    }
}

/// Metadata for an object whose source metadata is not carried over: just a
/// content type guessed from the key's extension.
fn guessed_metadata(key: &str) -> ObjectMetadata {
    ObjectMetadata {
        content_type: mime_guess::from_path(key).first_raw().map(str::to_string),
        ..Default::default()
    }
}

fn check_direction(from: &Endpoint, to: &Endpoint) -> TransferResult<()> {
    match (from, to) {
        (Endpoint::S3 { .. }, Endpoint::S3 { .. })
        | (Endpoint::S3 { .. }, Endpoint::Local { .. })
        | (Endpoint::Local { .. }, Endpoint::S3 { .. })
        | (Endpoint::Http { .. }, Endpoint::Local { .. }) => Ok(()),
        _ => Err(TransferError::FatalConfig(format!(
            "unsupported direction: {} -> {}",
            from, to
        ))),
    }
}

/// Where an object with the given relative key lands, or `None` when the
/// key would climb out of a local destination root.
fn destination_for(to: &Endpoint, relative: &str) -> Option<Location> {
    match to {
        Endpoint::S3 { bucket, prefix, .. } => {
            Some(Location::remote(bucket.clone(), join_key(prefix, relative)))
        }
        Endpoint::Local { root } => {
            let relative = Path::new(relative);
            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                return None;
            }
            Some(Location::Local(root.join(relative)))
        }
        Endpoint::Http { .. } => None,
    }
}

/// A source key relative to the listed prefix. A key equal to the prefix
/// (a single-object source) maps to its base name.
pub fn relative_key(key: &str, prefix: &str) -> String {
    if key == prefix {
        return key.rsplit('/').next().unwrap_or(key).to_string();
    }
    key.strip_prefix(prefix)
        .unwrap_or(key)
        .trim_start_matches('/')
        .to_string()
}

/// Join a destination prefix and a relative key with a single `/`.
pub fn join_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let relative = relative.trim_start_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else if relative.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Key of an uploaded file: its path relative to the parent of the walked
/// root, so a directory upload keeps the directory's own name.
pub fn upload_key(root: &Path, file: &Path) -> String {
    let base = root.parent().unwrap_or_else(|| Path::new(""));
    let relative = file.strip_prefix(base).unwrap_or(file);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Local file name for a downloaded URL: the last path segment.
pub fn url_file_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_else(|| "index.html".to_string())
}
