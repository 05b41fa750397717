//! Recursive prefix fan-out used to index a destination before transfer.

use crate::{
    errors::TransferResult,
    services::gate::ConcurrencyGate,
    storage::{ListedObject, ObjectStore},
};
use futures::{FutureExt, future::BoxFuture};
use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinSet;
use tracing::{debug, info};

const DELIMITER: &str = "/";

/// List `prefix` one level at a time, spawning a child task per common
/// prefix under the listing gate and joining them all before returning.
///
/// A task gives its slot back before waiting on its children, so a deep
/// tree cannot starve the gate.
pub fn list_recursive(
    store: Arc<dyn ObjectStore>,
    gate: ConcurrencyGate,
    bucket: String,
    prefix: String,
) -> BoxFuture<'static, TransferResult<Vec<ListedObject>>> {
    async move {
        let permit = gate.acquire_listing().await?;
        let mut objects = Vec::new();
        let mut children = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = store
                .list_objects(&bucket, &prefix, Some(DELIMITER), token.as_deref())
                .await?;
            objects.extend(page.objects);
            children.extend(page.common_prefixes);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        drop(permit);
        debug!(
            bucket = %bucket,
            prefix = %prefix,
            objects = objects.len(),
            children = children.len(),
            "listed prefix"
        );

        let mut tasks = JoinSet::new();
        for child in children {
            tasks.spawn(list_recursive(
                store.clone(),
                gate.clone(),
                bucket.clone(),
                child,
            ));
        }
        while let Some(res) = tasks.join_next().await {
            objects.extend(res??);
        }
        Ok(objects)
    }
    .boxed()
}

/// Key → size index of everything under `prefix`.
pub async fn index_destination(
    store: Arc<dyn ObjectStore>,
    gate: ConcurrencyGate,
    bucket: &str,
    prefix: &str,
) -> TransferResult<HashMap<String, u64>> {
    info!(bucket, prefix, "listing destination");
    let objects = list_recursive(store, gate, bucket.to_string(), prefix.to_string()).await?;
    info!(bucket, prefix, count = objects.len(), "destination listed");
    Ok(objects.into_iter().map(|o| (o.key, o.size)).collect())
}
