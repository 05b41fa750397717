//! ConcurrencyGate: bounded admission for the three pipeline stages.
//!
//! Objects are admitted `W` at a time, part workers `2W` at a time across
//! all active objects, and listing tasks `4W` at a time. The semaphores are
//! independent: holding an object slot never blocks another object's parts.

use crate::services::metrics::TransferMetrics;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct ConcurrencyGate {
    objects: Arc<Semaphore>,
    parts: Arc<Semaphore>,
    listing: Arc<Semaphore>,
    metrics: Arc<TransferMetrics>,
}

/// A held slot. Dropping it frees the slot.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    metrics: Arc<TransferMetrics>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.metrics.worker_finished();
    }
}

impl ConcurrencyGate {
    pub fn new(workers: usize, metrics: Arc<TransferMetrics>) -> Self {
        let workers = workers.max(1);
        Self {
            objects: Arc::new(Semaphore::new(workers)),
            parts: Arc::new(Semaphore::new(workers * 2)),
            listing: Arc::new(Semaphore::new(workers * 4)),
            metrics,
        }
    }

    pub async fn acquire_object(&self) -> Result<GatePermit, AcquireError> {
        self.acquire(&self.objects).await
    }

    pub async fn acquire_part(&self) -> Result<GatePermit, AcquireError> {
        self.acquire(&self.parts).await
    }

    pub async fn acquire_listing(&self) -> Result<GatePermit, AcquireError> {
        self.acquire(&self.listing).await
    }

    async fn acquire(&self, semaphore: &Arc<Semaphore>) -> Result<GatePermit, AcquireError> {
        let permit = semaphore.clone().acquire_owned().await?;
        self.metrics.worker_started();
        Ok(GatePermit {
            _permit: permit,
            metrics: self.metrics.clone(),
        })
    }
}
