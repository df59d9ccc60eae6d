use std::sync::Arc;

use derive_more::derive::Display;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display("cancelled while waiting for an enrichment permit")]
pub struct Cancelled;

impl std::error::Error for Cancelled {}

/// Bounds concurrent calls to the enrichment engine, independent of how many
/// workers or runs are active. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct EnrichmentThrottle {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// Held for the duration of one engine call. Dropping it returns the permit.
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

impl EnrichmentThrottle {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<ThrottlePermit, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                // The semaphore is never closed
                permit.map(|p| ThrottlePermit { _permit: p }).map_err(|_| Cancelled)
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }
}
