//! Enrichment Pipeline
//!
//! Turns a page of message ids into a stream of validated enrichment results.
//!
//! ## Flow
//!
//! 1. `SyncSession` lists message ids from the mail provider
//! 2. `Dispatcher` pre-loads a `JobQueue` and starts a fixed pool of workers
//! 3. Each worker: stored result lookup → fetch → throttled, retried
//!    enrichment → persist → send on the output channel
//! 4. The output channel closes once every worker has returned
//! 5. `adapter` drains it either all at once (batch) or event by event (SSE)
//!
//! A single `CancellationToken` governs a run. Dropping the SSE response
//! cancels it, which unblocks every worker at its next wait.

use std::sync::Arc;

use tokio::time::Duration;

use crate::server_config::PipelineConfig;

pub mod adapter;
pub mod dispatcher;
pub mod queue;
pub mod retry;
pub mod session;
pub mod throttle;
pub mod traits;

pub use adapter::{BatchOutcome, IncrementalOutcome, StreamEvent};
pub use dispatcher::{Dispatcher, PipelineRun, RunStats};
pub use retry::{with_retry, RetryError, RetryPolicy};
pub use session::SyncSession;
pub use throttle::{Cancelled, EnrichmentThrottle};
pub use traits::{
    EnrichmentEngine, EnrichmentRequest, FetchedMessage, MailProvider, ProviderError, ResultStore,
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub page_size: u32,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub output_buffer: usize,
    pub heartbeat: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            page_size: config.page_size,
            workers: config.workers,
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.base_delay_ms),
            ),
            output_buffer: config.output_buffer,
            heartbeat: Duration::from_secs(config.heartbeat_secs),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            workers: 5,
            retry: RetryPolicy::default(),
            output_buffer: 1,
            heartbeat: Duration::from_secs(15),
        }
    }
}

/// Collaborators and limits shared by every run on this server
#[derive(Clone)]
pub struct PipelineContext {
    pub engine: Arc<dyn EnrichmentEngine>,
    pub store: Arc<dyn ResultStore>,
    pub throttle: EnrichmentThrottle,
    pub settings: PipelineSettings,
}

impl PipelineContext {
    pub fn new(
        engine: Arc<dyn EnrichmentEngine>,
        store: Arc<dyn ResultStore>,
        throttle: EnrichmentThrottle,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engine,
            store,
            throttle,
            settings,
        }
    }
}
