//! Stream Adapter
//!
//! Two ways to drain a `PipelineRun`: all at once for the JSON sync endpoint,
//! or event by event for SSE.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::{
    sync::mpsc,
    time::{sleep, Duration, Instant},
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::model::enrichment::EnrichedEmail;

use super::dispatcher::{PipelineRun, RunStats};

pub const NO_EMAILS: &str = "no_emails";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(EnrichedEmail),
    Error { code: String, message: String },
    Heartbeat,
    Complete,
}

impl StreamEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    fn no_emails() -> Self {
        Self::error(NO_EMAILS, "No emails found matching the query")
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// In arrival order
    pub emails: Vec<EnrichedEmail>,
    pub processed: usize,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalOutcome {
    Completed { count: usize },
    Cancelled,
}

/// Wait for the run to finish and return every result it produced
pub async fn collect_all(run: PipelineRun) -> BatchOutcome {
    let PipelineRun { mut results, done } = run;

    let mut emails = Vec::new();
    while let Some(email) = results.recv().await {
        emails.push(email);
    }

    let stats = match done.await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Enrichment supervisor failed: {:?}", e);
            RunStats::default()
        }
    };

    BatchOutcome {
        processed: emails.len(),
        emails,
        stats,
    }
}

/// Push results to `sink` as they arrive, with a heartbeat after every
/// `heartbeat` of silence. Ends with `Complete`, preceded by a `no_emails`
/// error when the run produced nothing.
///
/// Nothing more is written once `cancel` fires. A closed sink cancels the run.
pub async fn forward_incremental(
    run: PipelineRun,
    sink: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    heartbeat: Duration,
) -> IncrementalOutcome {
    let PipelineRun { mut results, done } = run;
    let mut count = 0;

    let idle = sleep(heartbeat);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return IncrementalOutcome::Cancelled,
            next = results.recv() => {
                let Some(email) = next else { break };
                if !deliver(&sink, &cancel, StreamEvent::Data(email)).await {
                    return IncrementalOutcome::Cancelled;
                }
                count += 1;
                idle.as_mut().reset(Instant::now() + heartbeat);
            }
            _ = &mut idle => {
                if !deliver(&sink, &cancel, StreamEvent::Heartbeat).await {
                    return IncrementalOutcome::Cancelled;
                }
                idle.as_mut().reset(Instant::now() + heartbeat);
            }
        }
    }

    if let Err(e) = done.await {
        tracing::error!("Enrichment supervisor failed: {:?}", e);
    }

    if count == 0 && !deliver(&sink, &cancel, StreamEvent::no_emails()).await {
        return IncrementalOutcome::Cancelled;
    }
    if !deliver(&sink, &cancel, StreamEvent::Complete).await {
        return IncrementalOutcome::Cancelled;
    }

    IncrementalOutcome::Completed { count }
}

/// Send one event. `false` if the consumer is gone or the run was cancelled;
/// a vanished consumer cancels the run.
pub(crate) async fn deliver(
    sink: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    event: StreamEvent,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = sink.send(event) => {
            if sent.is_err() {
                tracing::debug!("Stream consumer disconnected, cancelling run");
                cancel.cancel();
            }
            sent.is_ok()
        }
    }
}

/// Event stream that cancels its run when dropped, e.g. when an SSE
/// client disconnects and axum drops the response body.
pub struct CancelOnDrop<S> {
    inner: S,
    _guard: DropGuard,
}

impl<S> CancelOnDrop<S> {
    pub fn new(inner: S, cancel: CancellationToken) -> Self {
        Self {
            inner,
            _guard: cancel.drop_guard(),
        }
    }
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
