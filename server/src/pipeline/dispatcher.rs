//! Job Dispatcher
//!
//! Fixed worker pool draining a pre-loaded job queue. Workers share one output
//! channel; the supervisor task drops the last sender only after every worker
//! has returned, so nothing is ever sent on a closed stream.

use std::sync::Arc;

use derive_more::derive::Display;
use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::model::enrichment::{EnrichedEmail, EnrichmentResult, ValidationError};

use super::{
    queue::JobQueue,
    retry::{with_retry, RetryError},
    throttle::Cancelled,
    traits::{EnrichmentRequest, MailProvider},
    PipelineContext,
};

/// Handle to a running batch
pub struct PipelineRun {
    /// Closed once all jobs are drained and every worker has returned
    pub results: mpsc::Receiver<EnrichedEmail>,
    pub done: JoinHandle<RunStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub cached: usize,
    pub enriched: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl RunStats {
    fn merge(&mut self, other: RunStats) {
        self.cached += other.cached;
        self.enriched += other.enriched;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Cached,
    Enriched,
    Failed,
    Cancelled,
}

#[derive(Debug, Display)]
enum AttemptError {
    #[display("{_0}")]
    Cancelled(Cancelled),
    #[display("engine error: {_0}")]
    Engine(anyhow::Error),
    #[display("invalid result: {_0}")]
    Invalid(ValidationError),
}

#[derive(Clone)]
pub struct Dispatcher {
    provider: Arc<dyn MailProvider>,
    ctx: PipelineContext,
    user_id: i32,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn MailProvider>, ctx: PipelineContext, user_id: i32) -> Self {
        Self {
            provider,
            ctx,
            user_id,
        }
    }

    /// Start processing `item_ids`. Returns immediately.
    pub fn run(&self, cancel: CancellationToken, item_ids: Vec<String>) -> PipelineRun {
        let total = item_ids.len();
        let (tx, rx) = mpsc::channel(self.ctx.settings.output_buffer.max(1));
        let queue = JobQueue::preloaded(item_ids);
        let worker_count = self.ctx.settings.workers.max(1).min(total.max(1));

        tracing::info!(
            "Starting enrichment run for user {}: {} jobs, {} workers, throttle {}/{} in use",
            self.user_id,
            total,
            worker_count,
            self.ctx.throttle.in_use(),
            self.ctx.throttle.capacity()
        );

        let workers: Vec<JoinHandle<RunStats>> = (0..worker_count)
            .map(|worker_id| {
                let dispatcher = self.clone();
                let queue = queue.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { dispatcher.work(worker_id, queue, tx, cancel).await })
            })
            .collect();

        let user_id = self.user_id;
        let done = tokio::spawn(async move {
            let mut stats = RunStats {
                total,
                ..Default::default()
            };
            for joined in join_all(workers).await {
                match joined {
                    Ok(worker_stats) => stats.merge(worker_stats),
                    Err(e) => tracing::error!("Enrichment worker panicked: {:?}", e),
                }
            }
            stats.cancelled = cancel.is_cancelled();

            // Last sender: the consumer sees the end of the stream from here on
            drop(tx);

            tracing::info!(
                "Enrichment run for user {} finished: {} cached, {} enriched, {} failed{}",
                user_id,
                stats.cached,
                stats.enriched,
                stats.failed,
                if stats.cancelled { " (cancelled)" } else { "" }
            );
            stats
        });

        PipelineRun { results: rx, done }
    }

    async fn work(
        self,
        worker_id: usize,
        queue: JobQueue,
        tx: mpsc::Sender<EnrichedEmail>,
        cancel: CancellationToken,
    ) -> RunStats {
        let mut stats = RunStats::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(message_id) = queue.pop() else {
                break;
            };

            tracing::debug!("Worker {} processing message {}", worker_id, message_id);
            match self.process(&message_id, &tx, &cancel).await {
                JobOutcome::Cached => stats.cached += 1,
                JobOutcome::Enriched => stats.enriched += 1,
                JobOutcome::Failed => stats.failed += 1,
                JobOutcome::Cancelled => break,
            }
        }

        stats
    }

    async fn process(
        &self,
        message_id: &str,
        tx: &mpsc::Sender<EnrichedEmail>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        match self.ctx.store.get(message_id).await {
            Ok(Some(result)) => {
                tracing::debug!("Using stored summary for {}", message_id);
                return if self.emit(tx, cancel, message_id, result, true).await {
                    JobOutcome::Cached
                } else {
                    JobOutcome::Cancelled
                };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Stored summary lookup failed for {}: {:?}", message_id, e);
            }
        }

        let message = match self.provider.fetch(message_id).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Failed to get message {}: {}", message_id, e);
                return JobOutcome::Failed;
            }
        };

        tracing::debug!(
            "Analyzing message {} (subject: {:?})",
            message_id,
            message.subject
        );
        let request = EnrichmentRequest::for_message(self.user_id, message);

        let result = match self.enrich(&request, cancel).await {
            Ok(result) => result,
            Err(RetryError::Cancelled)
            | Err(RetryError::Exhausted {
                last: AttemptError::Cancelled(_),
                ..
            }) => return JobOutcome::Cancelled,
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::warn!(
                    "Skipping message {} - enrichment failed after {} attempts: {}",
                    message_id,
                    attempts,
                    last
                );
                return JobOutcome::Failed;
            }
        };

        if cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        if let Err(e) = self.ctx.store.put(self.user_id, message_id, &result).await {
            tracing::error!("Error saving summary for {}: {:?}", message_id, e);
        }

        if cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        if self.emit(tx, cancel, message_id, result, false).await {
            JobOutcome::Enriched
        } else {
            JobOutcome::Cancelled
        }
    }

    async fn enrich(
        &self,
        request: &EnrichmentRequest,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentResult, RetryError<AttemptError>> {
        with_retry(cancel, &self.ctx.settings.retry, |_attempt| {
            self.attempt(request, cancel)
        })
        .await
    }

    /// One engine call, holding a throttle permit only while it is in flight.
    /// An invalid answer counts as a failed attempt.
    async fn attempt(
        &self,
        request: &EnrichmentRequest,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentResult, AttemptError> {
        // Backoff waits happen here, without a permit
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled(Cancelled)),
            _ = self.ctx.engine.ready() => {}
        }

        let permit = self
            .ctx
            .throttle
            .acquire(cancel)
            .await
            .map_err(AttemptError::Cancelled)?;
        // A cancelled call is dropped mid-flight and its answer discarded
        let analyzed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AttemptError::Cancelled(Cancelled)),
            analyzed = self.ctx.engine.analyze(request) => analyzed.map_err(AttemptError::Engine),
        };
        drop(permit);

        let result = analyzed?;
        result.validate().map_err(AttemptError::Invalid)?;
        Ok(result)
    }

    /// `false` when the run was abandoned before the result could be sent
    async fn emit(
        &self,
        tx: &mpsc::Sender<EnrichedEmail>,
        cancel: &CancellationToken,
        message_id: &str,
        result: EnrichmentResult,
        from_cache: bool,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let email = EnrichedEmail {
            message_id: message_id.to_string(),
            from_cache,
            result,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            // Err: consumer is gone, nobody will read the rest
            sent = tx.send(email) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::time::{timeout, Duration};

    use crate::pipeline::{
        adapter::collect_all, EnrichmentThrottle, PipelineContext, PipelineSettings,
        RetryPolicy,
    };
    use crate::testing::fakes::{EngineBehavior, FakeMailbox, RecordingStore, ScriptedEngine};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("msg-{i}")).collect()
    }

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            ..Default::default()
        }
    }

    fn dispatcher(
        mailbox: &FakeMailbox,
        engine: &ScriptedEngine,
        store: &RecordingStore,
        throttle: EnrichmentThrottle,
        settings: PipelineSettings,
    ) -> Dispatcher {
        let ctx = PipelineContext::new(
            Arc::new(engine.clone()),
            Arc::new(store.clone()),
            throttle,
            settings,
        );
        Dispatcher::new(Arc::new(mailbox.clone()), ctx, 7)
    }

    #[tokio::test]
    async fn test_all_items_enriched() {
        let mailbox = FakeMailbox::with_messages(ids(10));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk);
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            fast_settings(),
        );

        let run = dispatcher.run(CancellationToken::new(), ids(10));
        let outcome = collect_all(run).await;

        assert_eq!(outcome.processed, 10);
        let unique: HashSet<_> = outcome.emails.iter().map(|e| e.message_id.clone()).collect();
        assert_eq!(unique.len(), 10);
        assert!(outcome.emails.iter().all(|e| e.result.validate().is_ok()));
        assert!(outcome.emails.iter().all(|e| !e.from_cache));
        assert_eq!(engine.call_count(), 10);
        assert_eq!(store.put_count(), 10);
    }

    #[tokio::test]
    async fn test_stored_items_skip_engine() {
        let mailbox = FakeMailbox::with_messages(ids(10));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk);
        let store = RecordingStore::default();
        store
            .seed(7, "msg-3", crate::model::enrichment::sample_result("ppt"))
            .await;
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            fast_settings(),
        );

        let outcome = collect_all(dispatcher.run(CancellationToken::new(), ids(10))).await;

        assert_eq!(outcome.processed, 10);
        assert_eq!(engine.call_count(), 9);
        assert!(!engine.subjects().contains(&"Subject msg-3".to_string()));
        assert!(!mailbox.fetched().contains(&"msg-3".to_string()));
        let cached: Vec<_> = outcome.emails.iter().filter(|e| e.from_cache).collect();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].message_id, "msg-3");
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_store() {
        let mailbox = FakeMailbox::with_messages(ids(6));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk);
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            fast_settings(),
        );

        let first = collect_all(dispatcher.run(CancellationToken::new(), ids(6))).await;
        let calls_after_first = engine.call_count();
        let second = collect_all(dispatcher.run(CancellationToken::new(), ids(6))).await;

        assert_eq!(calls_after_first, 6);
        assert_eq!(engine.call_count(), 6);
        assert!(second.emails.iter().all(|e| e.from_cache));

        let mut first: Vec<_> = first
            .emails
            .into_iter()
            .map(|e| (e.message_id, e.result))
            .collect();
        let mut second: Vec<_> = second
            .emails
            .into_iter()
            .map(|e| (e.message_id, e.result))
            .collect();
        first.sort_by(|a, b| a.0.cmp(&b.0));
        second.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_only_that_item() {
        let mut mailbox = FakeMailbox::with_messages(ids(5));
        mailbox.fail_fetch("msg-2");
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk);
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            fast_settings(),
        );

        let run = dispatcher.run(CancellationToken::new(), ids(5));
        let done = run.done;
        let mut results = run.results;
        let mut emitted = Vec::new();
        while let Some(email) = results.recv().await {
            emitted.push(email.message_id);
        }
        let stats = done.await.unwrap();

        assert_eq!(emitted.len(), 4);
        assert!(!emitted.contains(&"msg-2".to_string()));
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.enriched, 4);
        assert_eq!(engine.call_count(), 4);
    }

    #[tokio::test]
    async fn test_invalid_answers_are_never_emitted() {
        let mailbox = FakeMailbox::with_messages(ids(3));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysInvalid);
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            fast_settings(),
        );

        let outcome = collect_all(dispatcher.run(CancellationToken::new(), ids(3))).await;

        assert_eq!(outcome.processed, 0);
        // every job used its full attempt budget
        assert_eq!(engine.call_count(), 9);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_engine_recovers_on_third_attempt() {
        let mailbox = FakeMailbox::with_messages(ids(1));
        let engine = ScriptedEngine::new(EngineBehavior::FailTimes(2));
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            PipelineSettings::default(),
        );

        let outcome = collect_all(dispatcher.run(CancellationToken::new(), ids(1))).await;

        assert_eq!(outcome.processed, 1);
        assert_eq!(engine.call_count(), 3);
        let gaps = engine.call_gaps();
        assert_eq!(gaps.len(), 2);
        assert!(gaps[0] >= Duration::from_secs(2));
        assert!(gaps[1] > gaps[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_engine_drops_job_after_max_attempts() {
        let mailbox = FakeMailbox::with_messages(ids(1));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysFail);
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            PipelineSettings::default(),
        );

        let outcome = collect_all(dispatcher.run(CancellationToken::new(), ids(1))).await;

        assert_eq!(outcome.processed, 0);
        assert_eq!(engine.call_count(), 3);
        assert_eq!(outcome.stats.failed, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_still_emits() {
        let mailbox = FakeMailbox::with_messages(ids(4));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk);
        let store = RecordingStore::failing_puts();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            fast_settings(),
        );

        let outcome = collect_all(dispatcher.run(CancellationToken::new(), ids(4))).await;

        assert_eq!(outcome.processed, 4);
        assert_eq!(store.put_count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_engine_concurrency_bounded_by_throttle() {
        let mailbox = FakeMailbox::with_messages(ids(10));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk)
            .with_delay(Duration::from_millis(20));
        let store = RecordingStore::default();
        let throttle = EnrichmentThrottle::new(2);
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            throttle.clone(),
            fast_settings(),
        );

        let outcome = collect_all(dispatcher.run(CancellationToken::new(), ids(10))).await;

        assert_eq!(outcome.processed, 10);
        assert!(engine.peak_concurrency() <= 2);
        assert_eq!(throttle.in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_stream_and_stops_writes() {
        let mailbox = FakeMailbox::with_messages(ids(10));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk)
            .with_delay(Duration::from_millis(50));
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(1),
            fast_settings(),
        );

        let cancel = CancellationToken::new();
        let mut run = dispatcher.run(cancel.clone(), ids(10));

        let first = run.results.recv().await;
        assert!(first.is_some());
        cancel.cancel();
        let puts_at_cancel = store.put_count();

        let drained = timeout(Duration::from_secs(1), async {
            let mut rest = 0;
            while run.results.recv().await.is_some() {
                rest += 1;
            }
            rest
        })
        .await
        .expect("stream should close promptly after cancel");

        let stats = timeout(Duration::from_secs(1), run.done)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.cancelled);
        assert!(drained <= 1);
        assert!(store.put_count() <= puts_at_cancel);
        assert!(stats.enriched + stats.cached < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_slow_engine_call() {
        let mailbox = FakeMailbox::with_messages(ids(4));
        let engine =
            ScriptedEngine::new(EngineBehavior::AlwaysOk).with_delay(Duration::from_secs(30));
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(2),
            fast_settings(),
        );

        let cancel = CancellationToken::new();
        let mut run = dispatcher.run(cancel.clone(), ids(4));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(engine.call_count() > 0);
        cancel.cancel();
        let cancelled_at = tokio::time::Instant::now();

        while run.results.recv().await.is_some() {}
        let waited = cancelled_at.elapsed();

        let stats = run.done.await.unwrap();
        assert!(waited < Duration::from_secs(1), "stream open {waited:?} after cancel");
        assert!(stats.cancelled);
        assert_eq!(stats.enriched, 0);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_holds_no_throttle_permit() {
        let mailbox = FakeMailbox::with_messages(ids(3));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk)
            .with_ready_delay(Duration::from_secs(30));
        let store = RecordingStore::default();
        let throttle = EnrichmentThrottle::new(1);
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            throttle.clone(),
            fast_settings(),
        );

        let run = dispatcher.run(CancellationToken::new(), ids(3));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(throttle.in_use(), 0);
        assert_eq!(engine.call_count(), 0);

        let outcome = collect_all(run).await;
        assert_eq!(outcome.processed, 3);
        assert_eq!(throttle.in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_write_suppresses_emit() {
        let cancel = CancellationToken::new();
        let mailbox = FakeMailbox::with_messages(ids(3));
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk);
        let store = RecordingStore::cancelling_on_put(cancel.clone());
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(1),
            PipelineSettings {
                workers: 1,
                ..fast_settings()
            },
        );

        let outcome = collect_all(dispatcher.run(cancel, ids(3))).await;

        assert_eq!(store.put_count(), 1);
        assert_eq!(outcome.processed, 0);
        assert_eq!(outcome.stats.enriched, 0);
        assert!(outcome.stats.cancelled);
    }

    #[tokio::test]
    async fn test_empty_batch_closes_immediately() {
        let mailbox = FakeMailbox::with_messages(Vec::new());
        let engine = ScriptedEngine::new(EngineBehavior::AlwaysOk);
        let store = RecordingStore::default();
        let dispatcher = dispatcher(
            &mailbox,
            &engine,
            &store,
            EnrichmentThrottle::new(10),
            fast_settings(),
        );

        let outcome = collect_all(dispatcher.run(CancellationToken::new(), Vec::new())).await;
        assert_eq!(outcome.processed, 0);
        assert_eq!(engine.call_count(), 0);
    }
}
