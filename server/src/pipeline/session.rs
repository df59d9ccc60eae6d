use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::enrichment::EnrichedEmail;

use super::{
    adapter::{collect_all, deliver, forward_incremental, BatchOutcome, StreamEvent},
    dispatcher::Dispatcher,
    traits::{MailProvider, ProviderError},
    PipelineContext,
};

/// Stored summaries replayed at the start of a stream
const HISTORY_LIMIT: u64 = 50;

const EVENT_BUFFER: usize = 16;

/// One user's sync against one mailbox
pub struct SyncSession {
    provider: Arc<dyn MailProvider>,
    ctx: PipelineContext,
    user_id: i32,
}

impl SyncSession {
    pub fn new(provider: Arc<dyn MailProvider>, ctx: PipelineContext, user_id: i32) -> Self {
        Self {
            provider,
            ctx,
            user_id,
        }
    }

    async fn list_ids(&self, query: &str) -> Result<Vec<String>, ProviderError> {
        let ids = self
            .provider
            .list(query, self.ctx.settings.page_size)
            .await?;
        tracing::info!(
            "Found {} messages for user {} matching {:?}",
            ids.len(),
            self.user_id,
            query
        );
        Ok(ids)
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.provider.clone(), self.ctx.clone(), self.user_id)
    }

    /// List, enrich and wait for every result
    pub async fn sync_batch(
        &self,
        cancel: CancellationToken,
        query: &str,
    ) -> Result<BatchOutcome, ProviderError> {
        let ids = self.list_ids(query).await?;
        if ids.is_empty() {
            return Ok(BatchOutcome::default());
        }

        Ok(collect_all(self.dispatcher().run(cancel, ids)).await)
    }

    /// Stored history first, then live results as they are produced.
    ///
    /// The returned receiver closes after `Complete`, or as soon as `cancel`
    /// fires. Dropping it cancels the run.
    pub fn stream(self, cancel: CancellationToken, query: String) -> mpsc::Receiver<StreamEvent> {
        let (sink, events) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            if !self.replay_history(&sink, &cancel).await {
                return;
            }

            let ids = match self.list_ids(&query).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!("Listing messages for user {} failed: {}", self.user_id, e);
                    if deliver(&sink, &cancel, StreamEvent::error(e.code(), e.to_string())).await {
                        deliver(&sink, &cancel, StreamEvent::Complete).await;
                    }
                    return;
                }
            };

            let heartbeat = self.ctx.settings.heartbeat;
            let run = self.dispatcher().run(cancel.clone(), ids);
            let outcome = forward_incremental(run, sink, cancel, heartbeat).await;
            tracing::debug!("Stream for user {} ended: {:?}", self.user_id, outcome);
        });

        events
    }

    async fn replay_history(
        &self,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> bool {
        let history = match self
            .ctx
            .store
            .list_for_user(self.user_id, None, HISTORY_LIMIT)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("Could not load history for user {}: {:?}", self.user_id, e);
                return true;
            }
        };

        for (message_id, result) in history {
            let email = EnrichedEmail {
                message_id,
                from_cache: true,
                result,
            };
            if !deliver(sink, cancel, StreamEvent::Data(email)).await {
                return false;
            }
        }
        true
    }
}
