use crate::ServerState;
use anyhow::Context;
use tokio::time::{timeout, Duration};

pub async fn answer_cache_cleanup(state: ServerState) -> anyhow::Result<()> {
    let purged = timeout(Duration::from_secs(5), state.answer_cache.purge_expired())
        .await
        .context("Timed out purging enrichment answer cache")?;

    if purged > 0 {
        tracing::debug!(
            "Purged {} expired enrichment answers, {} left",
            purged,
            state.answer_cache.len().await
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        model::{enrichment::sample_result, memory_store::MemoryResultStore},
        rate_limiters::RateLimiters,
        server_config::cfg,
        HttpClient,
    };

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_expired_answers() {
        let state = ServerState::new(
            HttpClient::new(),
            RateLimiters::new(10, 100, 1, 50),
            Arc::new(MemoryResultStore::new()),
        );
        state
            .answer_cache
            .set("user:1:subject:snippet", sample_result("ppt"))
            .await;

        answer_cache_cleanup(state.clone()).await.unwrap();
        assert_eq!(state.answer_cache.len().await, 1);

        tokio::time::advance(Duration::from_secs(cfg.cache.ttl_secs + 1)).await;
        answer_cache_cleanup(state.clone()).await.unwrap();
        assert_eq!(state.answer_cache.len().await, 0);
    }
}
