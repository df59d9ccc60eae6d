use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    model::enrichment::EnrichmentResult,
    pipeline::traits::{EnrichmentEngine, EnrichmentRequest},
    state::ttl_cache::TtlCache,
};

/// Answer cache in front of an engine. Identical subject and snippet for the
/// same user within the TTL reuse the previous answer.
pub struct CachedEngine {
    inner: Arc<dyn EnrichmentEngine>,
    cache: TtlCache<EnrichmentResult>,
    max_key_len: usize,
}

impl CachedEngine {
    pub fn new(
        inner: Arc<dyn EnrichmentEngine>,
        cache: TtlCache<EnrichmentResult>,
        max_key_len: usize,
    ) -> Self {
        Self {
            inner,
            cache,
            max_key_len,
        }
    }

    fn cache_key(&self, request: &EnrichmentRequest) -> String {
        let key = format!(
            "user:{}:{}:{}",
            request.user_id, request.subject, request.snippet
        );
        match key.char_indices().nth(self.max_key_len) {
            Some((idx, _)) => key[..idx].to_string(),
            None => key,
        }
    }
}

#[async_trait]
impl EnrichmentEngine for CachedEngine {
    async fn ready(&self) {
        self.inner.ready().await;
    }

    async fn analyze(&self, request: &EnrichmentRequest) -> anyhow::Result<EnrichmentResult> {
        let key = self.cache_key(request);
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!("Enrichment answer cache hit");
            return Ok(hit);
        }

        let result = self.inner.analyze(request).await?;
        // Invalid answers get retried upstream and must reach the engine again
        if result.validate().is_ok() {
            self.cache.set(key, result.clone()).await;
        }
        Ok(result)
    }
}
