use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::pipeline::traits::ResultStore;

use super::enrichment::EnrichmentResult;

#[derive(Debug, Clone)]
struct StoredSummary {
    user_id: i32,
    result: EnrichmentResult,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, StoredSummary>,
    next_seq: u64,
}

/// Process-local result store, used when no database is configured.
/// Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    inner: RwLock<Inner>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }
}

pub(crate) fn matches_query(result: &EnrichmentResult, query: &str) -> bool {
    let query = query.to_lowercase();
    let company = result.company.as_deref().unwrap_or_default();
    [result.summary.as_str(), result.category.as_str(), company]
        .iter()
        .any(|field| field.to_lowercase().contains(&query))
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn get(&self, message_id: &str) -> anyhow::Result<Option<EnrichmentResult>> {
        let inner = self.inner.read().await;
        Ok(inner.by_id.get(message_id).map(|s| s.result.clone()))
    }

    async fn put(
        &self,
        user_id: i32,
        message_id: &str,
        result: &EnrichmentResult,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.by_id.insert(
            message_id.to_string(),
            StoredSummary {
                user_id,
                result: result.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: i32,
        query: Option<&str>,
        limit: u64,
    ) -> anyhow::Result<Vec<(String, EnrichmentResult)>> {
        let inner = self.inner.read().await;
        let query = query.map(str::trim).filter(|q| !q.is_empty());

        let mut found: Vec<_> = inner
            .by_id
            .iter()
            .filter(|(_, s)| s.user_id == user_id)
            .filter(|(_, s)| query.map_or(true, |q| matches_query(&s.result, q)))
            .collect();
        found.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));

        Ok(found
            .into_iter()
            .take(limit as usize)
            .map(|(id, s)| (id.clone(), s.result.clone()))
            .collect())
    }
}
