use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::RwLock,
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// Short-lived key/value cache. Expired entries read as absent; `purge_expired`
/// only reclaims memory. Clones share the same entries.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    entries: Arc<RwLock<HashMap<String, Entry<T>>>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn set(&self, key: impl Into<String>, value: T) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Entries held, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
