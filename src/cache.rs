//! TTL memoization of ranked search pages.
//!
//! The engine talks to the cache only through [`ResultCache`], so an external
//! store can replace [`MemoryCache`]. Errors from either operation are treated
//! by the engine as a miss (reads) or ignored (writes).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::entities::trial::TrialSearchPage;
use crate::error::TrialFinderError;

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<TrialSearchPage>, TrialFinderError>;
    async fn set(&self, key: &str, page: &TrialSearchPage) -> Result<(), TrialFinderError>;
}

struct CacheEntry {
    page: TrialSearchPage,
    expires_at: Instant,
}

/// Process-local cache. Expired entries are dropped lazily on read and swept
/// on write.
pub struct MemoryCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    /// A zero `ttl` disables storage entirely.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<TrialSearchPage>, TrialFinderError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.page.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, page: &TrialSearchPage) -> Result<(), TrialFinderError> {
        if self.ttl.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                page: page.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }
}
