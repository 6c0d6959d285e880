use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Bounded, TTL-evicting cache keyed by domain.
///
/// Cloning is cheap and shares the underlying map, so the same cache can be
/// handed to every concurrent request.
#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value unless it is missing or older than the TTL.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, entry| !entry.is_expired(ttl));

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    log::debug!("Cache full ({} entries), evicting {oldest}", self.capacity);
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, key: &str) -> Option<V> {
        self.entries.write().await.remove(key).map(|e| e.value)
    }

    /// Number of stored entries, expired ones included until they are evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_fresh_entries() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.insert("example.com", vec!["mx.example.com".to_string()]).await;

        assert_eq!(
            cache.get("example.com").await,
            Some(vec!["mx.example.com".to_string()])
        );
        assert_eq!(cache.get("other.com").await, None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent() {
        let cache = TtlCache::new(10, Duration::from_millis(20));
        cache.insert("example.com", true).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("example.com").await, None);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a.com", 1).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert("b.com", 2).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert("c.com", 3).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a.com").await, None);
        assert_eq!(cache.get("b.com").await, Some(2));
        assert_eq!(cache.get("c.com").await, Some(3));
    }

    #[tokio::test]
    async fn test_capacity_prefers_dropping_expired() {
        let cache = TtlCache::new(2, Duration::from_millis(30));
        cache.insert("old.com", 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.insert("fresh.com", 2).await;
        cache.insert("newer.com", 3).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("fresh.com").await, Some(2));
        assert_eq!(cache.get("newer.com").await, Some(3));
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = TtlCache::new(1, Duration::from_secs(60));
        cache.insert("a.com", 1).await;
        cache.insert("a.com", 2).await;

        assert_eq!(cache.get("a.com").await, Some(2));
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
