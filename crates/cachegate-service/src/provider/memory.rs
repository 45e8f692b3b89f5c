use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;
use crate::policy::CachePolicyItem;
use crate::types::{CacheEntry, CacheKey, CacheValue};

use super::{CacheProvider, DurableCacheProvider};

/// Configuration for the in-memory provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// The maximum number of entries held in memory.
    pub capacity: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self { capacity: 100 * 1024 }
    }
}

/// An item saved in the in-memory moka cache.
#[derive(Debug, Clone)]
struct InMemoryItem {
    /// When to evict this item from the in-memory cache.
    deadline: Instant,
    value: CacheValue,
    policy: CachePolicyItem,
}

/// A struct implementing [`moka::Expiry`] that uses the [`InMemoryItem`] [`Instant`] as
/// the explicit expiration time.
struct ItemExpiration;

/// Returns the duration between the `current_time` and `target_time` in the future.
/// In case the `target_time` is already elapsed (it is in the past relative to
/// `current_time`), this will return `Some(ZERO)`.
fn saturating_duration_since(current_time: Instant, target_time: Instant) -> Option<Duration> {
    Some(
        target_time
            .checked_duration_since(current_time)
            .unwrap_or_default(),
    )
}

impl moka::Expiry<CacheKey, InMemoryItem> for ItemExpiration {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &InMemoryItem,
        current_time: Instant,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &InMemoryItem,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }
}

/// A fast-tier provider keeping values in process memory.
///
/// Eviction follows each item's policy expiration through a [`moka::Expiry`] deadline.
/// Dependency-based invalidation cannot be expressed as a deadline, so items whose
/// policy reports invalid are additionally dropped at read time.
pub struct MemoryCacheProvider {
    cache: moka::future::Cache<CacheKey, InMemoryItem>,
}

impl MemoryCacheProvider {
    pub fn new(config: MemoryCacheConfig) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(config.capacity)
            .expire_after(ItemExpiration)
            .build();
        Self { cache }
    }

    async fn lookup(&self, key: &CacheKey) -> Option<InMemoryItem> {
        let item = self.cache.get(key).await?;
        if !item.policy.is_valid() {
            tracing::trace!(%key, "Dropping invalidated in-memory item");
            self.cache.invalidate(key).await;
            return None;
        }
        Some(item)
    }
}

impl std::fmt::Debug for MemoryCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheProvider")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheValue>> {
        Ok(self.lookup(key).await.map(|item| item.value))
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: CacheValue,
        policy: CachePolicyItem,
    ) -> CacheResult<()> {
        let remaining = (policy.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let item = InMemoryItem {
            deadline: Instant::now() + remaining,
            value,
            policy,
        };
        self.cache.insert(key.clone(), item).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        Ok(())
    }
}

#[async_trait]
impl DurableCacheProvider for MemoryCacheProvider {
    async fn get_entry(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(self.lookup(key).await.map(|item| CacheEntry {
            key: key.clone(),
            value: item.value,
            policy: item.policy,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use crate::policy::CacheDependency;

    use super::*;

    fn provider() -> MemoryCacheProvider {
        MemoryCacheProvider::new(Default::default())
    }

    fn fresh_policy() -> CachePolicyItem {
        CachePolicyItem::new(Utc::now() + TimeDelta::hours(1))
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let provider = provider();
        let key = CacheKey::from("a");

        provider
            .set(&key, CacheValue::new(String::from("value")), fresh_policy())
            .await
            .unwrap();

        let value = provider.get(&key).await.unwrap().unwrap();
        assert_eq!(*value.downcast::<String>().unwrap(), "value");

        provider.remove(&key).await.unwrap();
        assert!(provider.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_elapsed_expiry_is_not_observable() {
        let provider = provider();
        let key = CacheKey::from("a");

        let expired = CachePolicyItem::new(Utc::now() - TimeDelta::seconds(1));
        provider
            .set(&key, CacheValue::new(1u32), expired)
            .await
            .unwrap();

        assert!(provider.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_dependency_drops_entry() {
        let provider = provider();
        let key = CacheKey::from("a");

        let poisoned = fresh_policy()
            .set_dependencies(CacheDependency::expires_at(Utc::now() - TimeDelta::hours(1)));
        provider
            .set(&key, CacheValue::new(1u32), poisoned)
            .await
            .unwrap();

        assert!(provider.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_carries_policy() {
        let provider = provider();
        let key = CacheKey::from("a");
        let policy = fresh_policy();

        provider
            .set(&key, CacheValue::new(1u32), policy.clone())
            .await
            .unwrap();

        let entry = provider.get_entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.policy, policy);
        assert_eq!(entry.key, key);
    }

    #[tokio::test]
    async fn test_clear() {
        let provider = provider();

        provider
            .set(&CacheKey::from("a"), CacheValue::new(1u32), fresh_policy())
            .await
            .unwrap();
        provider
            .set(&CacheKey::from("b"), CacheValue::new(2u32), fresh_policy())
            .await
            .unwrap();

        provider.clear().await.unwrap();
        assert!(provider.get(&CacheKey::from("a")).await.unwrap().is_none());
        assert!(provider.get(&CacheKey::from("b")).await.unwrap().is_none());
    }
}
