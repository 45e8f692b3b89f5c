use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CacheError, CacheResult};
use crate::policy::CachePolicyItem;
use crate::types::{CacheEntry, CacheKey, CacheValue};

use super::{CacheProvider, DurableCacheProvider};

/// Composes a fast tier and a durable tier behind the single provider contract.
///
/// Reads try the near tier first and fall through to the durable tier, backfilling the
/// near tier in the background so the caller is never delayed by it. Writes drop the
/// near-tier entry, write through to the durable tier, and only then backfill — that
/// ordering closes the window in which the near tier could serve old data after the
/// durable tier has already committed new data.
pub struct TieredCacheProvider {
    near: Arc<dyn CacheProvider>,
    durable: Arc<dyn DurableCacheProvider>,
}

impl TieredCacheProvider {
    pub fn new(near: Arc<dyn CacheProvider>, durable: Arc<dyn DurableCacheProvider>) -> Self {
        Self { near, durable }
    }

    /// Writes an entry into the near tier as a detached background task.
    fn backfill_near(&self, entry: CacheEntry) {
        let near = Arc::clone(&self.near);
        tokio::spawn(async move {
            if let Err(e) = near.set(&entry.key, entry.value, entry.policy).await {
                tracing::error!(error = %e, key = %entry.key, "Near-tier backfill failed");
            }
        });
    }
}

impl std::fmt::Debug for TieredCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCacheProvider").finish()
    }
}

/// Folds the outcome of a fan-out over both tiers into one result.
///
/// There is no rollback: whichever tier succeeded has already taken effect, and the
/// failure of the other is surfaced as an aggregate provider error.
fn combine_tiers(near: CacheResult<()>, durable: CacheResult<()>) -> CacheResult<()> {
    match (near, durable) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) => Err(CacheError::Provider(format!("near tier failed: {e}"))),
        (Ok(()), Err(e)) => Err(CacheError::Provider(format!("durable tier failed: {e}"))),
        (Err(near), Err(durable)) => Err(CacheError::Provider(format!(
            "both tiers failed: near: {near}; durable: {durable}"
        ))),
    }
}

#[async_trait]
impl CacheProvider for TieredCacheProvider {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheValue>> {
        if let Some(value) = self.near.get(key).await? {
            metric!(counter("caches.tier.near_hit") += 1);
            return Ok(Some(value));
        }

        let Some(entry) = self.durable.get_entry(key).await? else {
            return Ok(None);
        };
        metric!(counter("caches.tier.durable_hit") += 1);

        let value = entry.value.clone();
        self.backfill_near(entry);
        Ok(Some(value))
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: CacheValue,
        policy: CachePolicyItem,
    ) -> CacheResult<()> {
        // Drop the near-tier entry first: once the durable tier commits below, no
        // reader may observe the previous value anymore.
        self.near.remove(key).await?;
        self.durable.set(key, value.clone(), policy.clone()).await?;

        self.backfill_near(CacheEntry {
            key: key.clone(),
            value,
            policy,
        });
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        let (near, durable) = futures::join!(self.near.remove(key), self.durable.remove(key));
        combine_tiers(near, durable)
    }

    async fn clear(&self) -> CacheResult<()> {
        let (near, durable) = futures::join!(self.near.clear(), self.durable.clear());
        combine_tiers(near, durable)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use crate::provider::{MemoryCacheConfig, MemoryCacheProvider};

    use super::*;

    fn tiers() -> (Arc<MemoryCacheProvider>, Arc<MemoryCacheProvider>, TieredCacheProvider) {
        let near = Arc::new(MemoryCacheProvider::new(MemoryCacheConfig::default()));
        let durable = Arc::new(MemoryCacheProvider::new(MemoryCacheConfig::default()));
        let tiered = TieredCacheProvider::new(near.clone(), durable.clone());
        (near, durable, tiered)
    }

    fn fresh_policy() -> CachePolicyItem {
        CachePolicyItem::new(Utc::now() + TimeDelta::hours(1))
    }

    /// Lets detached backfill tasks run on the current-thread test runtime.
    async fn drain() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_set_is_immediately_readable() {
        let (_near, _durable, tiered) = tiers();
        let key = CacheKey::from("a");

        tiered
            .set(&key, CacheValue::new(1u32), fresh_policy())
            .await
            .unwrap();

        let value = tiered.get(&key).await.unwrap().unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_durable_tier_is_authoritative() {
        let (near, _durable, tiered) = tiers();
        let key = CacheKey::from("a");

        tiered
            .set(&key, CacheValue::new(1u32), fresh_policy())
            .await
            .unwrap();
        drain().await;

        // wipe the near tier; the durable tier still serves the value
        near.clear().await.unwrap();
        let value = tiered.get(&key).await.unwrap().unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_durable_hit_backfills_near_tier() {
        let (near, durable, tiered) = tiers();
        let key = CacheKey::from("a");
        let policy = fresh_policy();

        // entry exists only in the durable tier
        durable
            .set(&key, CacheValue::new(1u32), policy.clone())
            .await
            .unwrap();
        assert!(near.get(&key).await.unwrap().is_none());

        let value = tiered.get(&key).await.unwrap().unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 1);

        drain().await;
        let near_value = near.get(&key).await.unwrap().unwrap();
        assert_eq!(*near_value.downcast::<u32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_replaces_near_tier_entry() {
        let (near, _durable, tiered) = tiers();
        let key = CacheKey::from("a");

        tiered
            .set(&key, CacheValue::new(1u32), fresh_policy())
            .await
            .unwrap();
        drain().await;

        tiered
            .set(&key, CacheValue::new(2u32), fresh_policy())
            .await
            .unwrap();

        // even before the backfill lands, the near tier no longer serves the old value
        let near_value = near.get(&key).await.unwrap();
        assert!(near_value.is_none() || near_value.unwrap().downcast::<u32>().map(|v| *v) == Some(2));

        let value = tiered.get(&key).await.unwrap().unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_fans_out() {
        let (near, durable, tiered) = tiers();
        let key = CacheKey::from("a");

        tiered
            .set(&key, CacheValue::new(1u32), fresh_policy())
            .await
            .unwrap();
        drain().await;

        tiered.remove(&key).await.unwrap();
        assert!(near.get(&key).await.unwrap().is_none());
        assert!(durable.get(&key).await.unwrap().is_none());
        assert!(tiered.get(&key).await.unwrap().is_none());
    }
}
