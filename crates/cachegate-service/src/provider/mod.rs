//! The provider contract and the backend adapters shipped with it.
//!
//! Providers are the storage collaborators of the orchestrator: they persist values
//! together with their policy metadata and enforce whatever key or payload constraints
//! their backing store has. Backend resources are released when a provider is dropped.

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::policy::CachePolicyItem;
use crate::types::{CacheEntry, CacheKey, CacheValue};

mod fs;
mod memory;
mod tiered;

pub use fs::{FsCacheConfig, FsCacheProvider};
pub use memory::{MemoryCacheConfig, MemoryCacheProvider};
pub use tiered::TieredCacheProvider;

/// The narrow contract every cache backend implements.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Looks up the value stored under `key`, or `None` if there is none (or it is no
    /// longer valid).
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheValue>>;

    /// Stores `value` under `key`, stamped with `policy`.
    async fn set(&self, key: &CacheKey, value: CacheValue, policy: CachePolicyItem)
    -> CacheResult<()>;

    /// Removes the value stored under `key`, if any.
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Removes every stored value.
    async fn clear(&self) -> CacheResult<()>;
}

/// The durable-tier extension of the provider contract.
///
/// A durable tier can hand back a value *together with* its stored policy, which lets a
/// tiering layer backfill its fast tier with matching expiry and priority.
#[async_trait]
pub trait DurableCacheProvider: CacheProvider {
    /// Looks up the full entry stored under `key`.
    async fn get_entry(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;
}
