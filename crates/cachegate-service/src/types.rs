use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::policy::CachePolicyItem;

/// An opaque cache key.
///
/// Keys are cheap to clone and to hash. The orchestrator treats them as fully opaque;
/// whether a key is representable is up to the backend storing it (the file-backed
/// provider for instance hashes keys and thus accepts anything).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Creates a new cache key.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// A type-erased cache value.
///
/// Values move through providers as `Arc<dyn Any>`; reading one back under the caller's
/// expected type goes through [`downcast`](Self::downcast), and a mismatch is reported
/// as an explicit error by the orchestrator, distinct from "not found".
#[derive(Clone)]
pub struct CacheValue(Arc<dyn Any + Send + Sync>);

impl CacheValue {
    /// Wraps a value for storage.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Attempts to view this value as a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Whether the contained value is a `T`.
    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheValue").finish()
    }
}

/// A value and its policy metadata, as handed between tiers.
///
/// The durable tier returns these so a tiering layer can backfill the fast tier with
/// matching expiry and priority.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The key this entry is stored under.
    pub key: CacheKey,
    /// The stored value.
    pub value: CacheValue,
    /// The policy item stamped onto the value when it was stored.
    pub policy: CachePolicyItem,
}
