//! The cache policy model.
//!
//! A [`CachePolicy`] is a stateless factory that turns a `(key, value)` pair into a
//! concrete, immutable [`CachePolicyItem`] at the moment the value is stored. Policies
//! compose: [`expires_after`] builds the expiration leaf, and the
//! [`CachePolicyExt`] decorators override individual fields of whatever the wrapped
//! policy produced.
//!
//! Expirations are jittered so that a burst of keys created together does not expire
//! together and stampede the backing store when it does.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rand::Rng;

use crate::error::{CacheError, CacheResult};
use crate::types::{CacheKey, CacheValue};

mod dependency;
mod item;

pub use dependency::{CacheDependency, CacheValidationState};
pub use item::{CachePolicyItem, CachePriority, PriorityLevel};

/// A factory for [`CachePolicyItem`]s.
///
/// Implementations must be stateless with respect to the values they stamp: the same
/// policy instance is shared by all fills of an orchestrator.
pub trait CachePolicy: Send + Sync {
    /// Creates the policy item for a value about to be stored under `key`.
    fn create_item(&self, key: &CacheKey, value: &CacheValue) -> CachePolicyItem;
}

/// A policy item is itself a (constant) policy, stamping every value with a copy
/// of itself.
impl CachePolicy for CachePolicyItem {
    fn create_item(&self, _key: &CacheKey, _value: &CacheValue) -> CachePolicyItem {
        self.clone()
    }
}

/// Decorator combinators available on every policy.
pub trait CachePolicyExt: CachePolicy + Sized {
    /// Overrides the priority of every item the wrapped policy produces.
    fn with_priority(self, priority: CachePriority) -> PriorityPolicy<Self> {
        PriorityPolicy {
            inner: self,
            priority,
        }
    }

    /// Overrides the priority with the preset high priority.
    fn with_high_priority(self) -> PriorityPolicy<Self> {
        self.with_priority(CachePriority::high())
    }
}

impl<P: CachePolicy + Sized> CachePolicyExt for P {}

/// Creates a policy whose items expire `ttl` from the moment they are stored.
///
/// The actual expiration carries a uniform jitter spanning `min(ttl/20, 1h)`, centered
/// on the nominal expiry, so that values cached in one burst spread their expiry out
/// instead of all missing at once. A zero `ttl` (or one beyond what a timestamp can
/// represent) is a validation error at this call.
pub fn expires_after(ttl: Duration) -> CacheResult<ExpiresPolicy> {
    if ttl.is_zero() {
        return Err(CacheError::Validation(
            "expiration duration must be positive".into(),
        ));
    }
    let ttl = TimeDelta::from_std(ttl)
        .map_err(|_| CacheError::Validation("expiration duration out of range".into()))?;
    Ok(ExpiresPolicy { ttl })
}

/// The policy produced by [`expires_after`].
#[derive(Debug, Clone)]
pub struct ExpiresPolicy {
    ttl: TimeDelta,
}

impl ExpiresPolicy {
    /// The jitter range for this policy's time-to-live: `min(ttl/20, 1h)`.
    fn jitter_range(&self) -> TimeDelta {
        (self.ttl / 20).min(TimeDelta::hours(1))
    }

    fn jitter(&self) -> TimeDelta {
        let half = self.jitter_range().num_milliseconds() / 2;
        if half == 0 {
            return TimeDelta::zero();
        }
        TimeDelta::milliseconds(rand::thread_rng().gen_range(-half..=half))
    }
}

impl CachePolicy for ExpiresPolicy {
    fn create_item(&self, _key: &CacheKey, _value: &CacheValue) -> CachePolicyItem {
        CachePolicyItem::new(Utc::now() + self.ttl + self.jitter())
    }
}

/// The decorator produced by [`CachePolicyExt::with_priority`].
#[derive(Debug, Clone)]
pub struct PriorityPolicy<P> {
    inner: P,
    priority: CachePriority,
}

impl<P: CachePolicy> CachePolicy for PriorityPolicy<P> {
    fn create_item(&self, key: &CacheKey, value: &CacheValue) -> CachePolicyItem {
        self.inner
            .create_item(key, value)
            .set_priority(self.priority.clone())
    }
}
