//! # cachegate
//!
//! A cache-orchestration layer: given a key, a value-producing computation and a
//! validity policy, it guarantees that concurrent requests for the same missing key
//! trigger the computation at most once, that results are stamped with
//! expiration/priority/dependency metadata, and that reads transparently traverse a
//! fast tier backed by a durable tier.
//!
//! ## Layers
//!
//! A read request goes through the following steps:
//!
//! - The [`CacheService`](service::CacheService) asks its provider for the value —
//!   the cheap path, taken by every call.
//! - On a miss, the in-flight task registry either shares the fill that is already
//!   running for that key, or registers a new one. Exactly one value factory runs per
//!   key; all concurrent callers await the same settled outcome, success or failure.
//! - The produced value is stamped with a [`CachePolicyItem`](policy::CachePolicyItem)
//!   and written through the provider — which may itself be a
//!   [`TieredCacheProvider`](provider::TieredCacheProvider) composing a fast and a
//!   durable tier with background backfills.
//!
//! Failed computations are never cached: the failure propagates to every waiter and
//! the next call starts a fresh attempt. Hit/miss monitors are notified outside the
//! critical path.
//!
//! ## Metrics
//!
//! All operations report statsd metrics through the [`metric!`] macro, tagged per
//! concern: `caches.access`, `caches.hit`, `caches.miss`, `caches.computation`,
//! `caches.coalesced`, and the tier-level `caches.tier.*` counters. Metrics are
//! inert unless [`metrics::configure_statsd`] has been called.

#[macro_use]
pub mod metrics;

mod config;
mod error;
mod registry;
mod types;

pub mod monitor;
pub mod policy;
pub mod provider;
pub mod service;

pub use config::CacheServiceConfig;
pub use error::{CacheError, CacheResult};
pub use registry::{TaskHandle, TaskRegistry};
pub use types::{CacheEntry, CacheKey, CacheValue};
