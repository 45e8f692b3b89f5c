//! The in-flight task registry.
//!
//! The registry guarantees that at most one fill runs per key at any instant, while
//! every concurrent requester of that key awaits the same shared outcome. This is the
//! single-flight half of stampede protection (the policy jitter being the other half).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::{CacheError, CacheResult};
use crate::types::{CacheKey, CacheValue};

/// The handle to an in-flight fill.
///
/// Cloneable; all clones resolve to the same outcome. Dropping a clone abandons only
/// that waiter's interest — the producing task itself runs on the runtime and is not
/// cancelled by waiters going away.
pub type TaskHandle = Shared<BoxFuture<'static, CacheResult<CacheValue>>>;

struct InFlightTask {
    /// Identity of this attempt. The settlement continuation only removes the entry
    /// whose id it was spawned for, so it can never reap a successor attempt under
    /// the same key.
    id: u64,
    handle: TaskHandle,
}

/// Deduplicates concurrent fill operations per key.
///
/// Entries live for the duration of exactly one producer run: inserted when the first
/// requester misses, removed by a settlement continuation once the outcome is visible
/// to every holder of the shared handle. Failed outcomes are not retained; the next
/// request after a failure starts a fresh attempt.
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<CacheKey, InFlightTask>>>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Default::default(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns the handle of the currently running fill for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<TaskHandle> {
        self.tasks
            .lock()
            .unwrap()
            .get(key)
            .map(|task| task.handle.clone())
    }

    /// Returns the running fill for `key`, or registers a new one built by `produce`.
    ///
    /// The check-and-insert is atomic with respect to concurrent calls for the same
    /// key: `produce` is only invoked (and its future only spawned) for the single
    /// caller that actually inserts. The registry lock is never held across an await
    /// point, so fills for unrelated keys do not serialize each other.
    pub fn get_or_add<F>(&self, key: &CacheKey, produce: F) -> TaskHandle
    where
        F: FnOnce() -> BoxFuture<'static, CacheResult<CacheValue>>,
    {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get(key) {
            // a pending fill: share it
            Some(task) if task.handle.peek().is_none() => {
                metric!(counter("caches.coalesced") += 1);
                return task.handle.clone();
            }
            // a fill that settled but whose continuation has not run yet is logically
            // gone already; drop it here so this attempt starts fresh
            Some(_) => {
                tasks.remove(key);
            }
            None => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // The producer is detached from its waiters: a waiter dropping out (e.g. on
        // cancellation) must never tear down a computation other callers depend on.
        let join = tokio::spawn(produce());
        let handle: TaskHandle = async move {
            match join.await {
                Ok(outcome) => outcome,
                Err(err) => Err(CacheError::Factory(format!("fill task failed: {err}"))),
            }
        }
        .boxed()
        .shared();

        tasks.insert(
            key.clone(),
            InFlightTask {
                id,
                handle: handle.clone(),
            },
        );
        metric!(gauge("caches.inflight_tasks") = tasks.len() as u64);
        drop(tasks);

        // Settlement continuation: wakes together with the waiters, strictly after the
        // outcome is available to them, and drops the entry exactly once. Removing any
        // earlier would let a concurrent requester start a redundant second fill while
        // the first is still pending.
        let tasks = Arc::clone(&self.tasks);
        let settled = handle.clone();
        let reaper_key = key.clone();
        tokio::spawn(async move {
            let _ = settled.await;
            let mut tasks = tasks.lock().unwrap();
            if tasks.get(&reaper_key).is_some_and(|task| task.id == id) {
                tasks.remove(&reaper_key);
                metric!(gauge("caches.inflight_tasks") = tasks.len() as u64);
            }
        });

        handle
    }

    /// The number of fills currently in flight.
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_flight = self.tasks.try_lock().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("TaskRegistry")
            .field("in-flight tasks", &in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Lets spawned producers and settlement continuations run on the
    /// current-thread test runtime.
    async fn drain() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn produce_u32(calls: Arc<AtomicUsize>, value: u32) -> BoxFuture<'static, CacheResult<CacheValue>> {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(CacheValue::new(value))
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_concurrent_requesters_share_one_fill() {
        let registry = TaskRegistry::new();
        let key = CacheKey::from("a");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = registry.get_or_add(&key, || produce_u32(calls.clone(), 42));
        let second = registry.get_or_add(&key, || produce_u32(calls.clone(), 99));

        let (first, second) = futures::join!(first, second);
        assert_eq!(*first.unwrap().downcast::<u32>().unwrap(), 42);
        assert_eq!(*second.unwrap().downcast::<u32>().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrelated_keys_run_independently() {
        let registry = TaskRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = registry.get_or_add(&CacheKey::from("a"), || produce_u32(calls.clone(), 1));
        let b = registry.get_or_add(&CacheKey::from("b"), || produce_u32(calls.clone(), 2));

        let (a, b) = futures::join!(a, b);
        assert_eq!(*a.unwrap().downcast::<u32>().unwrap(), 1);
        assert_eq!(*b.unwrap().downcast::<u32>().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entry_removed_after_settlement() {
        let registry = TaskRegistry::new();
        let key = CacheKey::from("a");
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = registry.get_or_add(&key, || produce_u32(calls.clone(), 7));
        assert!(registry.get(&key).is_some());

        handle.await.unwrap();
        drain().await;

        assert!(registry.get(&key).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failure_propagates_and_is_not_retained() {
        let registry = TaskRegistry::new();
        let key = CacheKey::from("a");

        let failing =
            || async { Err::<CacheValue, _>(CacheError::Factory("boom".into())) }.boxed();
        let first = registry.get_or_add(&key, failing);
        let second = registry.get_or_add(&key, failing);

        let (first, second) = futures::join!(first, second);
        assert_eq!(first.unwrap_err(), CacheError::Factory("boom".into()));
        assert_eq!(second.unwrap_err(), CacheError::Factory("boom".into()));
        drain().await;

        // the failed attempt is gone; the next call starts fresh and can succeed
        let calls = Arc::new(AtomicUsize::new(0));
        let retry = registry.get_or_add(&key, || produce_u32(calls.clone(), 42));
        assert_eq!(*retry.await.unwrap().downcast::<u32>().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_cancel_producer() {
        let registry = TaskRegistry::new();
        let key = CacheKey::from("a");
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = registry.get_or_add(&key, || produce_u32(calls.clone(), 42));
        drop(handle);
        drain().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_settled_entry_never_serves_a_new_attempt() {
        let registry = TaskRegistry::new();
        let key = CacheKey::from("a");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = registry.get_or_add(&key, || produce_u32(calls.clone(), 1));
        first.await.unwrap();

        // no drain: the settlement continuation may not have run yet, but a settled
        // fill must not be shared with a fresh attempt
        let second = registry.get_or_add(&key, || produce_u32(calls.clone(), 2));
        assert_eq!(*second.await.unwrap().downcast::<u32>().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drain().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_producer_settles_with_error() {
        let registry = TaskRegistry::new();
        let key = CacheKey::from("a");

        let handle = registry.get_or_add(&key, || async { panic!("factory blew up") }.boxed());
        let outcome = handle.await;
        assert!(matches!(outcome, Err(CacheError::Factory(_))));

        drain().await;
        assert!(registry.is_empty());
    }
}
