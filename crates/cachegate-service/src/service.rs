//! The public-facing cache service.
//!
//! [`CacheService`] coordinates the provider, the in-flight task registry, the policy
//! model and the registered monitors. Its reads are cheap-path first: only a miss ever
//! touches the registry, and only the single caller that registers a fill actually runs
//! a value factory — everyone else awaits the shared outcome.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::config::CacheServiceConfig;
use crate::error::{CacheError, CacheResult};
use crate::monitor::CacheMonitor;
use crate::policy::{self, CachePolicy};
use crate::provider::CacheProvider;
use crate::registry::TaskRegistry;
use crate::types::{CacheKey, CacheValue};

/// The cache orchestrator.
///
/// All state is owned by the instance; two services over the same provider coordinate
/// nothing beyond what the provider itself does.
///
/// Cancellation is per-waiter: dropping the future of any operation abandons only that
/// caller's wait. A fill that other callers share keeps running on the runtime.
pub struct CacheService {
    provider: Arc<dyn CacheProvider>,
    default_policy: Option<Arc<dyn CachePolicy>>,
    tasks: TaskRegistry,
    monitors: RwLock<Vec<Arc<dyn CacheMonitor>>>,
}

impl CacheService {
    /// Creates a service without a default policy: every fill must supply one.
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            provider,
            default_policy: None,
            tasks: TaskRegistry::new(),
            monitors: RwLock::new(Vec::new()),
        }
    }

    /// Creates a service whose fills fall back to `default_policy` when invoked
    /// without an explicit one.
    pub fn with_default_policy(
        provider: Arc<dyn CacheProvider>,
        default_policy: Arc<dyn CachePolicy>,
    ) -> Self {
        Self {
            default_policy: Some(default_policy),
            ..Self::new(provider)
        }
    }

    /// Assembles a service from a [`CacheServiceConfig`].
    pub fn from_config(
        provider: Arc<dyn CacheProvider>,
        config: &CacheServiceConfig,
    ) -> CacheResult<Self> {
        let service = match config.default_ttl {
            Some(ttl) => Self::with_default_policy(provider, Arc::new(policy::expires_after(ttl)?)),
            None => Self::new(provider),
        };
        Ok(service)
    }

    /// Registers a monitor to be notified of every hit and miss.
    pub fn register_monitor(&self, monitor: Arc<dyn CacheMonitor>) {
        self.monitors.write().unwrap().push(monitor);
    }

    /// Tries to read a value of type `T` from the cache.
    ///
    /// If nothing usable is cached but a fill for `key` is currently in flight, this
    /// waits for it to settle and re-checks once — so a `fetch` racing a concurrent
    /// [`fetch_or_add`](Self::fetch_or_add) can observe the value that one writes.
    /// If there is still nothing, `default` is returned; a `fetch` never starts a
    /// computation of its own.
    pub async fn fetch<T>(&self, key: &CacheKey, default: T) -> CacheResult<T>
    where
        T: Any + Clone + Send + Sync,
    {
        metric!(counter("caches.access") += 1);
        if let Some(value) = self.lookup::<T>(key).await? {
            return Ok(value);
        }

        let Some(task) = self.tasks.get(key) else {
            return Ok(default);
        };
        // The outcome belongs to the callers that requested the fill; for a fetch only
        // the settlement matters. A failed fill simply leaves nothing to re-check.
        let _ = task.await;

        Ok(self.lookup::<T>(key).await?.unwrap_or(default))
    }

    /// Reads the value of type `T` cached under `key`, or computes and stores it.
    ///
    /// On a miss, the computation is shared: any number of concurrent `fetch_or_add`
    /// (and [`update`](Self::update)) calls for one key run `factory` at most once, and
    /// every caller receives the same value — or the same failure. Failures are never
    /// cached; the next call after one starts a fresh attempt.
    ///
    /// The value is stamped via `policy` (or the service's default policy) and written
    /// through the provider, unless the resulting policy item is already invalid.
    pub async fn fetch_or_add<T, F, Fut>(
        &self,
        key: &CacheKey,
        factory: F,
        policy: Option<Arc<dyn CachePolicy>>,
    ) -> CacheResult<T>
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        metric!(counter("caches.access") += 1);
        let policy = self.resolve_policy(policy)?;

        if let Some(value) = self.lookup::<T>(key).await? {
            return Ok(value);
        }

        let handle = self
            .tasks
            .get_or_add(key, || self.fill(key.clone(), factory(), policy));
        let value = handle.await?;
        downcast(&value)
    }

    /// Unconditionally recomputes and stores the value for `key`.
    ///
    /// Any currently cached value is ignored, but the recomputation itself is
    /// deduplicated through the same registry as [`fetch_or_add`](Self::fetch_or_add):
    /// concurrent updates for one key collapse onto a single fill.
    pub async fn update<T, F, Fut>(
        &self,
        key: &CacheKey,
        factory: F,
        policy: Option<Arc<dyn CachePolicy>>,
    ) -> CacheResult<T>
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let policy = self.resolve_policy(policy)?;

        let handle = self
            .tasks
            .get_or_add(key, || self.fill(key.clone(), factory(), policy));
        let value = handle.await?;
        downcast(&value)
    }

    /// Removes the value cached under `key`.
    ///
    /// Delegates directly to the provider; there is no mutual exclusion with a
    /// concurrently in-flight fill for the same key. Whichever write reaches the
    /// backend last wins.
    pub async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.provider.remove(key).await
    }

    /// Removes every cached value. The same write-ordering caveat as
    /// [`remove`](Self::remove) applies.
    pub async fn clear(&self) -> CacheResult<()> {
        self.provider.clear().await
    }

    fn resolve_policy(
        &self,
        policy: Option<Arc<dyn CachePolicy>>,
    ) -> CacheResult<Arc<dyn CachePolicy>> {
        policy
            .or_else(|| self.default_policy.clone())
            .ok_or(CacheError::NoCachePolicy)
    }

    /// Reads and type-checks the provider's value for `key`, signalling monitors.
    ///
    /// A present value of the wrong type is neither a hit nor a miss: it is a caller
    /// contract violation, reported as an error and not retried.
    async fn lookup<T>(&self, key: &CacheKey) -> CacheResult<Option<T>>
    where
        T: Any + Clone + Send + Sync,
    {
        match self.provider.get(key).await? {
            Some(value) => {
                let value = downcast(&value)?;
                self.notify_hit(key);
                Ok(Some(value))
            }
            None => {
                self.notify_miss(key);
                Ok(None)
            }
        }
    }

    /// Builds the produce-and-store future a registered fill runs.
    fn fill<T, Fut>(
        &self,
        key: CacheKey,
        factory: Fut,
        policy: Arc<dyn CachePolicy>,
    ) -> BoxFuture<'static, CacheResult<CacheValue>>
    where
        T: Any + Send + Sync,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        async move {
            metric!(counter("caches.computation") += 1);
            let value = CacheValue::new(factory.await?);
            let item = policy.create_item(&key, &value);
            // A value stamped already-invalid is handed to the callers but not stored.
            if item.cache_state().is_valid() {
                provider.set(&key, value.clone(), item).await?;
            }
            Ok(value)
        }
        .boxed()
    }

    fn notify_hit(&self, key: &CacheKey) {
        metric!(counter("caches.hit") += 1);
        self.dispatch(key, |monitor, key| monitor.on_cache_hit(key));
    }

    fn notify_miss(&self, key: &CacheKey) {
        metric!(counter("caches.miss") += 1);
        self.dispatch(key, |monitor, key| monitor.on_cache_miss(key));
    }

    /// Fans a notification out to every registered monitor.
    ///
    /// Each monitor runs in its own detached task: dispatch happens off the caller's
    /// critical path, and a slow or panicking monitor affects neither the caller nor
    /// the other monitors.
    fn dispatch(&self, key: &CacheKey, notify: fn(&dyn CacheMonitor, &CacheKey)) {
        let monitors = self.monitors.read().unwrap();
        for monitor in monitors.iter() {
            let monitor = Arc::clone(monitor);
            let key = key.clone();
            tokio::spawn(async move { notify(monitor.as_ref(), &key) });
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let monitors = self.monitors.try_read().map(|m| m.len()).unwrap_or_default();
        f.debug_struct("CacheService")
            .field("tasks", &self.tasks)
            .field("monitors", &monitors)
            .finish()
    }
}

/// Views a stored value as a `T`, cloning it out of its shared allocation.
fn downcast<T: Any + Clone + Send + Sync>(value: &CacheValue) -> CacheResult<T> {
    value
        .downcast::<T>()
        .map(|value| (*value).clone())
        .ok_or(CacheError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })
}
