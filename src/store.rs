//! Scope instance store.
//!
//! Maps `ScopeKey -> (bean type, qualifier) -> instance`. Each scope owns an
//! independent partition, so unrelated scopes never contend on a shared lock;
//! inside a partition every slot is a `tokio::sync::OnceCell`.
//!
//! Two write primitives are kept deliberately separate:
//!
//! - [`get_or_create`](ScopeInstanceStore::get_or_create) never overwrites;
//!   the first install for a slot wins.
//! - [`replace`](ScopeInstanceStore::replace) always overwrites.
//!
//! Instances installed before a consuming pipeline is cancelled stay in the
//! store; only work that has not yet been installed is abandoned.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use dashmap::DashMap;
use futures::future::Map;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::config::{ConstructionPolicy, RuntimeConfig};
use crate::error::{ScopeError, ScopeResult};
use crate::internal::DisposeBag;
use crate::key::{named_bean_key, BeanKey, QualifierName, ScopeKey};
use crate::traits::{AsyncDispose, Dispose};

/// Type-erased cached instance.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

type Slot = Arc<OnceCell<AnyArc>>;

/// All instances and disposal hooks of one scope.
pub(crate) struct ScopePartition {
    slots: DashMap<BeanKey, Slot, RandomState>,
    disposers: Mutex<DisposeBag>,
    created_at: Instant,
}

impl ScopePartition {
    fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
            disposers: Mutex::new(DisposeBag::default()),
            created_at: Instant::now(),
        }
    }

    /// Returns the slot for `key`, reserving an empty one if needed.
    fn slot(&self, key: &BeanKey) -> Slot {
        if let Some(slot) = self.slots.get(key) {
            return slot.value().clone();
        }
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone()
    }

    fn cached(&self, key: &BeanKey) -> Option<AnyArc> {
        let slot = self.slots.get(key)?;
        let value = slot.value().get().cloned();
        value
    }

    fn instance_count(&self) -> usize {
        self.slots.iter().filter(|entry| entry.value().initialized()).count()
    }

    fn take_disposers(&self) -> DisposeBag {
        std::mem::take(&mut *self.disposers.lock())
    }
}

/// A scope partition that has been removed from the store.
///
/// Lookups can no longer reach it; holding it only keeps its instances alive
/// until its disposal hooks have run.
pub struct DetachedScope {
    key: ScopeKey,
    partition: Arc<ScopePartition>,
}

impl DetachedScope {
    /// Key of the removed scope.
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// Number of instances the scope held when it was removed.
    pub fn instance_count(&self) -> usize {
        self.partition.instance_count()
    }

    /// Time since the scope's partition was created.
    pub fn age(&self) -> Duration {
        self.partition.created_at.elapsed()
    }

    /// Runs async hooks then sync hooks, newest first.
    pub async fn dispose(self) {
        let bag = self.partition.take_disposers();
        if bag.is_empty() {
            return;
        }
        debug!(scope = %self.key, hooks = bag.len(), "running scope disposers");
        bag.run_all().await;
    }

    /// Runs sync hooks only. Pending async hooks are dropped.
    pub fn dispose_sync(self) {
        let skipped = self.partition.take_disposers().run_sync();
        if skipped > 0 {
            warn!(
                scope = %self.key,
                skipped,
                "async disposers dropped by synchronous invalidation; use ScopeLifecycle::destroy"
            );
        }
    }
}

impl fmt::Debug for DetachedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedScope")
            .field("key", &self.key)
            .field("instances", &self.instance_count())
            .finish()
    }
}

/// Concurrent store of scope-bound instances.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{ScopeInstanceStore, ScopeKey};
/// use std::sync::Arc;
///
/// struct Cart { items: Vec<String> }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferrous_scope::ScopeResult<()> {
/// let store = ScopeInstanceStore::new();
/// let scope = ScopeKey::new("req-1");
///
/// let a = store.get_or_create(&scope, "", || async { Ok(Cart { items: vec![] }) }).await?;
/// let b = store.get_or_create(&scope, "", || async { Ok(Cart { items: vec!["x".into()] }) }).await?;
/// assert!(Arc::ptr_eq(&a, &b));
///
/// store.invalidate(&scope);
/// let c = store.get_or_create(&scope, "", || async { Ok(Cart { items: vec![] }) }).await?;
/// assert!(!Arc::ptr_eq(&a, &c));
/// # Ok(())
/// # }
/// ```
pub struct ScopeInstanceStore {
    partitions: DashMap<ScopeKey, Arc<ScopePartition>, RandomState>,
    policy: ConstructionPolicy,
}

impl ScopeInstanceStore {
    /// Creates a store using [`ConstructionPolicy::ReserveThenConstruct`].
    pub fn new() -> Self {
        Self::with_policy(ConstructionPolicy::default())
    }

    /// Creates a store with an explicit construction policy.
    pub fn with_policy(policy: ConstructionPolicy) -> Self {
        Self {
            partitions: DashMap::with_hasher(RandomState::new()),
            policy,
        }
    }

    /// Creates a store from runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::with_policy(config.construction)
    }

    /// Active construction policy.
    pub fn policy(&self) -> ConstructionPolicy {
        self.policy
    }

    fn partition(&self, scope: &ScopeKey) -> Arc<ScopePartition> {
        if let Some(partition) = self.partitions.get(scope) {
            return partition.value().clone();
        }
        self.partitions
            .entry(scope.clone())
            .or_insert_with(|| {
                debug!(scope = %scope, "scope partition created");
                Arc::new(ScopePartition::new())
            })
            .value()
            .clone()
    }

    fn existing_partition(&self, scope: &ScopeKey) -> Option<Arc<ScopePartition>> {
        self.partitions.get(scope).map(|p| p.value().clone())
    }

    /// Returns the instance in the `(T, qualifier)` slot of `scope`, creating
    /// it with `supplier` if the slot is empty.
    ///
    /// Repeated calls for the same slot return the same `Arc`. Under
    /// [`ConstructionPolicy::ReserveThenConstruct`] concurrent first callers
    /// wait for a single construction; under
    /// [`ConstructionPolicy::ConstructThenRace`] each may construct, and only
    /// the first install is kept. A supplier error leaves the slot empty.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        scope: &ScopeKey,
        qualifier: impl Into<QualifierName>,
        supplier: F,
    ) -> ScopeResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ScopeResult<T>> + Send,
    {
        let key = named_bean_key::<T>(qualifier);
        let value = self
            .get_or_create_with(scope, key, erase(supplier), |_, _| {})
            .await?;
        downcast::<T>(value)
    }

    /// Like [`get_or_create`](Self::get_or_create); the installed instance is
    /// also registered as a sync disposer of the scope.
    pub async fn get_or_create_disposable<T, F, Fut>(
        &self,
        scope: &ScopeKey,
        qualifier: impl Into<QualifierName>,
        supplier: F,
    ) -> ScopeResult<Arc<T>>
    where
        T: Dispose,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ScopeResult<T>> + Send,
    {
        let key = named_bean_key::<T>(qualifier);
        let value = self
            .get_or_create_with(scope, key, erase(supplier), |partition, value| {
                if let Ok(instance) = value.clone().downcast::<T>() {
                    partition.disposers.lock().push_sync(Box::new(move || instance.dispose()));
                }
            })
            .await?;
        downcast::<T>(value)
    }

    /// Like [`get_or_create`](Self::get_or_create); the installed instance is
    /// also registered as an async disposer of the scope.
    pub async fn get_or_create_async_disposable<T, F, Fut>(
        &self,
        scope: &ScopeKey,
        qualifier: impl Into<QualifierName>,
        supplier: F,
    ) -> ScopeResult<Arc<T>>
    where
        T: AsyncDispose,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ScopeResult<T>> + Send,
    {
        let key = named_bean_key::<T>(qualifier);
        let value = self
            .get_or_create_with(scope, key, erase(supplier), |partition, value| {
                if let Ok(instance) = value.clone().downcast::<T>() {
                    partition
                        .disposers
                        .lock()
                        .push_async(move || async move { instance.dispose().await });
                }
            })
            .await?;
        downcast::<T>(value)
    }

    /// Type-erased [`get_or_create`](Self::get_or_create) keyed by an explicit [`BeanKey`].
    ///
    /// The supplier must produce a value of the type named by `key`.
    pub async fn get_or_create_any<F, Fut>(
        &self,
        scope: &ScopeKey,
        key: BeanKey,
        supplier: F,
    ) -> ScopeResult<AnyArc>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ScopeResult<AnyArc>> + Send,
    {
        self.get_or_create_with(scope, key, supplier, |_, _| {}).await
    }

    async fn get_or_create_with<F, Fut, H>(
        &self,
        scope: &ScopeKey,
        key: BeanKey,
        supplier: F,
        on_install: H,
    ) -> ScopeResult<AnyArc>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ScopeResult<AnyArc>> + Send,
        H: FnOnce(&ScopePartition, &AnyArc) + Send,
    {
        let partition = self.partition(scope);

        match self.policy {
            ConstructionPolicy::ReserveThenConstruct => {
                let slot = partition.slot(&key);
                if let Some(hit) = slot.get() {
                    trace!(scope = %scope, bean = %key, "scoped instance cache hit");
                    return Ok(hit.clone());
                }

                let partition_ref: &ScopePartition = &partition;
                let key_ref = &key;
                let value = slot
                    .get_or_try_init(move || async move {
                        let value = supplier().await?;
                        on_install(partition_ref, &value);
                        debug!(scope = %scope, bean = %key_ref, "scoped instance constructed");
                        Ok::<_, ScopeError>(value)
                    })
                    .await?;
                Ok(value.clone())
            }
            ConstructionPolicy::ConstructThenRace => {
                if let Some(hit) = partition.cached(&key) {
                    trace!(scope = %scope, bean = %key, "scoped instance cache hit");
                    return Ok(hit);
                }

                let ours = supplier().await?;
                let candidate = ours.clone();
                let slot = partition.slot(&key);
                let winner = slot.get_or_init(move || async move { candidate }).await.clone();

                if Arc::ptr_eq(&winner, &ours) {
                    on_install(&partition, &winner);
                    debug!(scope = %scope, bean = %key, "scoped instance constructed");
                } else {
                    debug!(scope = %scope, bean = %key, "construction race lost, discarding instance");
                }
                Ok(winner)
            }
        }
    }

    /// Unconditionally installs `instance` in the `(T, qualifier)` slot and
    /// returns it.
    pub fn replace<T>(&self, scope: &ScopeKey, qualifier: impl Into<QualifierName>, instance: Arc<T>) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let key = named_bean_key::<T>(qualifier);
        let partition = self.partition(scope);
        let erased: AnyArc = instance.clone();
        partition.slots.insert(key.clone(), Arc::new(OnceCell::from(erased)));
        debug!(scope = %scope, bean = %key, "scoped instance replaced");
        instance
    }

    /// Returns the cached instance for the slot, if any.
    pub fn get<T>(&self, scope: &ScopeKey, qualifier: impl Into<QualifierName>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let partition = self.existing_partition(scope)?;
        partition.cached(&named_bean_key::<T>(qualifier))?.downcast::<T>().ok()
    }

    /// Registers a sync hook run when `scope` is invalidated or destroyed.
    pub fn register_disposer(&self, scope: &ScopeKey, hook: impl FnOnce() + Send + 'static) {
        self.partition(scope).disposers.lock().push_sync(Box::new(hook));
    }

    /// Registers an async hook run when `scope` is destroyed.
    pub fn register_async_disposer<F, Fut>(&self, scope: &ScopeKey, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.partition(scope).disposers.lock().push_async(hook);
    }

    /// Atomically removes the whole partition of `scope` and hands it back.
    ///
    /// Returns `None` if the scope never had entries.
    pub fn detach(&self, scope: &ScopeKey) -> Option<DetachedScope> {
        let (key, partition) = self.partitions.remove(scope)?;
        debug!(scope = %key, instances = partition.instance_count(), "scope partition detached");
        Some(DetachedScope { key, partition })
    }

    /// Removes every instance of `scope` and runs its sync disposers.
    ///
    /// Returns `false` (and does nothing) if the scope had no partition.
    pub fn invalidate(&self, scope: &ScopeKey) -> bool {
        match self.detach(scope) {
            Some(detached) => {
                detached.dispose_sync();
                true
            }
            None => false,
        }
    }

    /// `true` if `scope` currently has a partition.
    pub fn contains_scope(&self, scope: &ScopeKey) -> bool {
        self.partitions.contains_key(scope)
    }

    /// Number of live scope partitions.
    pub fn scope_count(&self) -> usize {
        self.partitions.len()
    }

    /// Number of instances cached for `scope`, or `None` if it has no partition.
    pub fn instance_count(&self, scope: &ScopeKey) -> Option<usize> {
        self.existing_partition(scope).map(|p| p.instance_count())
    }
}

impl Default for ScopeInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScopeInstanceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeInstanceStore")
            .field("policy", &self.policy)
            .field("scopes", &self.partitions.len())
            .finish()
    }
}

type ErasedSupplier<T, Fut> = Map<Fut, fn(ScopeResult<T>) -> ScopeResult<AnyArc>>;

fn erase<T, F, Fut>(supplier: F) -> impl FnOnce() -> ErasedSupplier<T, Fut> + Send
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ScopeResult<T>> + Send,
{
    move || supplier().map(erase_value::<T> as fn(ScopeResult<T>) -> ScopeResult<AnyArc>)
}

fn erase_value<T: Send + Sync + 'static>(result: ScopeResult<T>) -> ScopeResult<AnyArc> {
    result.map(|value| Arc::new(value) as AnyArc)
}

fn downcast<T: Send + Sync + 'static>(value: AnyArc) -> ScopeResult<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ScopeError::TypeMismatch { expected: std::any::type_name::<T>() })
}
