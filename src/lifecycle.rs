//! Scope lifecycle: starting and ending scopes.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::config::RuntimeConfig;
use crate::context::ScopeContext;
use crate::key::ScopeKey;
use crate::resolver::{ContextKeyResolver, ScopeKeyResolver};
use crate::store::ScopeInstanceStore;

/// Result of destroying a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// The scope's partition was removed and its disposers ran.
    Destroyed {
        /// Destroyed scope
        key: ScopeKey,
        /// Instances the scope held
        instances: usize,
    },
    /// No active scope, or the scope never cached anything.
    NothingToDestroy,
}

impl DestroyOutcome {
    /// `true` if a partition was removed.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, DestroyOutcome::Destroyed { .. })
    }
}

/// Starts scopes on the writer side and ends them explicitly or implicitly.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{DestroyOutcome, ScopeInstanceStore, ScopeKey, ScopeLifecycle};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = Arc::new(ScopeInstanceStore::new());
/// let lifecycle = ScopeLifecycle::new(store.clone());
///
/// // Nothing active: not an error.
/// assert_eq!(lifecycle.destroy_current().await, DestroyOutcome::NothingToDestroy);
///
/// let key = ScopeKey::new("req-1");
/// lifecycle
///     .run_scoped(key.clone(), async {
///         let scope = ScopeKey::new("req-1");
///         store.get_or_create(&scope, "", || async { Ok(42u32) }).await.unwrap();
///     })
///     .await;
///
/// // The boundary completed, so the scope is gone.
/// assert!(!store.contains_scope(&key));
/// # }
/// ```
#[derive(Clone)]
pub struct ScopeLifecycle {
    store: Arc<ScopeInstanceStore>,
    resolver: Arc<dyn ScopeKeyResolver>,
    field: String,
}

impl ScopeLifecycle {
    /// Uses the default context field for both writing and resolving.
    pub fn new(store: Arc<ScopeInstanceStore>) -> Self {
        Self::from_config(store, &RuntimeConfig::default())
    }

    /// Uses the context field named by `config`.
    pub fn from_config(store: Arc<ScopeInstanceStore>, config: &RuntimeConfig) -> Self {
        Self {
            store,
            resolver: Arc::new(ContextKeyResolver::from_config(config)),
            field: config.scope_key_field.clone(),
        }
    }

    /// Replaces the resolver used by [`destroy_current`](Self::destroy_current).
    pub fn with_resolver(mut self, resolver: Arc<dyn ScopeKeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<ScopeInstanceStore> {
        &self.store
    }

    /// Derives a context from the caller's one with `key` as the active scope.
    pub fn enter(&self, key: ScopeKey) -> ScopeContext {
        ScopeContext::current_or_empty().with_scope_key_in(&self.field, key)
    }

    /// Runs `future` inside scope `key` and destroys the scope afterwards.
    ///
    /// If the returned future is dropped before completion, the scope is
    /// invalidated synchronously; async disposers do not run in that case.
    pub async fn run_scoped<F: Future>(&self, key: ScopeKey, future: F) -> F::Output {
        let mut guard = CancelGuard { store: &self.store, key: Some(key.clone()) };
        let output = self.enter(key.clone()).scope(future).await;
        guard.disarm();
        self.destroy(&key).await;
        output
    }

    /// Removes `key`'s partition, then runs its async and sync disposers.
    pub async fn destroy(&self, key: &ScopeKey) -> DestroyOutcome {
        match self.store.detach(key) {
            Some(detached) => {
                let instances = detached.instance_count();
                detached.dispose().await;
                debug!(scope = %key, instances, "scope destroyed");
                DestroyOutcome::Destroyed { key: key.clone(), instances }
            }
            None => DestroyOutcome::NothingToDestroy,
        }
    }

    /// Destroys the scope active in the caller's context, if any.
    pub async fn destroy_current(&self) -> DestroyOutcome {
        match self.resolver.resolve().await {
            Some(key) => self.destroy(&key).await,
            None => {
                debug!("destroy_current called with no active scope");
                DestroyOutcome::NothingToDestroy
            }
        }
    }

    /// Synchronous invalidation; async disposers are skipped.
    pub fn invalidate(&self, key: &ScopeKey) -> bool {
        self.store.invalidate(key)
    }
}

/// Invalidates a scope whose boundary future was dropped mid-flight.
struct CancelGuard<'a> {
    store: &'a ScopeInstanceStore,
    key: Option<ScopeKey>,
}

impl CancelGuard<'_> {
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if self.store.invalidate(&key) {
                debug!(scope = %key, "scope boundary cancelled, scope invalidated");
            }
        }
    }
}

impl std::fmt::Debug for ScopeLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeLifecycle")
            .field("store", &self.store)
            .field("field", &self.field)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::AsyncDispose;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn destroy_current_uses_ambient_key() {
        let store = Arc::new(ScopeInstanceStore::new());
        let lifecycle = ScopeLifecycle::new(store.clone());
        let key = ScopeKey::new("req");

        store.get_or_create(&key, "", || async { Ok(1u8) }).await.unwrap();

        let outcome = lifecycle.enter(key.clone()).scope(lifecycle.destroy_current()).await;
        assert_eq!(outcome, DestroyOutcome::Destroyed { key: key.clone(), instances: 1 });
        assert!(!store.contains_scope(&key));
    }

    #[tokio::test]
    async fn destroying_unknown_scope_is_noop() {
        let lifecycle = ScopeLifecycle::new(Arc::new(ScopeInstanceStore::new()));
        let outcome = lifecycle.destroy(&ScopeKey::new("ghost")).await;
        assert!(!outcome.is_destroyed());
    }

    #[tokio::test]
    async fn destroy_runs_async_disposers() {
        struct Client(Arc<AtomicBool>);
        #[async_trait::async_trait]
        impl AsyncDispose for Client {
            async fn dispose(&self) {
                tokio::task::yield_now().await;
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let store = Arc::new(ScopeInstanceStore::new());
        let lifecycle = ScopeLifecycle::new(store.clone());
        let key = ScopeKey::new("req");
        let closed = Arc::new(AtomicBool::new(false));

        let flag = closed.clone();
        store
            .get_or_create_async_disposable(&key, "", || async move { Ok(Client(flag)) })
            .await
            .unwrap();

        assert!(lifecycle.destroy(&key).await.is_destroyed());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn custom_field_round_trips_between_writer_and_reader() {
        let config = RuntimeConfig::default().with_scope_key_field("request.id");
        let store = Arc::new(ScopeInstanceStore::new());
        let lifecycle = ScopeLifecycle::from_config(store.clone(), &config);
        let key = ScopeKey::new("r-5");

        store.get_or_create(&key, "", || async { Ok(0u16) }).await.unwrap();
        let outcome = lifecycle.enter(key.clone()).scope(lifecycle.destroy_current()).await;
        assert!(outcome.is_destroyed());
    }
}
