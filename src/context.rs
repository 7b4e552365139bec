//! Ambient execution context carried alongside async pipelines.
//!
//! A [`ScopeContext`] is an immutable key/value map bound to a task through a
//! `tokio` task-local. Writers derive a new context with
//! [`ScopeContext::with_value`] and run a future inside it with
//! [`ScopeContext::scope`]; readers recover it with [`ScopeContext::current`].
//! Nothing is stored in thread-locals, so pipelines may hop worker threads.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::task::futures::TaskLocalFuture;

use crate::key::ScopeKey;

/// Well-known context field holding the active [`ScopeKey`].
///
/// Both the code that starts a scope and every resolver read and write this
/// same field unless a [`RuntimeConfig`](crate::RuntimeConfig) overrides it
/// for the whole runtime.
pub const SCOPE_KEY_FIELD: &str = "scope.key";

/// Type-erased value stored in a context field.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static CURRENT_CONTEXT: ScopeContext;
}

/// Immutable, cheaply clonable key/value context.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{ScopeContext, ScopeKey};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let ctx = ScopeContext::new().with_scope_key(ScopeKey::new("req-1"));
///
/// let seen = ctx.scope(async {
///     ScopeContext::current().and_then(|c| c.scope_key())
/// }).await;
///
/// assert_eq!(seen, Some(ScopeKey::new("req-1")));
/// assert!(ScopeContext::current().is_none());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct ScopeContext {
    values: Arc<HashMap<String, ContextValue>>,
}

impl ScopeContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the context bound to the running task, if any.
    pub fn current() -> Option<ScopeContext> {
        CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Returns the context bound to the running task or an empty one.
    pub fn current_or_empty() -> ScopeContext {
        Self::current().unwrap_or_default()
    }

    /// Looks up a raw field.
    pub fn get(&self, field: &str) -> Option<&ContextValue> {
        self.values.get(field)
    }

    /// Looks up a field and downcasts it.
    pub fn get_as<T: Any + Send + Sync>(&self, field: &str) -> Option<&T> {
        self.values.get(field)?.downcast_ref::<T>()
    }

    /// Returns a new context with `field` set to `value`; `self` is unchanged.
    pub fn with_value<T: Any + Send + Sync>(&self, field: impl Into<String>, value: T) -> Self {
        let mut values = (*self.values).clone();
        values.insert(field.into(), Arc::new(value));
        Self { values: Arc::new(values) }
    }

    /// Returns a new context without `field`.
    pub fn without(&self, field: &str) -> Self {
        if !self.values.contains_key(field) {
            return self.clone();
        }
        let mut values = (*self.values).clone();
        values.remove(field);
        Self { values: Arc::new(values) }
    }

    /// Sets the scope key under [`SCOPE_KEY_FIELD`].
    pub fn with_scope_key(&self, key: ScopeKey) -> Self {
        self.with_value(SCOPE_KEY_FIELD, key)
    }

    /// Sets the scope key under a custom field.
    pub fn with_scope_key_in(&self, field: &str, key: ScopeKey) -> Self {
        self.with_value(field, key)
    }

    /// Reads the scope key from [`SCOPE_KEY_FIELD`].
    pub fn scope_key(&self) -> Option<ScopeKey> {
        self.scope_key_in(SCOPE_KEY_FIELD)
    }

    /// Reads the scope key from a custom field.
    pub fn scope_key_in(&self, field: &str) -> Option<ScopeKey> {
        self.get_as::<ScopeKey>(field).cloned()
    }

    /// Number of fields set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Runs `future` with this context as the ambient one.
    pub fn scope<F: Future>(self, future: F) -> TaskLocalFuture<ScopeContext, F> {
        CURRENT_CONTEXT.scope(self, future)
    }

    /// Runs a synchronous closure with this context as the ambient one.
    pub fn sync_scope<F, R>(self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT_CONTEXT.sync_scope(self, f)
    }
}

impl fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<&str> = self.values.keys().map(String::as_str).collect();
        fields.sort_unstable();
        f.debug_struct("ScopeContext")
            .field("fields", &fields)
            .field("scope_key", &self.scope_key())
            .finish()
    }
}

/// Spawns `future` on the current runtime, carrying the caller's context.
///
/// `tokio::spawn` alone starts the task with no task-locals; this keeps the
/// scope visible to the spawned half of a pipeline.
pub fn spawn_with_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let ctx = ScopeContext::current_or_empty();
    tokio::spawn(ctx.scope(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_value_leaves_original_untouched() {
        let base = ScopeContext::new().with_value("tenant", "acme".to_string());
        let derived = base.with_value("user", 7u32);

        assert_eq!(base.len(), 1);
        assert_eq!(derived.len(), 2);
        assert_eq!(derived.get_as::<String>("tenant").map(String::as_str), Some("acme"));
        assert_eq!(derived.get_as::<u32>("user"), Some(&7));
        assert!(base.get("user").is_none());
    }

    #[test]
    fn wrong_type_reads_as_absent() {
        let ctx = ScopeContext::new().with_value(SCOPE_KEY_FIELD, "not-a-key".to_string());
        assert!(ctx.scope_key().is_none());
    }

    #[test]
    fn without_removes_field() {
        let ctx = ScopeContext::new().with_scope_key(ScopeKey::new("a"));
        assert!(ctx.without(SCOPE_KEY_FIELD).scope_key().is_none());
        assert_eq!(ctx.scope_key(), Some(ScopeKey::new("a")));
    }

    #[tokio::test]
    async fn nested_scopes_shadow_outer() {
        let outer = ScopeContext::new().with_scope_key(ScopeKey::new("outer"));
        outer
            .scope(async {
                let inner = ScopeContext::current_or_empty().with_scope_key(ScopeKey::new("inner"));
                let seen = inner.scope(async { ScopeContext::current_or_empty().scope_key() }).await;
                assert_eq!(seen, Some(ScopeKey::new("inner")));
                assert_eq!(ScopeContext::current_or_empty().scope_key(), Some(ScopeKey::new("outer")));
            })
            .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_task_keeps_context() {
        let ctx = ScopeContext::new().with_scope_key(ScopeKey::new("req-9"));
        let handle = ctx
            .scope(async { spawn_with_context(async { ScopeContext::current_or_empty().scope_key() }) })
            .await;
        assert_eq!(handle.await.ok().flatten(), Some(ScopeKey::new("req-9")));
    }

    #[test]
    fn sync_scope_exposes_context() {
        let ctx = ScopeContext::new().with_scope_key(ScopeKey::new("sync"));
        let seen = ctx.sync_scope(|| ScopeContext::current().and_then(|c| c.scope_key()));
        assert_eq!(seen, Some(ScopeKey::new("sync")));
    }
}
