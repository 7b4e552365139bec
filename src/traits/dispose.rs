//! Disposal traits for scope-bound instances.

/// Synchronous teardown for an instance cached in a scope.
///
/// Hooks run in LIFO order when the owning scope is invalidated or destroyed.
///
/// # Examples
///
/// ```
/// use ferrous_scope::{Dispose, ScopeInstanceStore, ScopeKey};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// struct Session {
///     closed: Arc<AtomicBool>,
/// }
///
/// impl Dispose for Session {
///     fn dispose(&self) {
///         self.closed.store(true, Ordering::SeqCst);
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferrous_scope::ScopeResult<()> {
/// let store = ScopeInstanceStore::new();
/// let scope = ScopeKey::new("req-1");
/// let closed = Arc::new(AtomicBool::new(false));
///
/// let flag = closed.clone();
/// store
///     .get_or_create_disposable(&scope, "", || async move { Ok(Session { closed: flag }) })
///     .await?;
///
/// store.invalidate(&scope);
/// assert!(closed.load(Ordering::SeqCst));
/// # Ok(())
/// # }
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Releases resources held by the instance.
    fn dispose(&self);
}

/// Asynchronous teardown for an instance cached in a scope.
///
/// Async hooks only run through
/// [`ScopeLifecycle::destroy`](crate::ScopeLifecycle::destroy); they run
/// before sync hooks, newest first.
#[async_trait::async_trait]
pub trait AsyncDispose: Send + Sync + 'static {
    /// Releases resources held by the instance.
    async fn dispose(&self);
}
