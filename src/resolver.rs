//! Scope key resolution from the ambient context.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RuntimeConfig;
use crate::context::{ScopeContext, SCOPE_KEY_FIELD};
use crate::key::ScopeKey;

/// Recovers the active [`ScopeKey`] for the calling pipeline.
///
/// Resolution is asynchronous because an implementation may have to wait for
/// its propagation medium. `None` is a valid outcome meaning "no active
/// scope"; it is never reported as an error.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{ContextKeyResolver, ScopeContext, ScopeKey, ScopeKeyResolver};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let resolver = ContextKeyResolver::new();
/// assert_eq!(resolver.resolve().await, None);
///
/// let ctx = ScopeContext::new().with_scope_key(ScopeKey::new("req-7"));
/// let key = ctx.scope(resolver.resolve()).await;
/// assert_eq!(key, Some(ScopeKey::new("req-7")));
/// # }
/// ```
#[async_trait]
pub trait ScopeKeyResolver: Send + Sync {
    /// Resolves the current scope key, or `None` when no scope is active.
    async fn resolve(&self) -> Option<ScopeKey>;
}

/// Reads the scope key from a field of the task's [`ScopeContext`].
#[derive(Debug, Clone)]
pub struct ContextKeyResolver {
    field: String,
}

impl ContextKeyResolver {
    /// Reads from [`SCOPE_KEY_FIELD`].
    pub fn new() -> Self {
        Self { field: SCOPE_KEY_FIELD.to_string() }
    }

    /// Reads from the field named by `config`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self { field: config.scope_key_field.clone() }
    }

    /// Field this resolver reads.
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl Default for ContextKeyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScopeKeyResolver for ContextKeyResolver {
    async fn resolve(&self) -> Option<ScopeKey> {
        ScopeContext::current()?.scope_key_in(&self.field)
    }
}

/// Always resolves to the same key (or to no scope).
///
/// Useful at explicit boundaries and in tests.
#[derive(Debug, Clone, Default)]
pub struct FixedKeyResolver(Option<ScopeKey>);

impl FixedKeyResolver {
    /// Resolves to `key`.
    pub fn new(key: ScopeKey) -> Self {
        Self(Some(key))
    }

    /// Resolves to no active scope.
    pub fn absent() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ScopeKeyResolver for FixedKeyResolver {
    async fn resolve(&self) -> Option<ScopeKey> {
        self.0.clone()
    }
}

#[async_trait]
impl<R> ScopeKeyResolver for Arc<R>
where
    R: ScopeKeyResolver + ?Sized,
{
    async fn resolve(&self) -> Option<ScopeKey> {
        (**self).resolve().await
    }
}
