//! Error types for scoped resolution and interception.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::interception::InterceptionKind;

/// Shared, type-erased failure raised by a target, interceptor or supplier.
pub type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by the scope runtime.
///
/// "Absence" outcomes (no active scope, cache miss, unknown partition) are not
/// represented here; those are returned as `Option`. Everything in this enum
/// reaches the caller.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::ScopeError;
///
/// let stub = ScopeError::AsyncStub { call_site: "OrderService::total" };
/// assert_eq!(
///     stub.to_string(),
///     "async facade stub invoked at OrderService::total: call site was not generated"
/// );
///
/// let failed = ScopeError::msg("connection refused");
/// assert_eq!(failed.to_string(), "connection refused");
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScopeError {
    /// An async facade stub ran; the generator never supplied an override.
    #[error("async facade stub invoked at {call_site}: call site was not generated")]
    AsyncStub {
        /// Method or call-site name the stub was asked to serve
        call_site: &'static str,
    },
    /// A blocking facade call was made from inside an async runtime worker.
    #[error("cannot block on an async pipeline from within a runtime worker")]
    NestedBlocking,
    /// The instance cached in a slot has a different concrete type.
    #[error("type mismatch for: {expected}")]
    TypeMismatch {
        /// Type name that was requested
        expected: &'static str,
    },
    /// No factory is registered for the requested type and qualifier.
    #[error("bean not registered: {0}")]
    NotRegistered(&'static str),
    /// A binding for one extension point was given to a chain of another.
    #[error("interceptor {binding} is bound to {found}, chain expects {expected}")]
    KindMismatch {
        /// Binding name
        binding: &'static str,
        /// Kind of the chain being built
        expected: InterceptionKind,
        /// Kind the binding declares
        found: InterceptionKind,
    },
    /// Downstream failure, passed through the chain untouched.
    #[error(transparent)]
    Failed(BoxError),
}

impl ScopeError {
    /// Wraps a downstream failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ScopeError::Failed(Arc::new(error))
    }

    /// Creates a downstream failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        ScopeError::Failed(Arc::new(Message(message.into())))
    }

    /// Returns `true` for the facade stub marker.
    pub fn is_async_stub(&self) -> bool {
        matches!(self, ScopeError::AsyncStub { .. })
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// Result type for scope runtime operations.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{ScopeError, ScopeResult};
///
/// fn lookup() -> ScopeResult<u32> {
///     Err(ScopeError::NotRegistered("u32"))
/// }
///
/// assert!(lookup().is_err());
/// ```
pub type ScopeResult<T> = Result<T, ScopeError>;
