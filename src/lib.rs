//! # ferrous-scope
//!
//! Scope-bound instance caching and ordered interception chains for async Rust.
//!
//! ## Features
//!
//! - **Ambient scopes**: the active scope key travels with the task in a
//!   [`ScopeContext`], never as an explicit parameter
//! - **Per-scope caching**: one instance per `(type, qualifier)` per scope, with
//!   no global lock between unrelated scopes
//! - **Interceptor chains**: around-construct and around-invoke links ordered by
//!   [`Priority`], with short-circuiting and shared per-invocation data
//! - **Async facade**: the seam generated call sites use to block on, or compose,
//!   async pipelines
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_scope::{BeanCollection, InvocationData, ScopeKey};
//! use std::sync::Arc;
//!
//! struct RequestState {
//!     user: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ferrous_scope::ScopeResult<()> {
//! let mut beans = BeanCollection::new();
//! beans.add_scoped(|_: &InvocationData| async {
//!     Ok(RequestState { user: "ann".to_string() })
//! });
//! let ctx = beans.build();
//!
//! // Everything inside `run_scoped` shares one RequestState.
//! let same = ctx
//!     .lifecycle()
//!     .run_scoped(ScopeKey::new("req-1"), async {
//!         let a = ctx.get::<RequestState>().await?;
//!         let b = ctx.get::<RequestState>().await?;
//!         Ok::<_, ferrous_scope::ScopeError>(Arc::ptr_eq(&a, &b))
//!     })
//!     .await?;
//! assert!(same);
//!
//! // The scope was destroyed when the boundary completed.
//! assert_eq!(ctx.store().scope_count(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Interception
//!
//! Links run in ascending priority. Each one may act before
//! [`Invocation::proceed`], transform its result, or skip it entirely.
//!
//! ```rust
//! use async_trait::async_trait;
//! use ferrous_scope::{ChainBuilder, Interceptor, InterceptorBinding, Invocation, InvocationData, ScopeResult};
//!
//! struct Deny;
//!
//! #[async_trait]
//! impl Interceptor<u32> for Deny {
//!     async fn intercept(&self, _invocation: &mut Invocation<'_, u32>) -> ScopeResult<u32> {
//!         Ok(0)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ScopeResult<()> {
//! let chain = ChainBuilder::<u32>::around_invoke()
//!     .with(InterceptorBinding::around_invoke("deny", 0), Deny)
//!     .build()?;
//!
//! let target = |_: &InvocationData| async { Ok(42u32) };
//! assert_eq!(chain.invoke(&target).await?, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and installs no subscriber. Per-link
//! events are only emitted when [`RuntimeConfig::trace_chains`] is set.

// Module declarations
pub mod beans;
pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod interception;
pub mod key;
pub mod lifecycle;
pub mod resolver;
pub mod store;
pub mod traits;

// Internal modules
mod internal;

// Re-export core types
pub use beans::{BeanCollection, BeanContext};
pub use config::{ConstructionPolicy, RuntimeConfig};
pub use context::{spawn_with_context, ContextValue, ScopeContext, SCOPE_KEY_FIELD};
pub use error::{BoxError, ScopeError, ScopeResult};
pub use facade::{AsyncFacade, BlockingFacade, BlockingFacadeBuilder, FacadeReply, StubFacade};
pub use interception::{
    Chain, ChainBuilder, ChainReport, ChainState, InterceptionKind, InterceptionRegistry, Interceptor,
    InterceptorBinding, Invocation, InvocationData, Priority, QualifierAttributes, Target, TargetId,
};
pub use key::{bean_key, named_bean_key, BeanKey, QualifierName, ScopeKey};
pub use lifecycle::{DestroyOutcome, ScopeLifecycle};
pub use resolver::{ContextKeyResolver, FixedKeyResolver, ScopeKeyResolver};
pub use store::{AnyArc, DetachedScope, ScopeInstanceStore};
pub use traits::{AsyncDispose, Dispose};
