//! The seam between synchronous-looking call sites and async pipelines.
//!
//! Business code is written against [`AsyncFacade`]; generated code either
//! blocks on a composed pipeline ([`await_value`](AsyncFacade::await_value),
//! [`await_all`](AsyncFacade::await_all)) or hands back a composable future
//! ([`invoke_async`](AsyncFacade::invoke_async)). The provided defaults are
//! stubs: the blocking shapes fail with [`ScopeError::AsyncStub`] every time
//! and the async shape yields the empty baseline `Ok(None)`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, TryStreamExt};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{error, trace};

use crate::context::ScopeContext;
use crate::error::{ScopeError, ScopeResult};
use crate::store::AnyArc;

/// Result of a facade method invocation: a value, or nothing.
pub type FacadeReply = ScopeResult<Option<AnyArc>>;

/// Contract between call sites and the async runtime.
///
/// Every method has a default. A facade that overrides nothing is a marker
/// that code generation did not run for the call site.
pub trait AsyncFacade: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Runs `future` to completion and returns its value.
    fn await_value<T>(&self, future: BoxFuture<'static, ScopeResult<T>>) -> ScopeResult<T>
    where
        Self: Sized,
        T: Send + 'static,
    {
        drop(future);
        Err(stub(self.name(), "await_value"))
    }

    /// Drives `stream` to completion and collects its values.
    ///
    /// The first failure ends the stream and is returned.
    fn await_all<T>(&self, stream: BoxStream<'static, ScopeResult<T>>) -> ScopeResult<Vec<T>>
    where
        Self: Sized,
        T: Send + 'static,
    {
        drop(stream);
        Err(stub(self.name(), "await_all"))
    }

    /// Starts `method` with positional `args` and returns its eventual result
    /// without blocking.
    fn invoke_async(&self, method: &'static str, args: Vec<AnyArc>) -> BoxFuture<'static, FacadeReply> {
        trace!(facade = self.name(), method, args = args.len(), "no async override, empty reply");
        future::ready(Ok(None)).boxed()
    }
}

fn stub(facade: &'static str, call_site: &'static str) -> ScopeError {
    error!(facade, call_site, "async facade stub invoked; call site was not generated");
    ScopeError::AsyncStub { call_site }
}

/// Facade with no overrides.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{AsyncFacade, StubFacade};
/// use futures::FutureExt;
///
/// let facade = StubFacade;
/// let err = facade.await_value(async { Ok(1u8) }.boxed()).unwrap_err();
/// assert!(err.is_async_stub());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StubFacade;

impl AsyncFacade for StubFacade {}

type Handler = Arc<dyn Fn(Vec<AnyArc>) -> BoxFuture<'static, FacadeReply> + Send + Sync>;

/// Facade backed by its own current-thread runtime.
///
/// Blocking calls must come from plain threads; calling
/// [`await_value`](AsyncFacade::await_value) from inside a runtime worker
/// returns [`ScopeError::NestedBlocking`]. The caller's [`ScopeContext`], if
/// one is active, is carried into the blocked-on future. Dropping the facade
/// inside a runtime is allowed; its runtime is shut down in the background.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{AnyArc, AsyncFacade, BlockingFacade, ScopeResult};
/// use futures::FutureExt;
/// use std::sync::Arc;
///
/// # fn main() -> ScopeResult<()> {
/// let facade = BlockingFacade::builder()
///     .method("greet", |args| async move {
///         let name = args.first().and_then(|a| a.downcast_ref::<String>()).cloned();
///         let reply: Option<AnyArc> = name.map(|n| Arc::new(format!("hello {n}")) as AnyArc);
///         Ok(reply)
///     })
///     .build()?;
///
/// assert_eq!(facade.await_value(async { Ok(2 + 2) }.boxed())?, 4);
///
/// let reply = facade.await_value(facade.invoke_async("greet", vec![Arc::new("ann".to_string()) as AnyArc]))?;
/// let text = reply.and_then(|r| r.downcast_ref::<String>().cloned());
/// assert_eq!(text.as_deref(), Some("hello ann"));
/// # Ok(())
/// # }
/// ```
pub struct BlockingFacade {
    runtime: Option<Runtime>,
    handlers: HashMap<&'static str, Handler>,
}

impl BlockingFacade {
    /// Starts building a facade.
    pub fn builder() -> BlockingFacadeBuilder {
        BlockingFacadeBuilder::default()
    }

    /// Method names with a registered handler, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn block_on<F: Future>(&self, future: F) -> ScopeResult<F::Output> {
        if Handle::try_current().is_ok() {
            return Err(ScopeError::NestedBlocking);
        }
        let runtime = self.runtime.as_ref().ok_or(ScopeError::NestedBlocking)?;
        let output = match ScopeContext::current() {
            Some(ctx) => runtime.block_on(ctx.scope(future)),
            None => runtime.block_on(future),
        };
        Ok(output)
    }
}

impl AsyncFacade for BlockingFacade {
    fn name(&self) -> &'static str {
        "BlockingFacade"
    }

    fn await_value<T>(&self, future: BoxFuture<'static, ScopeResult<T>>) -> ScopeResult<T>
    where
        T: Send + 'static,
    {
        self.block_on(future)?
    }

    fn await_all<T>(&self, stream: BoxStream<'static, ScopeResult<T>>) -> ScopeResult<Vec<T>>
    where
        T: Send + 'static,
    {
        self.block_on(stream.try_collect::<Vec<T>>())?
    }

    fn invoke_async(&self, method: &'static str, args: Vec<AnyArc>) -> BoxFuture<'static, FacadeReply> {
        match self.handlers.get(method) {
            Some(handler) => handler(args),
            None => {
                trace!(method, "no handler registered, empty reply");
                future::ready(Ok(None)).boxed()
            }
        }
    }
}

impl Drop for BlockingFacade {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for BlockingFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingFacade")
            .field("methods", &self.methods())
            .finish()
    }
}

/// Builder for [`BlockingFacade`].
#[derive(Default)]
pub struct BlockingFacadeBuilder {
    handlers: HashMap<&'static str, Handler>,
}

impl BlockingFacadeBuilder {
    /// Registers the async body of `name`. A later registration replaces an earlier one.
    pub fn method<F, Fut>(mut self, name: &'static str, handler: F) -> Self
    where
        F: Fn(Vec<AnyArc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FacadeReply> + Send + 'static,
    {
        self.handlers.insert(name, Arc::new(move |args| handler(args).boxed()));
        self
    }

    /// Starts the runtime and builds the facade.
    pub fn build(self) -> ScopeResult<BlockingFacade> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ScopeError::failed)?;
        Ok(BlockingFacade { runtime: Some(runtime), handlers: self.handlers })
    }
}

impl fmt::Debug for BlockingFacadeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingFacadeBuilder")
            .field("methods", &self.handlers.len())
            .finish()
    }
}
