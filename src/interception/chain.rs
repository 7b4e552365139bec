//! Interceptor bindings and ordered chain construction.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use super::invocation::{run_from, ChainReport, Interceptor, InvocationData, Probe, Target};
use crate::error::{ScopeError, ScopeResult};

/// Extension point an interceptor wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterceptionKind {
    /// Wraps object construction.
    AroundConstruct,
    /// Wraps method invocation.
    AroundInvoke,
}

impl fmt::Display for InterceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptionKind::AroundConstruct => f.write_str("around-construct"),
            InterceptionKind::AroundInvoke => f.write_str("around-invoke"),
        }
    }
}

/// Chain position of a binding; lower runs first and is outermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Priority(pub i32);

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

/// Declared cross-cutting behavior: a name, a priority and an extension point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterceptorBinding {
    /// Binding name used in logs and errors
    pub name: &'static str,
    /// Chain position
    pub priority: Priority,
    /// Extension point
    pub kind: InterceptionKind,
}

impl InterceptorBinding {
    /// Creates a binding.
    pub fn new(name: &'static str, priority: impl Into<Priority>, kind: InterceptionKind) -> Self {
        Self { name, priority: priority.into(), kind }
    }

    /// Around-construct binding.
    pub fn around_construct(name: &'static str, priority: impl Into<Priority>) -> Self {
        Self::new(name, priority, InterceptionKind::AroundConstruct)
    }

    /// Around-invoke binding.
    pub fn around_invoke(name: &'static str, priority: impl Into<Priority>) -> Self {
        Self::new(name, priority, InterceptionKind::AroundInvoke)
    }
}

pub(crate) struct Link<T: Send + 'static> {
    pub(crate) binding: InterceptorBinding,
    pub(crate) interceptor: Arc<dyn Interceptor<T>>,
}

impl<T: Send + 'static> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Collects bindings for one extension point and orders them into a [`Chain`].
///
/// Links are stable-sorted by ascending priority, so equal priorities keep
/// the order in which they were added.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use ferrous_scope::{ChainBuilder, Interceptor, InterceptorBinding, Invocation, InvocationData, ScopeResult};
///
/// struct Stage(&'static str);
///
/// #[async_trait]
/// impl Interceptor<String> for Stage {
///     async fn intercept(&self, inv: &mut Invocation<'_, String>) -> ScopeResult<String> {
///         Ok(format!("{} -> {}", self.0, inv.proceed().await?))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ScopeResult<()> {
/// let chain = ChainBuilder::<String>::around_invoke()
///     .with(InterceptorBinding::around_invoke("second", 1), Stage("second stage fired"))
///     .with(InterceptorBinding::around_invoke("first", 0), Stage("first stage fired"))
///     .build()?;
///
/// let target = |_: &InvocationData| async { Ok("fire".to_string()) };
/// let out = chain.invoke(&target).await?;
/// assert_eq!(out, "first stage fired -> second stage fired -> fire");
/// # Ok(())
/// # }
/// ```
pub struct ChainBuilder<T: Send + 'static> {
    kind: InterceptionKind,
    links: Vec<Link<T>>,
    trace: bool,
}

impl<T: Send + 'static> ChainBuilder<T> {
    /// Starts a chain for `kind`.
    pub fn new(kind: InterceptionKind) -> Self {
        Self { kind, links: Vec::new(), trace: false }
    }

    /// Starts an around-construct chain.
    pub fn around_construct() -> Self {
        Self::new(InterceptionKind::AroundConstruct)
    }

    /// Starts an around-invoke chain.
    pub fn around_invoke() -> Self {
        Self::new(InterceptionKind::AroundInvoke)
    }

    /// Adds a link.
    pub fn with(self, binding: InterceptorBinding, interceptor: impl Interceptor<T> + 'static) -> Self {
        self.with_shared(binding, Arc::new(interceptor))
    }

    /// Adds a link backed by a shared interceptor.
    pub fn with_shared(mut self, binding: InterceptorBinding, interceptor: Arc<dyn Interceptor<T>>) -> Self {
        self.links.push(Link { binding, interceptor });
        self
    }

    /// Emits a `trace!` event per entered link.
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Orders the links and builds the chain.
    ///
    /// Fails if a binding declares a different extension point.
    pub fn build(mut self) -> ScopeResult<Chain<T>> {
        if let Some(stray) = self.links.iter().find(|l| l.binding.kind != self.kind) {
            return Err(ScopeError::KindMismatch {
                binding: stray.binding.name,
                expected: self.kind,
                found: stray.binding.kind,
            });
        }

        self.links.sort_by_key(|link| link.binding.priority);

        debug!(
            kind = %self.kind,
            links = self.links.len(),
            order = ?self.links.iter().map(|l| l.binding.name).collect::<Vec<_>>(),
            "interceptor chain built"
        );

        Ok(Chain {
            inner: Arc::new(ChainInner {
                kind: self.kind,
                links: self.links,
                trace: self.trace,
            }),
        })
    }
}

struct ChainInner<T: Send + 'static> {
    kind: InterceptionKind,
    links: Vec<Link<T>>,
    trace: bool,
}

/// An ordered, reusable interceptor chain for one extension point.
///
/// Built once, executed many times; each execution takes its own target and
/// [`InvocationData`]. An empty chain calls the target directly.
pub struct Chain<T: Send + 'static> {
    inner: Arc<ChainInner<T>>,
}

impl<T: Send + 'static> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Send + 'static> Chain<T> {
    /// A chain with no links.
    pub fn empty(kind: InterceptionKind) -> Self {
        Self {
            inner: Arc::new(ChainInner { kind, links: Vec::new(), trace: false }),
        }
    }

    /// Extension point of the chain.
    pub fn kind(&self) -> InterceptionKind {
        self.inner.kind
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.inner.links.len()
    }

    /// `true` when the chain is just the target.
    pub fn is_empty(&self) -> bool {
        self.inner.links.is_empty()
    }

    /// Bindings in execution order, outermost first.
    pub fn bindings(&self) -> impl Iterator<Item = &InterceptorBinding> + '_ {
        self.inner.links.iter().map(|link| &link.binding)
    }

    /// Runs the chain around `target` with caller-owned shared data.
    pub async fn execute(&self, target: &dyn Target<T>, data: &mut InvocationData) -> ScopeResult<T> {
        let probe = Probe::default();
        self.run(target, data, &probe).await
    }

    /// Runs the chain with fresh shared data.
    pub async fn invoke(&self, target: &dyn Target<T>) -> ScopeResult<T> {
        let mut data = InvocationData::new();
        self.execute(target, &mut data).await
    }

    /// Runs the chain and reports how far execution went.
    pub async fn execute_reported(
        &self,
        target: &dyn Target<T>,
        data: &mut InvocationData,
    ) -> (ScopeResult<T>, ChainReport) {
        let probe = Probe::default();
        let result = self.run(target, data, &probe).await;
        (result, probe.report())
    }

    async fn run(&self, target: &dyn Target<T>, data: &mut InvocationData, probe: &Probe) -> ScopeResult<T> {
        let inner = &*self.inner;
        let result = run_from(&inner.links, 0, inner.kind, inner.trace, target, data, probe).await;
        if inner.trace && !probe.report().target_reached {
            trace!(kind = %inner.kind, "chain short-circuited before target");
        }
        result
    }
}

impl<T: Send + 'static> fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("kind", &self.inner.kind)
            .field("links", &self.bindings().map(|b| (b.name, b.priority.0)).collect::<Vec<_>>())
            .finish()
    }
}
