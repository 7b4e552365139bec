//! Chain execution: interceptors, targets and the per-invocation state.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::trace;

use super::chain::{InterceptionKind, InterceptorBinding, Link};
use crate::error::ScopeResult;

/// Mutable state shared by every link of one chain execution.
///
/// Links stage values here before proceeding; later links and the target
/// can read them. The data is owned by the caller of
/// [`Chain::execute`](super::Chain::execute) and is not meant to outlive it.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::InvocationData;
///
/// let mut data = InvocationData::for_method("checkout");
/// data.push("stages", "validated".to_string());
/// data.push("stages", "priced".to_string());
///
/// assert_eq!(data.method(), Some("checkout"));
/// assert_eq!(data.get::<Vec<String>>("stages").map(Vec::len), Some(2));
/// ```
#[derive(Default)]
pub struct InvocationData {
    method: Option<String>,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl InvocationData {
    /// Creates empty data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates empty data for an invocation of `method`.
    pub fn for_method(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            values: HashMap::new(),
        }
    }

    /// Method being invoked, if this is an around-invoke execution.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Reads the value under `key` if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    /// Mutable access to the value under `key` if it has type `T`.
    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut::<T>()
    }

    /// Removes and returns the value under `key` if it has type `T`.
    ///
    /// A value of another type is left in place.
    pub fn take<T: Any + Send + Sync>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key)?.is::<T>() {
            return None;
        }
        let boxed = self.values.remove(key)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }

    /// Appends `item` to the `Vec<T>` under `key`, creating it if absent.
    ///
    /// A value of another type under `key` is replaced.
    pub fn push<T: Any + Send + Sync>(&mut self, key: &str, item: T) {
        match self.get_mut::<Vec<T>>(key) {
            Some(items) => items.push(item),
            None => self.set(key, vec![item]),
        }
    }

    /// `true` if `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of keys set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when no key is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for InvocationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("InvocationData")
            .field("method", &self.method)
            .field("keys", &keys)
            .finish()
    }
}

/// The terminal operation of a chain: the real constructor or method body.
///
/// Closures `Fn(&InvocationData) -> impl Future<Output = ScopeResult<T>>`
/// implement this trait; the returned future cannot borrow the data, so read
/// what you need before the `async` block.
#[async_trait]
pub trait Target<T: Send + 'static>: Send + Sync {
    /// Runs the target.
    async fn call(&self, data: &InvocationData) -> ScopeResult<T>;
}

#[async_trait]
impl<T, F, Fut> Target<T> for F
where
    T: Send + 'static,
    F: Fn(&InvocationData) -> Fut + Send + Sync,
    Fut: Future<Output = ScopeResult<T>> + Send,
{
    async fn call(&self, data: &InvocationData) -> ScopeResult<T> {
        self(data).await
    }
}

/// One link of a chain.
///
/// An interceptor either returns without calling
/// [`Invocation::proceed`] (short-circuit; its value becomes the chain's
/// result) or calls it, usually once, and returns or transforms the
/// downstream result. Errors from `proceed` should be returned as they are.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use ferrous_scope::{Interceptor, Invocation, ScopeResult};
///
/// struct Prefix(&'static str);
///
/// #[async_trait]
/// impl Interceptor<String> for Prefix {
///     async fn intercept(&self, invocation: &mut Invocation<'_, String>) -> ScopeResult<String> {
///         let inner = invocation.proceed().await?;
///         Ok(format!("{} -> {}", self.0, inner))
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor<T: Send + 'static>: Send + Sync {
    /// Handles one execution of the link.
    async fn intercept(&self, invocation: &mut Invocation<'_, T>) -> ScopeResult<T>;
}

/// Execution state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No link has run yet.
    NotStarted,
    /// The link at this position is running.
    Running(usize),
    /// The target was reached.
    Proceeded,
    /// Some link returned without reaching the target.
    ShortCircuited,
    /// Execution finished.
    Completed,
}

/// What a reported chain execution did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of link entries (re-entries from repeated `proceed` calls included)
    pub links_entered: usize,
    /// Whether the target ran at least once
    pub target_reached: bool,
}

impl ChainReport {
    /// [`ChainState::Proceeded`] or [`ChainState::ShortCircuited`].
    pub fn resolution(&self) -> ChainState {
        if self.target_reached {
            ChainState::Proceeded
        } else {
            ChainState::ShortCircuited
        }
    }
}

#[derive(Default)]
pub(crate) struct Probe {
    links_entered: AtomicUsize,
    target_reached: AtomicBool,
}

impl Probe {
    pub(crate) fn report(&self) -> ChainReport {
        ChainReport {
            links_entered: self.links_entered.load(Ordering::Relaxed),
            target_reached: self.target_reached.load(Ordering::Relaxed),
        }
    }
}

/// Handle given to a running interceptor.
///
/// Carries the shared [`InvocationData`] and the capability to run the rest
/// of the chain.
pub struct Invocation<'a, T: Send + 'static> {
    links: &'a [Link<T>],
    index: usize,
    kind: InterceptionKind,
    trace: bool,
    target: &'a dyn Target<T>,
    data: &'a mut InvocationData,
    probe: &'a Probe,
}

impl<'a, T: Send + 'static> Invocation<'a, T> {
    /// Shared per-invocation state.
    pub fn data(&self) -> &InvocationData {
        &*self.data
    }

    /// Mutable shared per-invocation state.
    pub fn data_mut(&mut self) -> &mut InvocationData {
        &mut *self.data
    }

    /// Binding of the link currently running.
    pub fn binding(&self) -> &InterceptorBinding {
        &self.links[self.index].binding
    }

    /// Position of the running link, 0 being outermost.
    pub fn position(&self) -> usize {
        self.index
    }

    /// Extension point of the chain.
    pub fn kind(&self) -> InterceptionKind {
        self.kind
    }

    /// Current state, always `Running` while a link holds the invocation.
    pub fn state(&self) -> ChainState {
        ChainState::Running(self.index)
    }

    /// Runs the rest of the chain, including the target, and returns its result.
    pub async fn proceed(&mut self) -> ScopeResult<T> {
        run_from(
            self.links,
            self.index + 1,
            self.kind,
            self.trace,
            self.target,
            &mut *self.data,
            self.probe,
        )
        .await
    }
}

impl<T: Send + 'static> fmt::Debug for Invocation<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("kind", &self.kind)
            .field("position", &self.index)
            .field("binding", &self.binding().name)
            .field("data", &self.data)
            .finish()
    }
}

/// Runs the chain starting at link `index`; past the last link, runs the target.
pub(crate) fn run_from<'a, T: Send + 'static>(
    links: &'a [Link<T>],
    index: usize,
    kind: InterceptionKind,
    trace: bool,
    target: &'a dyn Target<T>,
    data: &'a mut InvocationData,
    probe: &'a Probe,
) -> BoxFuture<'a, ScopeResult<T>> {
    Box::pin(async move {
        match links.get(index) {
            Some(link) => {
                probe.links_entered.fetch_add(1, Ordering::Relaxed);
                if trace {
                    trace!(
                        kind = %kind,
                        binding = link.binding.name,
                        priority = link.binding.priority.0,
                        position = index,
                        "entering interceptor"
                    );
                }
                let mut invocation = Invocation { links, index, kind, trace, target, data, probe };
                link.interceptor.intercept(&mut invocation).await
            }
            None => {
                probe.target_reached.store(true, Ordering::Relaxed);
                target.call(data).await
            }
        }
    })
}
