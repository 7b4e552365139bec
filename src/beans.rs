//! Scoped bean registration and resolution.
//!
//! [`BeanCollection`] gathers scoped factories, interceptor bindings and
//! qualifier attributes; [`build`](BeanCollection::build) freezes them into a
//! [`BeanContext`]. Resolution looks up the active scope through the
//! configured [`ScopeKeyResolver`], then either reuses the instance cached in
//! that scope or constructs one through the type's around-construct chain.
//! Outside any scope the instance is constructed fresh and not cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{ScopeError, ScopeResult};
use crate::interception::{
    Chain, InterceptionKind, InterceptionRegistry, Interceptor, InterceptorBinding, InvocationData,
    QualifierAttributes, Target, TargetId,
};
use crate::key::{named_bean_key, BeanKey, QualifierName, ScopeKey};
use crate::lifecycle::ScopeLifecycle;
use crate::resolver::{ContextKeyResolver, ScopeKeyResolver};
use crate::store::{AnyArc, ScopeInstanceStore};

type Factory<T> = Arc<dyn Target<T>>;

/// Registration side of the bean context.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{BeanCollection, InvocationData, ScopeKey, ScopeLifecycle};
/// use std::sync::Arc;
///
/// struct Cart { owner: String }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferrous_scope::ScopeResult<()> {
/// let mut beans = BeanCollection::new();
/// beans.add_scoped(|_: &InvocationData| async { Ok(Cart { owner: "ann".into() }) });
/// let ctx = beans.build();
///
/// let scope = ctx.lifecycle().enter(ScopeKey::new("req-1"));
/// let (a, b) = scope
///     .scope(async { (ctx.get::<Cart>().await, ctx.get::<Cart>().await) })
///     .await;
/// assert!(Arc::ptr_eq(&a?, &b?));
/// # Ok(())
/// # }
/// ```
pub struct BeanCollection {
    config: RuntimeConfig,
    resolver: Option<Arc<dyn ScopeKeyResolver>>,
    factories: HashMap<BeanKey, AnyArc>,
    registry: InterceptionRegistry,
}

impl BeanCollection {
    /// Creates a collection with default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates a collection with explicit configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = InterceptionRegistry::from_config(&config);
        Self {
            config,
            resolver: None,
            factories: HashMap::new(),
            registry,
        }
    }

    /// Replaces the context-based scope key resolver.
    pub fn with_resolver(&mut self, resolver: Arc<dyn ScopeKeyResolver>) -> &mut Self {
        self.resolver = Some(resolver);
        self
    }

    /// Registers the unqualified scoped factory for `T`.
    pub fn add_scoped<T, F, Fut>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&InvocationData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScopeResult<T>> + Send + 'static,
    {
        self.add_named_scoped(QualifierName::unqualified(), factory)
    }

    /// Registers the scoped factory for `T` under `qualifier`.
    ///
    /// A second registration for the same type and qualifier replaces the first.
    pub fn add_named_scoped<T, F, Fut>(&mut self, qualifier: impl Into<QualifierName>, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&InvocationData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScopeResult<T>> + Send + 'static,
    {
        let key = named_bean_key::<T>(qualifier);
        let factory: Factory<T> = Arc::new(factory);
        self.factories.insert(key, Arc::new(factory));
        self
    }

    /// Adds an around-construct interceptor for every construction of `T`.
    pub fn intercept_construct<T, I>(&mut self, name: &'static str, priority: i32, interceptor: I) -> &mut Self
    where
        T: Send + 'static,
        I: Interceptor<T> + 'static,
    {
        self.registry.register::<T, I>(
            TargetId::of::<T>(),
            InterceptorBinding::around_construct(name, priority),
            interceptor,
        );
        self
    }

    /// Adds an around-invoke interceptor for `method` of `S` returning `R`.
    pub fn intercept_invoke<S, R, I>(
        &mut self,
        method: &str,
        name: &'static str,
        priority: i32,
        interceptor: I,
    ) -> &mut Self
    where
        S: ?Sized + 'static,
        R: Send + 'static,
        I: Interceptor<R> + 'static,
    {
        self.registry.register::<R, I>(
            TargetId::method::<S>(method),
            InterceptorBinding::around_invoke(name, priority),
            interceptor,
        );
        self
    }

    /// Declares the qualifier attributes of `T`.
    pub fn qualify<T: ?Sized + 'static>(&mut self, attributes: QualifierAttributes) -> &mut Self {
        self.registry.set_qualifiers(TargetId::of::<T>(), attributes);
        self
    }

    /// Direct access to the registration table.
    pub fn registry_mut(&mut self) -> &mut InterceptionRegistry {
        &mut self.registry
    }

    /// Freezes the registrations.
    pub fn build(self) -> BeanContext {
        let store = Arc::new(ScopeInstanceStore::from_config(&self.config));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(ContextKeyResolver::from_config(&self.config)));
        let lifecycle = ScopeLifecycle::from_config(store.clone(), &self.config).with_resolver(resolver.clone());

        debug!(factories = self.factories.len(), "bean context built");

        BeanContext {
            inner: Arc::new(BeanContextInner {
                store,
                lifecycle,
                resolver,
                registry: Arc::new(self.registry),
                factories: self.factories,
            }),
        }
    }
}

impl Default for BeanCollection {
    fn default() -> Self {
        Self::new()
    }
}

struct BeanContextInner {
    store: Arc<ScopeInstanceStore>,
    lifecycle: ScopeLifecycle,
    resolver: Arc<dyn ScopeKeyResolver>,
    registry: Arc<InterceptionRegistry>,
    factories: HashMap<BeanKey, AnyArc>,
}

/// Resolution side of the bean context. Cheap to clone.
#[derive(Clone)]
pub struct BeanContext {
    inner: Arc<BeanContextInner>,
}

impl BeanContext {
    /// Resolves the unqualified `T`.
    pub async fn get<T: Send + Sync + 'static>(&self) -> ScopeResult<Arc<T>> {
        self.get_named::<T>(QualifierName::unqualified()).await
    }

    /// Resolves `T` under `qualifier`.
    ///
    /// Inside a scope the instance is cached per scope; otherwise a fresh,
    /// uncached instance is returned.
    pub async fn get_named<T: Send + Sync + 'static>(&self, qualifier: impl Into<QualifierName>) -> ScopeResult<Arc<T>> {
        let key = named_bean_key::<T>(qualifier);
        let factory = self.factory::<T>(&key)?;
        let chain = self
            .inner
            .registry
            .chain_for::<T>(&TargetId::of::<T>(), InterceptionKind::AroundConstruct)?;

        match self.inner.resolver.resolve().await {
            Some(scope) => {
                self.inner
                    .store
                    .get_or_create(&scope, key.qualifier().clone(), move || construct(chain, factory))
                    .await
            }
            None => {
                debug!(bean = %key, "no active scope, constructing uncached instance");
                construct(chain, factory).await.map(Arc::new)
            }
        }
    }

    /// Runs `target` as `method` of `S` through its around-invoke chain.
    pub async fn invoke<S, R>(&self, method: &'static str, target: &dyn Target<R>) -> ScopeResult<R>
    where
        S: ?Sized + 'static,
        R: Send + 'static,
    {
        let chain = self
            .inner
            .registry
            .chain_for::<R>(&TargetId::method::<S>(method), InterceptionKind::AroundInvoke)?;
        let mut data = InvocationData::for_method(method);
        chain.execute(target, &mut data).await
    }

    /// Scope active for the caller, if any.
    pub async fn current_scope(&self) -> Option<ScopeKey> {
        self.inner.resolver.resolve().await
    }

    /// `true` if a factory exists for `T` under `qualifier`.
    pub fn is_registered<T: 'static>(&self, qualifier: impl Into<QualifierName>) -> bool {
        self.inner.factories.contains_key(&named_bean_key::<T>(qualifier))
    }

    /// Underlying instance store.
    pub fn store(&self) -> &Arc<ScopeInstanceStore> {
        &self.inner.store
    }

    /// Scope lifecycle sharing this context's store and resolver.
    pub fn lifecycle(&self) -> &ScopeLifecycle {
        &self.inner.lifecycle
    }

    /// Frozen registration table.
    pub fn registry(&self) -> &Arc<InterceptionRegistry> {
        &self.inner.registry
    }

    fn factory<T: Send + Sync + 'static>(&self, key: &BeanKey) -> ScopeResult<Factory<T>> {
        self.inner
            .factories
            .get(key)
            .and_then(|f| f.downcast_ref::<Factory<T>>())
            .cloned()
            .ok_or(ScopeError::NotRegistered(std::any::type_name::<T>()))
    }
}

impl std::fmt::Debug for BeanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanContext")
            .field("factories", &self.inner.factories.len())
            .field("store", &self.inner.store)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

async fn construct<T: Send + 'static>(chain: Chain<T>, factory: Factory<T>) -> ScopeResult<T> {
    let mut data = InvocationData::new();
    chain.execute(factory.as_ref(), &mut data).await
}
