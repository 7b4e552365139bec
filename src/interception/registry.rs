//! Static registration table for interceptor bindings and qualifier attributes.
//!
//! Populated once at startup by generated or hand-written registration code,
//! then consumed read-only. Chains are built on first use and cached per
//! target, extension point and value type.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;

use super::chain::{Chain, ChainBuilder, InterceptionKind, InterceptorBinding};
use super::invocation::Interceptor;
use crate::config::RuntimeConfig;
use crate::error::{ScopeError, ScopeResult};

/// Identity of a construction or invocation target.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(Arc<str>);

impl TargetId {
    /// Creates a target id from a raw name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Construction target for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    /// Invocation target for `method` on `T`.
    pub fn method<T: ?Sized + 'static>(method: &str) -> Self {
        Self::new(format!("{}::{}", std::any::type_name::<T>(), method))
    }

    /// Raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

/// Qualifier type name to attribute name/value map.
///
/// Plain data used to match injection targets against a requirement.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::QualifierAttributes;
///
/// let declared = QualifierAttributes::new()
///     .with("Region", "name", "eu")
///     .with("Tier", "level", "gold");
/// let wanted = QualifierAttributes::new().with("Region", "name", "eu");
///
/// assert!(declared.matches(&wanted));
/// assert!(!wanted.matches(&declared));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualifierAttributes(BTreeMap<String, BTreeMap<String, String>>);

impl QualifierAttributes {
    /// Empty attribute map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, qualifier: impl Into<String>, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(qualifier, attribute, value);
        self
    }

    /// Sets one attribute of `qualifier`.
    pub fn insert(&mut self, qualifier: impl Into<String>, attribute: impl Into<String>, value: impl Into<String>) {
        self.0
            .entry(qualifier.into())
            .or_default()
            .insert(attribute.into(), value.into());
    }

    /// Attributes of `qualifier`, if declared.
    pub fn get(&self, qualifier: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(qualifier)
    }

    /// `true` if every qualifier in `required` is declared here with the same
    /// attributes.
    pub fn matches(&self, required: &QualifierAttributes) -> bool {
        required
            .0
            .iter()
            .all(|(qualifier, attrs)| self.0.get(qualifier) == Some(attrs))
    }

    /// Number of qualifiers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no qualifier is declared.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct Registered {
    binding: InterceptorBinding,
    value_type: TypeId,
    // Arc<dyn Interceptor<T>> for the registered value type.
    interceptor: Arc<dyn Any + Send + Sync>,
}

type EntryKey = (TargetId, InterceptionKind);
type CacheKey = (TargetId, InterceptionKind, TypeId);

/// Registration table mapping targets to interceptor bindings.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use ferrous_scope::{
///     InterceptionKind, InterceptionRegistry, Interceptor, InterceptorBinding, Invocation,
///     InvocationData, ScopeResult, TargetId,
/// };
///
/// struct Audit;
///
/// #[async_trait]
/// impl Interceptor<u64> for Audit {
///     async fn intercept(&self, inv: &mut Invocation<'_, u64>) -> ScopeResult<u64> {
///         inv.data_mut().set("audited", true);
///         inv.proceed().await
///     }
/// }
///
/// struct Ledger;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ScopeResult<()> {
/// let mut registry = InterceptionRegistry::new();
/// let balance = TargetId::method::<Ledger>("balance");
/// registry.register(balance.clone(), InterceptorBinding::around_invoke("audit", 0), Audit);
///
/// let chain = registry.chain_for::<u64>(&balance, InterceptionKind::AroundInvoke)?;
/// let mut data = InvocationData::for_method("balance");
/// let target = |_: &InvocationData| async { Ok(100u64) };
/// assert_eq!(chain.execute(&target, &mut data).await?, 100);
/// assert_eq!(data.get::<bool>("audited"), Some(&true));
/// # Ok(())
/// # }
/// ```
pub struct InterceptionRegistry {
    entries: HashMap<EntryKey, Vec<Registered>>,
    qualifiers: HashMap<TargetId, QualifierAttributes>,
    chains: DashMap<CacheKey, Arc<dyn Any + Send + Sync>, RandomState>,
    trace: bool,
}

impl InterceptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            qualifiers: HashMap::new(),
            chains: DashMap::with_hasher(RandomState::new()),
            trace: false,
        }
    }

    /// Creates an empty registry honouring `config.trace_chains`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let mut registry = Self::new();
        registry.trace = config.trace_chains;
        registry
    }

    /// Registers `interceptor` for `target`. Declaration order breaks priority ties.
    pub fn register<T, I>(&mut self, target: TargetId, binding: InterceptorBinding, interceptor: I)
    where
        T: Send + 'static,
        I: Interceptor<T> + 'static,
    {
        self.register_shared::<T>(target, binding, Arc::new(interceptor));
    }

    /// Registers a shared interceptor for `target`.
    pub fn register_shared<T: Send + 'static>(
        &mut self,
        target: TargetId,
        binding: InterceptorBinding,
        interceptor: Arc<dyn Interceptor<T>>,
    ) {
        let kind = binding.kind;
        self.chains.retain(|(id, k, _), _| !(id == &target && *k == kind));
        self.entries.entry((target, kind)).or_default().push(Registered {
            binding,
            value_type: TypeId::of::<T>(),
            interceptor: Arc::new(interceptor),
        });
    }

    /// Attaches qualifier attributes to `target`, replacing earlier ones.
    pub fn set_qualifiers(&mut self, target: TargetId, attributes: QualifierAttributes) {
        self.qualifiers.insert(target, attributes);
    }

    /// Qualifier attributes of `target`.
    pub fn qualifiers(&self, target: &TargetId) -> Option<&QualifierAttributes> {
        self.qualifiers.get(target)
    }

    /// Targets whose qualifier attributes satisfy `required`, sorted by name.
    pub fn targets_matching(&self, required: &QualifierAttributes) -> Vec<&TargetId> {
        let mut found: Vec<&TargetId> = self
            .qualifiers
            .iter()
            .filter(|(_, attrs)| attrs.matches(required))
            .map(|(id, _)| id)
            .collect();
        found.sort();
        found
    }

    /// Bindings declared for `target` and `kind`, in declaration order.
    pub fn bindings(&self, target: &TargetId, kind: InterceptionKind) -> Vec<&InterceptorBinding> {
        self.entries
            .get(&(target.clone(), kind))
            .map(|regs| regs.iter().map(|r| &r.binding).collect())
            .unwrap_or_default()
    }

    /// `true` if any binding is declared for `target` and `kind`.
    pub fn has_bindings(&self, target: &TargetId, kind: InterceptionKind) -> bool {
        self.entries
            .get(&(target.clone(), kind))
            .is_some_and(|regs| !regs.is_empty())
    }

    /// Ordered chain for `target` and `kind`, built on first use.
    ///
    /// A target without bindings yields an empty chain. Fails with
    /// [`ScopeError::TypeMismatch`] if an interceptor was registered for a
    /// value type other than `T`.
    pub fn chain_for<T: Send + 'static>(&self, target: &TargetId, kind: InterceptionKind) -> ScopeResult<Chain<T>> {
        let cache_key = (target.clone(), kind, TypeId::of::<T>());
        if let Some(cached) = self.chains.get(&cache_key) {
            if let Some(chain) = cached.value().downcast_ref::<Chain<T>>() {
                return Ok(chain.clone());
            }
        }

        let mut builder = ChainBuilder::<T>::new(kind).trace(self.trace);
        if let Some(regs) = self.entries.get(&(target.clone(), kind)) {
            for reg in regs {
                let interceptor = reg
                    .interceptor
                    .downcast_ref::<Arc<dyn Interceptor<T>>>()
                    .filter(|_| reg.value_type == TypeId::of::<T>())
                    .ok_or(ScopeError::TypeMismatch { expected: std::any::type_name::<T>() })?;
                builder = builder.with_shared(reg.binding.clone(), interceptor.clone());
            }
        }
        let chain = builder.build()?;

        let stored = self
            .chains
            .entry(cache_key)
            .or_insert_with(|| Arc::new(chain.clone()))
            .value()
            .clone();
        Ok(stored.downcast_ref::<Chain<T>>().cloned().unwrap_or(chain))
    }

    /// Number of targets with at least one binding.
    pub fn target_count(&self) -> usize {
        let mut ids: Vec<&TargetId> = self.entries.keys().map(|(id, _)| id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

impl Default for InterceptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionRegistry")
            .field("targets", &self.target_count())
            .field("qualified", &self.qualifiers.len())
            .field("cached_chains", &self.chains.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::{Invocation, InvocationData};
    use async_trait::async_trait;

    struct Tag(&'static str);

    #[async_trait]
    impl Interceptor<String> for Tag {
        async fn intercept(&self, inv: &mut Invocation<'_, String>) -> ScopeResult<String> {
            Ok(format!("{}:{}", self.0, inv.proceed().await?))
        }
    }

    struct Svc;

    #[tokio::test]
    async fn chain_is_ordered_and_cached() {
        let mut registry = InterceptionRegistry::new();
        let id = TargetId::method::<Svc>("run");
        registry.register(id.clone(), InterceptorBinding::around_invoke("late", 10), Tag("late"));
        registry.register(id.clone(), InterceptorBinding::around_invoke("early", 1), Tag("early"));

        let chain = registry.chain_for::<String>(&id, InterceptionKind::AroundInvoke).unwrap();
        let target = |_: &InvocationData| async { Ok("body".to_string()) };
        assert_eq!(chain.invoke(&target).await.unwrap(), "early:late:body");

        let again = registry.chain_for::<String>(&id, InterceptionKind::AroundInvoke).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(registry.chains.len(), 1);
    }

    #[test]
    fn unknown_target_yields_empty_chain() {
        let registry = InterceptionRegistry::new();
        let chain = registry
            .chain_for::<String>(&TargetId::of::<Svc>(), InterceptionKind::AroundConstruct)
            .unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn wrong_value_type_is_reported() {
        let mut registry = InterceptionRegistry::new();
        let id = TargetId::method::<Svc>("run");
        registry.register(id.clone(), InterceptorBinding::around_invoke("tag", 0), Tag("t"));

        let err = registry.chain_for::<u8>(&id, InterceptionKind::AroundInvoke).unwrap_err();
        assert!(matches!(err, ScopeError::TypeMismatch { .. }));
    }

    #[test]
    fn registration_invalidates_cached_chain() {
        let mut registry = InterceptionRegistry::new();
        let id = TargetId::method::<Svc>("run");
        registry.register(id.clone(), InterceptorBinding::around_invoke("a", 0), Tag("a"));
        assert_eq!(registry.chain_for::<String>(&id, InterceptionKind::AroundInvoke).unwrap().len(), 1);

        registry.register(id.clone(), InterceptorBinding::around_invoke("b", 1), Tag("b"));
        assert_eq!(registry.chain_for::<String>(&id, InterceptionKind::AroundInvoke).unwrap().len(), 2);
    }

    #[test]
    fn qualifier_matching() {
        let mut registry = InterceptionRegistry::new();
        registry.set_qualifiers(TargetId::new("eu-db"), QualifierAttributes::new().with("Region", "name", "eu"));
        registry.set_qualifiers(TargetId::new("us-db"), QualifierAttributes::new().with("Region", "name", "us"));

        let wanted = QualifierAttributes::new().with("Region", "name", "eu");
        let found = registry.targets_matching(&wanted);
        assert_eq!(found, vec![&TargetId::new("eu-db")]);

        // An empty requirement matches everything.
        assert_eq!(registry.targets_matching(&QualifierAttributes::new()).len(), 2);
    }
}
