//! Scope and bean identity keys.

use std::any::TypeId;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of one logical scope instance (e.g. one request).
///
/// Cheap to clone; business code never receives it as a parameter, it is
/// recovered from the ambient [`ScopeContext`](crate::ScopeContext).
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::ScopeKey;
///
/// let a = ScopeKey::new("req-42");
/// let b: ScopeKey = "req-42".into();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "req-42");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(Arc<str>);

impl ScopeKey {
    /// Creates a scope key from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        ScopeKey(Arc::from(id.as_ref()))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeKey({})", self.0)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeKey {
    fn from(value: &str) -> Self {
        ScopeKey::new(value)
    }
}

impl From<String> for ScopeKey {
    fn from(value: String) -> Self {
        ScopeKey(Arc::from(value))
    }
}

impl Borrow<str> for ScopeKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name distinguishing several instances of one bean type inside a scope.
///
/// The empty name is the unqualified (default) slot.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QualifierName(Arc<str>);

impl QualifierName {
    /// Creates a qualifier name.
    pub fn new(name: impl AsRef<str>) -> Self {
        QualifierName(Arc::from(name.as_ref()))
    }

    /// The unqualified slot.
    pub fn unqualified() -> Self {
        QualifierName(Arc::from(""))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the unqualified slot.
    pub fn is_unqualified(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for QualifierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unqualified() {
            f.write_str("QualifierName(<unqualified>)")
        } else {
            write!(f, "QualifierName({})", self.0)
        }
    }
}

impl fmt::Display for QualifierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QualifierName {
    fn from(value: &str) -> Self {
        QualifierName::new(value)
    }
}

impl From<String> for QualifierName {
    fn from(value: String) -> Self {
        QualifierName(Arc::from(value))
    }
}

/// Slot identity inside one scope partition: bean type plus qualifier.
///
/// Equality and hashing use the `TypeId` and qualifier only; the type name is
/// carried for diagnostics.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{bean_key, named_bean_key};
///
/// struct Cart;
///
/// let plain = bean_key::<Cart>();
/// let named = named_bean_key::<Cart>("guest");
/// assert_ne!(plain, named);
/// assert_eq!(named.qualifier().as_str(), "guest");
/// assert!(plain.display_name().ends_with("Cart"));
/// ```
#[derive(Debug, Clone)]
pub struct BeanKey {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: QualifierName,
}

impl BeanKey {
    /// Creates a key from its parts.
    pub fn new(type_id: TypeId, type_name: &'static str, qualifier: QualifierName) -> Self {
        Self { type_id, type_name, qualifier }
    }

    /// `TypeId` of the bean.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name used in diagnostics.
    pub fn display_name(&self) -> &'static str {
        self.type_name
    }

    /// Qualifier of the slot.
    pub fn qualifier(&self) -> &QualifierName {
        &self.qualifier
    }
}

impl PartialEq for BeanKey {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for BeanKey {}

impl std::hash::Hash for BeanKey {
    #[inline(always)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl fmt::Display for BeanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualifier.is_unqualified() {
            f.write_str(self.type_name)
        } else {
            write!(f, "{}@{}", self.type_name, self.qualifier)
        }
    }
}

/// Key of the unqualified slot for `T`.
#[inline(always)]
pub fn bean_key<T: 'static>() -> BeanKey {
    BeanKey::new(TypeId::of::<T>(), std::any::type_name::<T>(), QualifierName::unqualified())
}

/// Key of the `qualifier` slot for `T`.
#[inline(always)]
pub fn named_bean_key<T: 'static>(qualifier: impl Into<QualifierName>) -> BeanKey {
    BeanKey::new(TypeId::of::<T>(), std::any::type_name::<T>(), qualifier.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn bean_key_ignores_type_name_for_equality() {
        let a = BeanKey::new(TypeId::of::<u32>(), "u32", QualifierName::unqualified());
        let b = BeanKey::new(TypeId::of::<u32>(), "renamed", QualifierName::unqualified());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn qualifier_separates_slots() {
        assert_ne!(named_bean_key::<u32>("primary"), named_bean_key::<u32>("replica"));
        assert_ne!(bean_key::<u32>(), bean_key::<u64>());
        assert_eq!(bean_key::<u32>(), named_bean_key::<u32>(""));
    }

    #[test]
    fn display_includes_qualifier() {
        assert_eq!(named_bean_key::<u8>("x").to_string(), "u8@x");
        assert_eq!(bean_key::<u8>().to_string(), "u8");
    }
}
