//! Runtime configuration for the scope runtime.

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::context::SCOPE_KEY_FIELD;

/// How [`ScopeInstanceStore::get_or_create`](crate::ScopeInstanceStore::get_or_create)
/// handles concurrent misses on the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum ConstructionPolicy {
    /// The first caller reserves the slot before its supplier starts; later
    /// callers wait for that construction. The supplier runs once per slot
    /// unless it fails, in which case the next caller retries.
    #[default]
    ReserveThenConstruct,
    /// Every missing caller runs its supplier; the first install wins and the
    /// other results are dropped.
    ConstructThenRace,
}

/// Configuration for a scope runtime.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{ConstructionPolicy, RuntimeConfig};
///
/// let config = RuntimeConfig::default()
///     .with_scope_key_field("request.id")
///     .with_construction(ConstructionPolicy::ConstructThenRace);
///
/// assert_eq!(config.scope_key_field, "request.id");
/// assert!(!config.trace_chains);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct RuntimeConfig {
    /// Context field carrying the scope key
    pub scope_key_field: String,
    /// Concurrent construction policy
    pub construction: ConstructionPolicy,
    /// Emit a `trace!` event per entered interceptor link
    pub trace_chains: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scope_key_field: SCOPE_KEY_FIELD.to_string(),
            construction: ConstructionPolicy::default(),
            trace_chains: false,
        }
    }
}

impl RuntimeConfig {
    /// Overrides the scope key field.
    pub fn with_scope_key_field(mut self, field: impl Into<String>) -> Self {
        self.scope_key_field = field.into();
        self
    }

    /// Overrides the construction policy.
    pub fn with_construction(mut self, policy: ConstructionPolicy) -> Self {
        self.construction = policy;
        self
    }

    /// Enables per-link chain tracing.
    pub fn with_trace_chains(mut self, enabled: bool) -> Self {
        self.trace_chains = enabled;
        self
    }

    /// Parses a configuration from JSON; missing fields take their defaults.
    #[cfg(feature = "config")]
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
