//! Core authorization types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Subject namespace identifier (e.g., "post", "invoice")
pub type SubjectName = String;

/// Action identifier within a subject (e.g., "edit?", "delete?")
pub type ActionName = String;

/// Rule identity handed to every predicate invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleMeta {
    /// Subject the check was requested for
    pub subject: SubjectName,

    /// Action the check was requested for
    pub action: ActionName,
}

impl RuleMeta {
    /// Create rule metadata
    pub fn new(subject: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
        }
    }
}

/// Caller-supplied data passed to predicates
///
/// `cache_keys` selects which top-level fields of an object value take part
/// in the decision cache key. Two objects that agree on those fields share a
/// cached decision. Without a projection the whole value is hashed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Value forwarded to the predicate unchanged
    #[serde(default)]
    pub value: Value,

    /// Optional projection used for cache key derivation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_keys: Option<BTreeSet<String>>,
}

impl Context {
    /// Create a context from any JSON-compatible value
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            cache_keys: None,
        }
    }

    /// Context carrying no value (`null`)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Restrict cache key derivation to the given fields
    pub fn with_cache_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// The value predicates receive
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl From<Value> for Context {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// A single UI evaluation: one subject, an ordered set of actions, one value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Subject namespace
    pub subject: SubjectName,

    /// Actions that must all be granted
    #[serde(default)]
    pub actions: Vec<ActionName>,

    /// Context passed to every predicate
    #[serde(default)]
    pub context: Context,
}

impl AuthorizationRequest {
    /// Create a request with no actions (authorizes vacuously)
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            actions: Vec::new(),
            context: Context::empty(),
        }
    }

    /// Append an action
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Set the context
    pub fn with_context(mut self, context: impl Into<Context>) -> Self {
        self.context = context.into();
        self
    }
}
