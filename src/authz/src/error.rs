//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
///
/// Missing subjects or actions are not errors: they resolve to the default
/// deny predicate. Only configuration mistakes and failing predicates surface
/// here.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Rule registry rejected at build time
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Malformed `subject:action?.action2?` declaration
    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    /// A configured predicate failed while resolving
    #[error("Predicate for {subject}.{action} failed: {source}")]
    PredicateFailed {
        subject: String,
        action: String,
        #[source]
        source: anyhow::Error,
    },

    /// Context value could not be serialized for cache key derivation
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthzError {
    /// Wrap a predicate failure with the rule it came from
    pub fn predicate_failed(
        subject: impl Into<String>,
        action: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::PredicateFailed {
            subject: subject.into(),
            action: action.into(),
            source,
        }
    }

    /// Whether this error came from a rule function rather than configuration
    pub fn is_predicate_failure(&self) -> bool {
        matches!(self, Self::PredicateFailed { .. })
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
