//! Rule functions
//!
//! A predicate decides allow/deny for one `(subject, action, value)`. Rule
//! functions usually call the authoritative remote service, so they are
//! asynchronous and may fail. Any `Fn(Value, RuleMeta) -> Future` closure is a
//! predicate:
//!
//! ```rust
//! use ui_authz::predicate::Predicate;
//! use ui_authz::RuleMeta;
//! use serde_json::Value;
//!
//! fn owner_is_alice() -> impl Predicate {
//!     |value: Value, _meta: RuleMeta| async move { anyhow::Ok(value["owner"] == "alice") }
//! }
//! ```

use crate::types::RuleMeta;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Asynchronous allow/deny decision for one rule
#[async_trait]
pub trait Predicate: Send + Sync {
    /// Decide whether `meta.action` on `meta.subject` is allowed for `value`
    async fn evaluate(&self, value: &Value, meta: &RuleMeta) -> anyhow::Result<bool>;
}

#[async_trait]
impl<F, Fut> Predicate for F
where
    F: Fn(Value, RuleMeta) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    async fn evaluate(&self, value: &Value, meta: &RuleMeta) -> anyhow::Result<bool> {
        (self)(value.clone(), meta.clone()).await
    }
}

/// Predicate that always resolves to the same answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant(pub bool);

#[async_trait]
impl Predicate for Constant {
    async fn evaluate(&self, _value: &Value, _meta: &RuleMeta) -> anyhow::Result<bool> {
        Ok(self.0)
    }
}

/// Always allow
pub fn allow_all() -> Constant {
    Constant(true)
}

/// Always deny. Also the fallback for unregistered rules.
pub fn deny_all() -> Constant {
    Constant(false)
}

/// Predicate bounded by a deadline
///
/// The core never times out on its own: a predicate that never settles keeps
/// its `authorize_all` pending forever. Wrap slow rule functions with this
/// when building the registry.
pub struct WithTimeout<P> {
    inner: P,
    duration: Duration,
}

/// Fail `predicate` with an error if it has not settled within `duration`
pub fn with_timeout<P: Predicate>(duration: Duration, predicate: P) -> WithTimeout<P> {
    WithTimeout {
        inner: predicate,
        duration,
    }
}

#[async_trait]
impl<P: Predicate> Predicate for WithTimeout<P> {
    async fn evaluate(&self, value: &Value, meta: &RuleMeta) -> anyhow::Result<bool> {
        match tokio::time::timeout(self.duration, self.inner.evaluate(value, meta)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "{}.{} did not settle within {:?}",
                meta.subject,
                meta.action,
                self.duration
            )),
        }
    }
}

/// Shared handle to a predicate, as stored in the registry
pub type SharedPredicate = Arc<dyn Predicate>;
