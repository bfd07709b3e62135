//! # UI Authorization Engine
//!
//! Advisory authorization for user interfaces: decides whether affordances
//! (buttons, links, panels) should be shown, based on asynchronous rule
//! functions that usually consult a remote authorization service.
//!
//! This is **not** a security boundary. The remote service must still enforce
//! every decision; this crate only avoids showing users things they cannot do.
//!
//! ## Features
//!
//! - **Rule registry** keyed by subject and action, with `"*"` fallbacks
//! - **Async predicates** (`Fn(Value, RuleMeta) -> Future`)
//! - **Composite checks** with AND semantics over several actions
//! - **Decision cache** keyed by BLAKE3 hashes, with optional field projection
//! - **Fail-loud errors**: a failing rule surfaces, it is never read as deny
//!
//! ## Example
//!
//! ```rust
//! use ui_authz::{predicate::deny_all, Authorizer, Context, RuleMeta, RuleRegistry};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = RuleRegistry::builder()
//!         .subject("post", |rules| {
//!             rules
//!                 .action("edit?", |value: Value, _meta: RuleMeta| async move {
//!                     anyhow::Ok(value["owner"] == "alice")
//!                 })
//!                 .any_action(deny_all())
//!         })
//!         .build()?;
//!
//!     let authorizer = Authorizer::new(registry);
//!     let context = Context::new(json!({"owner": "alice"}));
//!
//!     if authorizer.authorize_all("post", &["edit?"], &context).await? {
//!         println!("Show the edit button");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod directive;
pub mod engine;
pub mod error;
pub mod predicate;
pub mod rules;
pub mod types;

// Re-export commonly used types
pub use directive::{Directive, Visibility};
pub use engine::{Authorizer, AuthorizerConfig, CacheConfig, CacheStats, DecisionCache};
pub use error::{AuthzError, Result};
pub use predicate::Predicate;
pub use rules::{RuleKey, RuleRegistry, RuleSource, WILDCARD};
pub use types::{ActionName, AuthorizationRequest, Context, RuleMeta, SubjectName};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
