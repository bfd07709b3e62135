//! Rule registry: subject → action → predicate
//!
//! Lookups never fail. A subject without rules falls back to the wildcard
//! subject, an action without a rule falls back to the wildcard action of the
//! chosen rule set, and anything left over resolves to a predicate that always
//! denies.

use crate::error::{AuthzError, Result};
use crate::predicate::{deny_all, Predicate, SharedPredicate};
use crate::types::{ActionName, SubjectName};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name that matches any subject or action
pub const WILDCARD: &str = "*";

/// Registry key: a concrete name or the wildcard sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKey {
    /// Exact name
    Named(String),
    /// Fallback used when no exact name matches
    Wildcard,
}

impl From<&str> for RuleKey {
    fn from(name: &str) -> Self {
        if name == WILDCARD {
            Self::Wildcard
        } else {
            Self::Named(name.to_string())
        }
    }
}

impl From<String> for RuleKey {
    fn from(name: String) -> Self {
        if name == WILDCARD {
            Self::Wildcard
        } else {
            Self::Named(name)
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Wildcard => f.write_str(WILDCARD),
        }
    }
}

/// Where a resolved predicate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSource {
    /// Exact action match
    Exact,
    /// Wildcard action of the selected rule set
    WildcardAction,
    /// Nothing matched; default deny
    Default,
}

/// Predicate chosen for a `(subject, action)` lookup
#[derive(Clone)]
pub struct ResolvedRule {
    pub predicate: SharedPredicate,
    pub source: RuleSource,
}

/// Action rules of a single subject
#[derive(Clone, Default)]
pub struct SubjectRules {
    actions: HashMap<ActionName, SharedPredicate>,
    any_action: Option<SharedPredicate>,
}

impl SubjectRules {
    /// Exact rule for an action
    pub fn get(&self, action: &str) -> Option<&SharedPredicate> {
        self.actions.get(action)
    }

    /// Wildcard action rule
    pub fn any_action(&self) -> Option<&SharedPredicate> {
        self.any_action.as_ref()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    /// Number of rules, wildcard included
    pub fn len(&self) -> usize {
        self.actions.len() + usize::from(self.any_action.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered action names, sorted
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for SubjectRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectRules")
            .field("actions", &self.action_names())
            .field("any_action", &self.any_action.is_some())
            .finish()
    }
}

/// Two-level rule mapping with wildcard fallback
#[derive(Clone)]
pub struct RuleRegistry {
    subjects: HashMap<SubjectName, SubjectRules>,
    any_subject: SubjectRules,
    deny: SharedPredicate,
}

impl RuleRegistry {
    /// Start building a registry
    pub fn builder() -> RuleRegistryBuilder {
        RuleRegistryBuilder::default()
    }

    /// Registry with no rules; every check denies
    pub fn empty() -> Self {
        Self {
            subjects: HashMap::new(),
            any_subject: SubjectRules::default(),
            deny: Arc::new(deny_all()),
        }
    }

    /// Rules for a subject: its own, else the wildcard subject's, else empty
    pub fn subject_rules(&self, subject: &str) -> &SubjectRules {
        self.subjects.get(subject).unwrap_or(&self.any_subject)
    }

    /// Resolve the predicate for `(subject, action)` and report its origin
    pub fn resolve(&self, subject: &str, action: &str) -> ResolvedRule {
        let rules = self.subject_rules(subject);

        if let Some(predicate) = rules.get(action) {
            return ResolvedRule {
                predicate: Arc::clone(predicate),
                source: RuleSource::Exact,
            };
        }

        match rules.any_action() {
            Some(predicate) => ResolvedRule {
                predicate: Arc::clone(predicate),
                source: RuleSource::WildcardAction,
            },
            None => ResolvedRule {
                predicate: Arc::clone(&self.deny),
                source: RuleSource::Default,
            },
        }
    }

    /// Predicate for `(subject, action)`; never absent
    pub fn resolve_predicate(&self, subject: &str, action: &str) -> SharedPredicate {
        self.resolve(subject, action).predicate
    }

    /// Registered subject names (wildcard excluded), sorted
    pub fn subject_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.subjects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether a wildcard subject is configured
    pub fn has_any_subject(&self) -> bool {
        !self.any_subject.is_empty()
    }

    /// Total number of rules across all subjects
    pub fn rule_count(&self) -> usize {
        self.subjects.values().map(SubjectRules::len).sum::<usize>() + self.any_subject.len()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("subjects", &self.subjects)
            .field("any_subject", &self.any_subject)
            .finish()
    }
}

/// Collects the rules of one subject
#[derive(Default)]
pub struct SubjectRulesBuilder {
    entries: Vec<(RuleKey, SharedPredicate)>,
}

impl SubjectRulesBuilder {
    /// Register a predicate for an action; `"*"` registers the wildcard action
    pub fn action<P>(self, action: impl Into<RuleKey>, predicate: P) -> Self
    where
        P: Predicate + 'static,
    {
        self.shared_action(action, Arc::new(predicate))
    }

    /// Register an already shared predicate
    pub fn shared_action(mut self, action: impl Into<RuleKey>, predicate: SharedPredicate) -> Self {
        self.entries.push((action.into(), predicate));
        self
    }

    /// Register the wildcard action
    pub fn any_action<P>(self, predicate: P) -> Self
    where
        P: Predicate + 'static,
    {
        self.action(RuleKey::Wildcard, predicate)
    }

    fn build(self, subject: &RuleKey) -> Result<SubjectRules> {
        let mut rules = SubjectRules::default();

        for (key, predicate) in self.entries {
            match key {
                RuleKey::Named(name) => {
                    if name.trim().is_empty() {
                        return Err(AuthzError::InvalidRule(format!(
                            "empty action name under subject '{}'",
                            subject
                        )));
                    }
                    if rules.actions.contains_key(&name) {
                        return Err(AuthzError::InvalidRule(format!(
                            "duplicate action '{}' under subject '{}'",
                            name, subject
                        )));
                    }
                    rules.actions.insert(name, predicate);
                }
                RuleKey::Wildcard => {
                    if rules.any_action.is_some() {
                        return Err(AuthzError::InvalidRule(format!(
                            "duplicate wildcard action under subject '{}'",
                            subject
                        )));
                    }
                    rules.any_action = Some(predicate);
                }
            }
        }

        Ok(rules)
    }
}

/// Builds and validates a [`RuleRegistry`]
#[derive(Default)]
pub struct RuleRegistryBuilder {
    subjects: Vec<(RuleKey, SubjectRulesBuilder)>,
}

impl RuleRegistryBuilder {
    /// Register the rules of a subject; `"*"` registers the wildcard subject
    pub fn subject<F>(mut self, subject: impl Into<RuleKey>, rules: F) -> Self
    where
        F: FnOnce(SubjectRulesBuilder) -> SubjectRulesBuilder,
    {
        self.subjects
            .push((subject.into(), rules(SubjectRulesBuilder::default())));
        self
    }

    /// Register the wildcard subject
    pub fn any_subject<F>(self, rules: F) -> Self
    where
        F: FnOnce(SubjectRulesBuilder) -> SubjectRulesBuilder,
    {
        self.subject(RuleKey::Wildcard, rules)
    }

    /// Validate and produce the registry
    pub fn build(self) -> Result<RuleRegistry> {
        let mut registry = RuleRegistry::empty();
        let mut any_subject_seen = false;

        for (key, builder) in self.subjects {
            let rules = builder.build(&key)?;
            match key {
                RuleKey::Named(name) => {
                    if name.trim().is_empty() {
                        return Err(AuthzError::InvalidRule("empty subject name".to_string()));
                    }
                    if registry.subjects.contains_key(&name) {
                        return Err(AuthzError::InvalidRule(format!(
                            "duplicate subject '{}'",
                            name
                        )));
                    }
                    registry.subjects.insert(name, rules);
                }
                RuleKey::Wildcard => {
                    if any_subject_seen {
                        return Err(AuthzError::InvalidRule(
                            "duplicate wildcard subject".to_string(),
                        ));
                    }
                    any_subject_seen = true;
                    registry.any_subject = rules;
                }
            }
        }

        Ok(registry)
    }
}
