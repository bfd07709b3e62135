//! Declarative form used by UI bindings
//!
//! A declaration names one subject and the actions it needs, e.g.
//! `post:edit?.publish?`. Bindings hide the element first and only show it
//! once every action resolved to allow. Nothing here touches a UI framework;
//! adapters translate [`Visibility`] into their own show/hide calls.

use crate::engine::Authorizer;
use crate::error::{AuthzError, Result};
use crate::rules::WILDCARD;
use crate::types::{ActionName, AuthorizationRequest, Context, SubjectName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parsed `subject:action?.action2?` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub subject: SubjectName,
    pub actions: Vec<ActionName>,
}

impl Directive {
    /// Parse a declaration
    ///
    /// A bare `subject` has no actions and is always allowed. A missing
    /// subject (`:edit?`) names the wildcard subject `*`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (subject, actions) = match input.split_once(':') {
            Some((subject, actions)) => (subject.trim(), Some(actions)),
            None => (input, None),
        };

        let subject = if subject.is_empty() { WILDCARD } else { subject };

        let actions = match actions {
            None => Vec::new(),
            Some(actions) => actions
                .split('.')
                .map(|action| {
                    let action = action.trim();
                    if action.is_empty() {
                        Err(AuthzError::InvalidDirective(format!(
                            "empty action in '{}'",
                            input
                        )))
                    } else {
                        Ok(action.to_string())
                    }
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            subject: subject.to_string(),
            actions,
        })
    }

    /// Turn the declaration into a request carrying `context`
    pub fn into_request(self, context: impl Into<Context>) -> AuthorizationRequest {
        AuthorizationRequest {
            subject: self.subject,
            actions: self.actions,
            context: context.into(),
        }
    }
}

impl FromStr for Directive {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)?;
        if !self.actions.is_empty() {
            write!(f, ":{}", self.actions.join("."))?;
        }
        Ok(())
    }
}

/// Display state for a bound element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Initial state, and the state after a denial or a failure
    #[default]
    Hidden,
    Visible,
}

impl Visibility {
    /// Only an allow shows the element; errors keep it hidden
    pub fn from_outcome(outcome: &Result<bool>) -> Self {
        match outcome {
            Ok(true) => Self::Visible,
            Ok(false) | Err(_) => Self::Hidden,
        }
    }

    pub fn is_visible(self) -> bool {
        self == Self::Visible
    }
}

impl Authorizer {
    /// Resolve a declaration against `context`
    pub async fn evaluate_directive(&self, directive: &Directive, context: &Context) -> Result<bool> {
        self.authorize_all(&directive.subject, &directive.actions, context)
            .await
    }
}
