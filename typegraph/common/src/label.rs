use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A type label, optionally qualified by a scope.
///
/// Role type labels are unique only within the label of the relation type
/// that declares them; the relation's label is carried here as the scope.
/// All other type labels are unscoped and globally unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    name: SmolStr,
    scope: Option<SmolStr>,
}

impl Label {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    pub fn scoped(name: impl Into<SmolStr>, scope: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Returns a copy of this label with the scope replaced.
    pub fn with_scope(&self, scope: impl Into<SmolStr>) -> Self {
        Self {
            name: self.name.clone(),
            scope: Some(scope.into()),
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", scope, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
