//! Field and model validation rules.

use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::schema::field::{Cardinality, FieldKind};
use crate::validation::Violation;
use crate::value::{Fields, Value};

static EMAIL: LazyLock<Regex> = LazyLock::new(email_pattern);

#[allow(clippy::expect_used)]
fn email_pattern() -> Regex {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
}

type FieldCheck = dyn Fn(&Value) -> Result<(), String> + Send + Sync;
type ModelCheck = dyn Fn(&Fields) -> Vec<Violation> + Send + Sync;

/// A constraint checked after a field's value has passed its type check.
#[derive(Debug, Clone)]
pub enum Rule {
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Email,
    Min(f64),
    Max(f64),
    OneOf(Vec<Value>),
    MinItems(usize),
    MaxItems(usize),
    Custom(CustomRule),
}

impl Rule {
    /// Build a named custom predicate. The closure returns the
    /// human-readable reason when the value is rejected.
    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Custom(CustomRule {
            name: name.into(),
            check: Arc::new(check),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::MinLength(_) => "min_length",
            Self::MaxLength(_) => "max_length",
            Self::Pattern(_) => "pattern",
            Self::Email => "email",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::OneOf(_) => "one_of",
            Self::MinItems(_) => "min_items",
            Self::MaxItems(_) => "max_items",
            Self::Custom(custom) => &custom.name,
        }
    }

    /// Whether the rule can be evaluated against values of `kind`.
    pub fn applies_to(&self, kind: &FieldKind) -> bool {
        match self {
            Self::MinLength(_) | Self::MaxLength(_) | Self::Pattern(_) | Self::Email => {
                matches!(kind, FieldKind::String)
            }
            Self::Min(_) | Self::Max(_) => matches!(kind, FieldKind::Number | FieldKind::Integer),
            Self::MinItems(_) | Self::MaxItems(_) => match kind {
                FieldKind::Array(_) => true,
                FieldKind::Reference(rel) => rel.cardinality() == Cardinality::Many,
                _ => false,
            },
            Self::OneOf(_) | Self::Custom(_) => true,
        }
    }

    /// Evaluate the rule against a type-checked value.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Self::MinLength(min), Value::String(s)) if s.chars().count() < *min => {
                Err(format!("must be at least {min} characters long"))
            }
            (Self::MaxLength(max), Value::String(s)) if s.chars().count() > *max => {
                Err(format!("must be at most {max} characters long"))
            }
            (Self::Pattern(re), Value::String(s)) if !re.is_match(s) => {
                Err(format!("must match pattern `{}`", re.as_str()))
            }
            (Self::Email, Value::String(s)) if !EMAIL.is_match(s) => {
                Err("must be a valid email address".to_string())
            }
            (Self::Min(min), v) if v.as_f64().is_some_and(|n| n < *min) => {
                Err(format!("must be greater than or equal to {min}"))
            }
            (Self::Max(max), v) if v.as_f64().is_some_and(|n| n > *max) => {
                Err(format!("must be less than or equal to {max}"))
            }
            (Self::OneOf(allowed), v) if !allowed.iter().any(|a| a.loosely_eq(v)) => {
                let options: Vec<String> = allowed.iter().map(|a| a.to_json().to_string()).collect();
                Err(format!("must be one of {}", options.join(", ")))
            }
            (Self::MinItems(min), Value::Array(items)) if items.len() < *min => {
                Err(format!("must contain at least {min} items"))
            }
            (Self::MaxItems(max), Value::Array(items)) if items.len() > *max => {
                Err(format!("must contain at most {max} items"))
            }
            (Self::Custom(custom), v) => (custom.check)(v),
            _ => Ok(()),
        }
    }
}

/// A named, user-supplied field predicate.
#[derive(Clone)]
pub struct CustomRule {
    name: String,
    check: Arc<FieldCheck>,
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named cross-field predicate evaluated once every field is well typed.
#[derive(Clone)]
pub struct ModelRule {
    name: String,
    check: Arc<ModelCheck>,
}

impl ModelRule {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Fields) -> Vec<Violation> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, fields: &Fields) -> Vec<Violation> {
        (self.check)(fields)
    }
}

impl fmt::Debug for ModelRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
