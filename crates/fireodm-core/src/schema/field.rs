use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::rule::Rule;
use crate::value::Value;

/// Whether a relation points at one document or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// A relation to another model.
///
/// Only the pointer token of the related document is ever stored; the
/// related document itself is fetched on demand by `populate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    target: String,
    cardinality: Cardinality,
}

impl RelationDescriptor {
    #[must_use]
    pub fn new(target: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            target: target.into(),
            cardinality,
        }
    }

    /// Id of the model the relation points at.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

/// How a field is encoded, grouped by codec capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Scalar,
    Reference,
    Nested,
    Array,
}

/// The semantic type of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Timestamp,
    Reference(RelationDescriptor),
    Nested(Vec<FieldDescriptor>),
    Array(Box<FieldKind>),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Reference(rel) => match rel.cardinality {
                Cardinality::One => "reference",
                Cardinality::Many => "array of references",
            },
            Self::Nested(_) => "object",
            Self::Array(_) => "array",
        }
    }

    pub const fn capability(&self) -> Capability {
        match self {
            Self::String | Self::Number | Self::Integer | Self::Boolean | Self::Timestamp => {
                Capability::Scalar
            }
            Self::Reference(_) => Capability::Reference,
            Self::Nested(_) => Capability::Nested,
            Self::Array(_) => Capability::Array,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference(rel) => write!(f, "{}<{}>", self.name(), rel.target),
            Self::Array(item) => write!(f, "array<{item}>"),
            _ => f.write_str(self.name()),
        }
    }
}

/// Declaration of a single field of a model.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    required: bool,
    default: Option<Value>,
    rules: Vec<Rule>,
}

impl FieldDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    #[must_use]
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    /// A to-one relation to the model `target`.
    #[must_use]
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference(RelationDescriptor::new(target, Cardinality::One)),
        )
    }

    /// A to-many relation to the model `target`.
    #[must_use]
    pub fn references(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference(RelationDescriptor::new(target, Cardinality::Many)),
        )
    }

    #[must_use]
    pub fn nested(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self::new(name, FieldKind::Nested(fields))
    }

    #[must_use]
    pub fn array(name: impl Into<String>, items: FieldKind) -> Self {
        Self::new(name, FieldKind::Array(Box::new(items)))
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub const fn is_required(&self) -> bool {
        self.required
    }

    pub const fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The relation declared by this field, if it is a reference field.
    pub const fn relation(&self) -> Option<&RelationDescriptor> {
        match &self.kind {
            FieldKind::Reference(rel) => Some(rel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builder() {
        let field = FieldDescriptor::string("name")
            .required()
            .with_rule(Rule::MinLength(1));
        assert_eq!(field.name(), "name");
        assert!(field.is_required());
        assert!(field.default_value().is_none());
        assert_eq!(field.rules().len(), 1);
        assert_eq!(field.kind().capability(), Capability::Scalar);
    }

    #[test]
    fn test_reference_field_exposes_relation() {
        let field = FieldDescriptor::references("followers", "User");
        let rel = field.relation().unwrap();
        assert_eq!(rel.target(), "User");
        assert_eq!(rel.cardinality(), Cardinality::Many);
        assert_eq!(field.kind().capability(), Capability::Reference);
        assert!(FieldDescriptor::string("x").relation().is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(
            FieldKind::Array(Box::new(FieldKind::String)).to_string(),
            "array<string>"
        );
        assert_eq!(
            FieldDescriptor::reference("manager", "User").kind().to_string(),
            "reference<User>"
        );
    }
}
