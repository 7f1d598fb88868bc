//! Declarative model definitions loaded from a TOML file.
//!
//! A schema file is the file-based equivalent of declaring models in code:
//! every `[[models]]` table becomes a [`ModelDescriptor`] and every
//! `[[models.fields]]` entry a [`FieldDescriptor`].
//!
//! # Example
//!
//! ```toml
//! [[models]]
//! id = "User"
//! collection = "users"
//!
//! [[models.fields]]
//! name = "name"
//! type = "string"
//! required = true
//! min_length = 1
//!
//! [[models.fields]]
//! name = "manager"
//! type = "reference"
//! target = "User"
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::schema::field::{Cardinality, FieldDescriptor, FieldKind, RelationDescriptor};
use crate::schema::model::ModelDescriptor;
use crate::schema::registry::SchemaRegistry;
use crate::schema::rule::Rule;
use crate::value::Value;

/// Top-level container of a schema file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub models: Vec<ModelDef>,
}

/// A model declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDef {
    pub id: String,

    /// Collection name; defaults to the model id.
    #[serde(default)]
    pub collection: Option<String>,

    /// Reject unknown fields instead of dropping them.
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// The declared type of a field in a schema file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindDef {
    String,
    Number,
    Integer,
    Boolean,
    Timestamp,
    Reference,
    Nested,
    Array,
}

/// A field declaration with its validation constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: KindDef,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// Target model id for reference fields.
    #[serde(default)]
    pub target: Option<String>,

    /// A reference field holding many pointer tokens.
    #[serde(default)]
    pub many: bool,

    /// Element type for array fields.
    #[serde(default)]
    pub items: Option<KindDef>,

    /// Sub-fields of a nested field, or of the elements of an
    /// `items = "nested"` array.
    #[serde(default)]
    pub fields: Vec<FieldDef>,

    #[serde(default)]
    pub min_length: Option<usize>,

    #[serde(default)]
    pub max_length: Option<usize>,

    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub email: bool,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,

    #[serde(default)]
    pub one_of: Vec<serde_json::Value>,

    #[serde(default)]
    pub min_items: Option<usize>,

    #[serde(default)]
    pub max_items: Option<usize>,
}

impl SchemaFile {
    /// Load a schema file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&content).map_err(|e| {
            Error::InvalidSchema(format!(
                "failed to parse schema file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Parse a schema from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] if the text is not a valid schema.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::InvalidSchema(format!("failed to parse schema: {e}")))
    }

    /// Build descriptors for every declared model and register them in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// Returns the first descriptor or registration error encountered.
    pub fn into_registry(self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for model in self.models {
            registry.register_model(model.into_descriptor()?)?;
        }
        Ok(registry)
    }
}

/// Load a schema file and build its registry in one step.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or declares an invalid schema.
pub fn load_registry(path: &Path) -> Result<SchemaRegistry> {
    SchemaFile::load(path)?.into_registry()
}

impl ModelDef {
    /// Convert into a model descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] if a field declaration is incomplete.
    pub fn into_descriptor(self) -> Result<ModelDescriptor> {
        let mut builder = ModelDescriptor::builder(self.id.clone());
        if let Some(collection) = self.collection {
            builder = builder.collection(collection);
        }
        if self.strict {
            builder = builder.strict();
        }
        let fields = self
            .fields
            .into_iter()
            .map(|field| field.into_descriptor(&self.id))
            .collect::<Result<Vec<_>>>()?;
        builder.fields(fields).build()
    }
}

impl FieldDef {
    fn into_descriptor(self, model: &str) -> Result<FieldDescriptor> {
        let kind = self.field_kind(model)?;
        let rules = self.rules(model)?;

        let mut field = FieldDescriptor::new(self.name, kind);
        if self.required {
            field = field.required();
        }
        if let Some(default) = &self.default {
            field = field.with_default(Value::from_json(default));
        }
        for rule in rules {
            field = field.with_rule(rule);
        }
        Ok(field)
    }

    fn field_kind(&self, model: &str) -> Result<FieldKind> {
        let kind = match self.kind {
            KindDef::Reference => {
                let target = self.target.clone().ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "model `{model}`: reference field `{}` needs a `target`",
                        self.name
                    ))
                })?;
                let cardinality = if self.many {
                    Cardinality::Many
                } else {
                    Cardinality::One
                };
                FieldKind::Reference(RelationDescriptor::new(target, cardinality))
            }
            KindDef::Nested => FieldKind::Nested(self.sub_fields(model)?),
            KindDef::Array => {
                let items = self.items.ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "model `{model}`: array field `{}` needs `items`",
                        self.name
                    ))
                })?;
                let item_kind = match (items, scalar_kind(items)) {
                    (_, Some(scalar)) => scalar,
                    (KindDef::Nested, None) => FieldKind::Nested(self.sub_fields(model)?),
                    (_, None) => {
                        return Err(Error::InvalidSchema(format!(
                            "model `{model}`: array field `{}` cannot hold {:?} items",
                            self.name, items
                        )));
                    }
                };
                FieldKind::Array(Box::new(item_kind))
            }
            KindDef::String
            | KindDef::Number
            | KindDef::Integer
            | KindDef::Boolean
            | KindDef::Timestamp => scalar_kind(self.kind).ok_or_else(|| {
                Error::InvalidSchema(format!(
                    "model `{model}`: `{}` has no scalar type",
                    self.name
                ))
            })?,
        };
        Ok(kind)
    }

    fn sub_fields(&self, model: &str) -> Result<Vec<FieldDescriptor>> {
        self.fields
            .iter()
            .cloned()
            .map(|field| field.into_descriptor(model))
            .collect()
    }

    fn rules(&self, model: &str) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        if let Some(n) = self.min_length {
            rules.push(Rule::MinLength(n));
        }
        if let Some(n) = self.max_length {
            rules.push(Rule::MaxLength(n));
        }
        if let Some(pattern) = &self.pattern {
            let re = Regex::new(pattern).map_err(|e| {
                Error::InvalidSchema(format!(
                    "model `{model}`: invalid pattern on `{}`: {e}",
                    self.name
                ))
            })?;
            rules.push(Rule::Pattern(re));
        }
        if self.email {
            rules.push(Rule::Email);
        }
        if let Some(min) = self.min {
            rules.push(Rule::Min(min));
        }
        if let Some(max) = self.max {
            rules.push(Rule::Max(max));
        }
        if !self.one_of.is_empty() {
            rules.push(Rule::OneOf(self.one_of.iter().map(Value::from_json).collect()));
        }
        if let Some(n) = self.min_items {
            rules.push(Rule::MinItems(n));
        }
        if let Some(n) = self.max_items {
            rules.push(Rule::MaxItems(n));
        }
        Ok(rules)
    }
}

/// The field kind of a scalar type; `None` for references, nested objects
/// and arrays, which carry extra declaration data.
const fn scalar_kind(kind: KindDef) -> Option<FieldKind> {
    match kind {
        KindDef::String => Some(FieldKind::String),
        KindDef::Number => Some(FieldKind::Number),
        KindDef::Integer => Some(FieldKind::Integer),
        KindDef::Boolean => Some(FieldKind::Boolean),
        KindDef::Timestamp => Some(FieldKind::Timestamp),
        KindDef::Reference | KindDef::Nested | KindDef::Array => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field::Capability;

    const BLOG: &str = r#"
[[models]]
id = "User"
collection = "users"
strict = true

[[models.fields]]
name = "name"
type = "string"
required = true
min_length = 1

[[models.fields]]
name = "email"
type = "string"
email = true

[[models.fields]]
name = "manager"
type = "reference"
target = "User"

[[models.fields]]
name = "address"
type = "nested"

[[models.fields.fields]]
name = "city"
type = "string"
required = true

[[models]]
id = "Post"
collection = "posts"

[[models.fields]]
name = "status"
type = "string"
default = "draft"
one_of = ["draft", "published"]

[[models.fields]]
name = "tags"
type = "array"
items = "string"
max_items = 5

[[models.fields]]
name = "readers"
type = "reference"
target = "User"
many = true
"#;

    #[test]
    fn test_parse_schema_file() {
        let registry = SchemaFile::parse(BLOG).unwrap().into_registry().unwrap();
        assert_eq!(registry.len(), 2);

        let user = registry.lookup("User").unwrap();
        assert!(user.is_strict());
        assert_eq!(user.collection(), "users");
        assert_eq!(user.fields().len(), 4);
        assert!(user.field("name").unwrap().is_required());
        assert_eq!(user.field("email").unwrap().rules()[0].name(), "email");
        match user.field("address").unwrap().kind() {
            FieldKind::Nested(fields) => assert_eq!(fields[0].name(), "city"),
            other => panic!("unexpected kind {other}"),
        }

        let post = registry.lookup("Post").unwrap();
        assert_eq!(post.field("status").unwrap().default_value(), Some(&Value::from("draft")));
        assert_eq!(
            post.field("tags").unwrap().kind().capability(),
            Capability::Array
        );
        let readers = post.field("readers").unwrap().relation().unwrap();
        assert_eq!(readers.cardinality(), Cardinality::Many);
        assert!(registry.verify_relations().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.toml");
        std::fs::write(&path, BLOG).unwrap();

        let registry = load_registry(&path).unwrap();
        assert!(registry.contains("Post"));
    }

    #[test]
    fn test_shipped_example_schema_parses() {
        let example = include_str!("../../../../config/models.toml");
        let registry = SchemaFile::parse(example).unwrap().into_registry().unwrap();
        assert!(!registry.is_empty());
        assert!(registry.verify_relations().is_ok());
    }

    #[test]
    fn test_reference_without_target() {
        let toml = r#"
[[models]]
id = "Post"

[[models.fields]]
name = "author"
type = "reference"
"#;
        let err = SchemaFile::parse(toml).unwrap().into_registry().unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(msg) if msg.contains("needs a `target`")));
    }

    #[test]
    fn test_reference_inside_nested_rejected() {
        let toml = r#"
[[models]]
id = "Order"

[[models.fields]]
name = "shipping"
type = "nested"

[[models.fields.fields]]
name = "carrier"
type = "reference"
target = "Carrier"
"#;
        let err = SchemaFile::parse(toml).unwrap().into_registry().unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(msg) if msg.contains("`shipping.carrier`")));
    }

    #[test]
    fn test_array_items_must_be_scalar_or_nested() {
        let toml = r#"
[[models]]
id = "Order"

[[models.fields]]
name = "carriers"
type = "array"
items = "reference"
target = "Carrier"
"#;
        let err = SchemaFile::parse(toml).unwrap().into_registry().unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(msg) if msg.contains("cannot hold Reference items")));

        let toml = r#"
[[models]]
id = "Order"

[[models.fields]]
name = "codes"
type = "array"
items = "integer"
"#;
        let registry = SchemaFile::parse(toml).unwrap().into_registry().unwrap();
        let order = registry.lookup("Order").unwrap();
        assert!(matches!(
            order.field("codes").unwrap().kind(),
            FieldKind::Array(item) if matches!(**item, FieldKind::Integer)
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        let toml = r#"
[[models]]
id = "Post"

[[models.fields]]
name = "slug"
type = "string"
pattern = "([a-z"
"#;
        assert!(SchemaFile::parse(toml).unwrap().into_registry().is_err());
    }

    #[test]
    fn test_duplicate_model_in_file() {
        let toml = r#"
[[models]]
id = "Post"

[[models]]
id = "Post"
collection = "other_posts"
"#;
        let err = SchemaFile::parse(toml).unwrap().into_registry().unwrap_err();
        assert!(matches!(err, Error::DuplicateModel { .. }));
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(SchemaFile::load(Path::new("/nonexistent/models.toml")).is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml [[[[").unwrap();
        assert!(SchemaFile::load(&path).is_err());
    }

    #[test]
    fn test_empty_file_yields_empty_registry() {
        let registry = SchemaFile::parse("").unwrap().into_registry().unwrap();
        assert!(registry.is_empty());
    }
}
