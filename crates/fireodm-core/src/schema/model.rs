use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::schema::field::{FieldDescriptor, FieldKind, RelationDescriptor};
use crate::schema::rule::ModelRule;
use crate::validation::Violation;
use crate::value::Fields;

/// The schema of one model: its collection and ordered field declarations.
///
/// Built once through [`ModelDescriptor::builder`] and never mutated after
/// registration.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    id: String,
    collection: String,
    fields: Vec<FieldDescriptor>,
    rules: Vec<ModelRule>,
    strict: bool,
}

impl ModelDescriptor {
    #[must_use]
    pub fn builder(id: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            id: id.into(),
            collection: None,
            fields: Vec::new(),
            rules: Vec::new(),
            strict: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn rules(&self) -> &[ModelRule] {
        &self.rules
    }

    /// Strict models reject unknown fields instead of dropping them.
    pub const fn is_strict(&self) -> bool {
        self.strict
    }

    /// Reference fields declared directly on this model.
    pub fn relations(&self) -> impl Iterator<Item = (&FieldDescriptor, &RelationDescriptor)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation().map(|rel| (f, rel)))
    }
}

/// Builder for [`ModelDescriptor`].
#[derive(Debug)]
pub struct ModelBuilder {
    id: String,
    collection: Option<String>,
    fields: Vec<FieldDescriptor>,
    rules: Vec<ModelRule>,
    strict: bool,
}

impl ModelBuilder {
    /// Storage collection name. Defaults to the model id.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a cross-field rule, run after every field has passed its checks.
    #[must_use]
    pub fn rule<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Fields) -> Vec<Violation> + Send + Sync + 'static,
    {
        self.rules.push(ModelRule::new(name, check));
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Check the declaration and produce the immutable descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] for empty ids, collection names that
    /// cannot form a pointer token, duplicate or malformed field names,
    /// references below the top level, and rules that do not apply to their
    /// field's type.
    pub fn build(self) -> Result<ModelDescriptor> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidSchema("model id must not be empty".to_string()));
        }

        let collection = self.collection.unwrap_or_else(|| self.id.clone());
        if collection.is_empty() || collection.contains('/') {
            return Err(Error::InvalidSchema(format!(
                "model `{}`: collection name `{collection}` must be non-empty and contain no `/`",
                self.id
            )));
        }

        check_fields(&self.id, "", &self.fields)?;

        Ok(ModelDescriptor {
            id: self.id,
            collection,
            fields: self.fields,
            rules: self.rules,
            strict: self.strict,
        })
    }
}

fn check_fields(model: &str, prefix: &str, fields: &[FieldDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();
    for field in fields {
        let name = field.name();
        let path = format!("{prefix}{name}");
        if name.is_empty() || name.contains(['.', '[', ']']) {
            return Err(Error::InvalidSchema(format!(
                "model `{model}`: invalid field name `{path}`"
            )));
        }
        if !seen.insert(name) {
            return Err(Error::InvalidSchema(format!(
                "model `{model}`: duplicate field `{path}`"
            )));
        }
        for rule in field.rules() {
            if !rule.applies_to(field.kind()) {
                return Err(Error::InvalidSchema(format!(
                    "model `{model}`: rule `{}` does not apply to {} field `{path}`",
                    rule.name(),
                    field.kind()
                )));
            }
        }
        check_kind(model, &path, field.kind(), prefix.is_empty())?;
    }
    Ok(())
}

/// Relations are resolved and cached per top-level field, so references
/// inside nested objects or arrays are refused.
fn check_kind(model: &str, path: &str, kind: &FieldKind, top_level: bool) -> Result<()> {
    match kind {
        FieldKind::Nested(fields) => check_fields(model, &format!("{path}."), fields),
        FieldKind::Array(item) => check_kind(model, path, item, false),
        FieldKind::Reference(_) if !top_level => Err(Error::InvalidSchema(format!(
            "model `{model}`: reference `{path}` must be a top-level field \
             (declare a to-many reference instead of an array of references)"
        ))),
        FieldKind::Reference(rel) if rel.target().is_empty() => Err(Error::InvalidSchema(
            format!("model `{model}`: relation `{path}` has no target model"),
        )),
        _ => Ok(()),
    }
}
