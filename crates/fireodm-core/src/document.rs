use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::ModelDescriptor;
use crate::value::{DocRef, Fields, Value};

/// A populated relation cached on a document.
///
/// The cache holds snapshots of the related documents. It never owns the
/// document it hangs off, so it can be dropped or rebuilt at any time.
#[derive(Debug, Clone)]
pub enum Relation {
    /// The related document was fetched.
    Resolved(Box<Document>),
    /// Expansion stopped at the depth limit; only the pointer is known.
    Unresolved(DocRef),
    /// The target does not exist and population was asked to skip it.
    Missing(DocRef),
    /// A to-many relation, one entry per resolved pointer.
    Many(Vec<Relation>),
}

impl Relation {
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Resolved(doc) => Some(doc),
            _ => None,
        }
    }

    pub const fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved(_))
    }

    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }

    /// `None` for a missing target, which renders as an absent field.
    fn to_json(&self) -> Option<JsonValue> {
        match self {
            Self::Resolved(doc) => Some(doc.to_json()),
            Self::Unresolved(pointer) => Some(serde_json::json!({ "$ref": pointer.to_string() })),
            Self::Missing(_) => None,
            Self::Many(items) => Some(JsonValue::Array(
                items.iter().filter_map(Self::to_json).collect(),
            )),
        }
    }
}

/// A runtime instance of a model.
#[derive(Debug, Clone)]
pub struct Document {
    model: Arc<ModelDescriptor>,
    id: Option<String>,
    fields: Fields,
    persisted: bool,
    relations: BTreeMap<String, Relation>,
}

impl Document {
    #[must_use]
    pub fn new(model: Arc<ModelDescriptor>) -> Self {
        Self {
            model,
            id: None,
            fields: Fields::new(),
            persisted: false,
            relations: BTreeMap::new(),
        }
    }

    /// Build an unsaved document from a JSON object of raw field values.
    ///
    /// An `"id"` key, if present and not declared as a field, becomes the
    /// document id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `json` is not an object or the id is
    /// not a string.
    pub fn from_json(model: Arc<ModelDescriptor>, json: &JsonValue) -> Result<Self> {
        let object = json.as_object().ok_or_else(|| {
            Error::InvalidData(format!(
                "{} document must be a JSON object",
                model.id()
            ))
        })?;

        let mut doc = Self::new(model);
        for (key, value) in object {
            if key == "id" && doc.model.field("id").is_none() {
                let id = value.as_str().ok_or_else(|| {
                    Error::InvalidData("document id must be a string".to_string())
                })?;
                doc.id = Some(id.to_string());
            } else {
                doc.fields.insert(key.clone(), Value::from_json(value));
            }
        }
        Ok(doc)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn model(&self) -> &Arc<ModelDescriptor> {
        &self.model
    }

    pub fn model_id(&self) -> &str {
        self.model.id()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// The storage pointer of this document, once it has an id.
    pub fn pointer(&self) -> Option<DocRef> {
        self.id
            .as_ref()
            .map(|id| DocRef::new(self.model.collection(), id.clone()))
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field value, dropping any relation cached for that field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.relations.remove(&name);
        self.fields.insert(name, value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.relations.remove(name);
        self.fields.remove(name)
    }

    /// Replace every field value, keeping cached relations whose pointers
    /// did not change.
    pub fn replace_fields(&mut self, fields: Fields) {
        let old = std::mem::replace(&mut self.fields, fields);
        self.relations.retain(|name, _| {
            match (old.get(name), self.fields.get(name)) {
                (Some(before), Some(after)) => before.loosely_eq(after),
                _ => false,
            }
        });
    }

    /// Pointer tokens stored in a reference field, in order.
    ///
    /// Strings that parse as pointer tokens are accepted, so this also works
    /// on documents that have not been validated yet.
    pub fn pointers(&self, name: &str) -> Vec<DocRef> {
        fn pointer_of(value: &Value) -> Option<DocRef> {
            match value {
                Value::Reference(r) => Some(r.clone()),
                Value::String(s) => s.parse().ok(),
                _ => None,
            }
        }

        match self.fields.get(name) {
            Some(Value::Array(items)) => items.iter().filter_map(pointer_of).collect(),
            Some(value) => pointer_of(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Whether this instance has been written to (or read from) storage.
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn set_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    /// The cached relation for a reference field, if it has been populated.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// The populated related document of a to-one reference field.
    pub fn related(&self, name: &str) -> Option<&Document> {
        self.relation(name).and_then(Relation::as_document)
    }

    pub fn cache_relation(&mut self, name: impl Into<String>, relation: Relation) {
        self.relations.insert(name.into(), relation);
    }

    pub fn forget_relation(&mut self, name: &str) {
        self.relations.remove(name);
    }

    pub fn clear_relations(&mut self) {
        self.relations.clear();
    }

    /// Render as JSON with the id under `"id"`. Populated relations replace
    /// their pointer token with the related document; relations whose
    /// target was skipped as missing are left out.
    pub fn to_json(&self) -> JsonValue {
        let mut object = Map::new();
        if let Some(id) = &self.id {
            object.insert("id".to_string(), JsonValue::String(id.clone()));
        }
        for (name, value) in &self.fields {
            let rendered = match self.relations.get(name) {
                Some(relation) => relation.to_json(),
                None => Some(value.to_json()),
            };
            if let Some(rendered) = rendered {
                object.insert(name.clone(), rendered);
            }
        }
        JsonValue::Object(object)
    }
}
