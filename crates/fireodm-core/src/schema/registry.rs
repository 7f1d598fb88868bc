use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::field::FieldDescriptor;
use crate::schema::model::ModelDescriptor;

/// Process-wide mapping from model ids to their descriptors.
///
/// Populated once at startup; afterwards it is shared read-only (typically
/// behind an `Arc`) and needs no locking.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: Vec<Arc<ModelDescriptor>>,
    by_id: HashMap<String, usize>,
    by_collection: HashMap<String, usize>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model whose collection name equals its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateModel`] if the id is taken, or
    /// [`Error::InvalidSchema`] if the field declarations are malformed.
    pub fn register(
        &mut self,
        model_id: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> Result<Arc<ModelDescriptor>> {
        let model = ModelDescriptor::builder(model_id).fields(fields).build()?;
        self.register_model(model)
    }

    /// Register a fully built model descriptor.
    ///
    /// Re-registering an id is an error, never an overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateModel`] if the id is taken and
    /// [`Error::InvalidSchema`] if another model already maps the collection.
    pub fn register_model(&mut self, model: ModelDescriptor) -> Result<Arc<ModelDescriptor>> {
        if self.by_id.contains_key(model.id()) {
            return Err(Error::DuplicateModel {
                model: model.id().to_string(),
            });
        }
        if let Some(&existing) = self.by_collection.get(model.collection()) {
            return Err(Error::InvalidSchema(format!(
                "collection `{}` is already mapped by model `{}`",
                model.collection(),
                self.models[existing].id()
            )));
        }

        let index = self.models.len();
        self.by_id.insert(model.id().to_string(), index);
        self.by_collection
            .insert(model.collection().to_string(), index);

        log::debug!(
            "Registered model {} ({} fields, collection {})",
            model.id(),
            model.fields().len(),
            model.collection()
        );

        let model = Arc::new(model);
        self.models.push(Arc::clone(&model));
        Ok(model)
    }

    /// Look up a model by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if nothing is registered under `model_id`.
    pub fn lookup(&self, model_id: &str) -> Result<Arc<ModelDescriptor>> {
        self.by_id
            .get(model_id)
            .map(|&index| Arc::clone(&self.models[index]))
            .ok_or_else(|| Error::UnknownModel {
                model: model_id.to_string(),
            })
    }

    /// Look up the model stored in `collection`.
    pub fn by_collection(&self, collection: &str) -> Option<Arc<ModelDescriptor>> {
        self.by_collection
            .get(collection)
            .map(|&index| Arc::clone(&self.models[index]))
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.by_id.contains_key(model_id)
    }

    /// Registered models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Relations whose target model is not registered, as
    /// `(model, field, target)` triples.
    pub fn dangling_relations(&self) -> Vec<(String, String, String)> {
        self.models
            .iter()
            .flat_map(|model| {
                model
                    .relations()
                    .filter(|(_, rel)| !self.contains(rel.target()))
                    .map(|(field, rel)| {
                        (
                            model.id().to_string(),
                            field.name().to_string(),
                            rel.target().to_string(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Check that every relation target is registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] naming the first missing target.
    pub fn verify_relations(&self) -> Result<()> {
        match self.dangling_relations().into_iter().next() {
            Some((model, field, target)) => {
                log::error!("Relation {model}.{field} targets unregistered model {target}");
                Err(Error::UnknownModel { model: target })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SchemaRegistry::new();
        let fields = vec![
            FieldDescriptor::string("name").required(),
            FieldDescriptor::string("email"),
            FieldDescriptor::integer("age"),
        ];
        registry.register("users", fields).unwrap();

        let model = registry.lookup("users").unwrap();
        let names: Vec<&str> = model.fields().iter().map(FieldDescriptor::name).collect();
        assert_eq!(names, vec!["name", "email", "age"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = SchemaRegistry::new();
        registry.register("users", vec![]).unwrap();
        let err = registry
            .register("users", vec![FieldDescriptor::string("other")])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateModel { model } if model == "users"));

        // The first registration is untouched.
        assert!(registry.lookup("users").unwrap().fields().is_empty());
    }

    #[test]
    fn test_unknown_model() {
        let registry = SchemaRegistry::new();
        let err = registry.lookup("ghost").unwrap_err();
        assert!(matches!(err, Error::UnknownModel { model } if model == "ghost"));
    }

    #[test]
    fn test_collection_conflict() {
        let mut registry = SchemaRegistry::new();
        registry
            .register_model(ModelDescriptor::builder("User").collection("people").build().unwrap())
            .unwrap();
        let err = registry
            .register_model(ModelDescriptor::builder("Person").collection("people").build().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registration_order_and_collection_lookup() {
        let mut registry = SchemaRegistry::new();
        for id in ["b", "a", "c"] {
            registry.register(id, vec![]).unwrap();
        }
        let ids: Vec<&str> = registry.models().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(registry.by_collection("a").unwrap().id(), "a");
    }

    #[test]
    fn test_verify_relations() {
        let mut registry = SchemaRegistry::new();
        registry
            .register("posts", vec![FieldDescriptor::reference("author", "users")])
            .unwrap();
        assert_eq!(
            registry.dangling_relations(),
            vec![("posts".to_string(), "author".to_string(), "users".to_string())]
        );
        assert!(matches!(
            registry.verify_relations(),
            Err(Error::UnknownModel { model }) if model == "users"
        ));

        registry.register("users", vec![]).unwrap();
        assert!(registry.verify_relations().is_ok());
    }
}
