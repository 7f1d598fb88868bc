//! The document mapper entry point.
//!
//! Every save runs the write state machine:
//!
//! ```text
//! Pending -> Validating -> Valid -> BeforeSaveHooks -> Encoding -> Persisting
//!         -> AfterSaveHooks -> Committed
//!                       \-> Invalid -> Rejected
//! ```
//!
//! Before-save hooks work on a staged copy of the caller's document, which
//! is only written back once the write commits. Their output is validated
//! again before encoding (`BeforeSaveHooks -> Invalid`). A rejected write leaves the
//! caller's instance as it was. Hook side effects are not rolled back.

use async_trait::async_trait;
use fireodm_core::codec::{decode_document, encode_document, OnCodecError};
use fireodm_core::storage::{Driver, MemoryDriver};
use fireodm_core::validation::{validate_document, ValidationError, ValidationResult};
use fireodm_core::{
    DocRef, Document, Error, Fields, ModelDescriptor, Phase, Result, SchemaRegistry, StorageError,
    Value, WriteState,
};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::filter::Filter;
use crate::hooks::{HookRegistry, Operation};
use crate::relation::{Loader, PopulateOptions, RelationResolver};

/// Runtime knobs, usually derived from [`crate::Config::settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Applied to every storage call. Drivers drop a call that has not
    /// started when the limit expires; a statement already running may
    /// still complete after the write was reported rejected.
    pub storage_timeout: Duration,
    /// Used by [`Odm::populate`] when no options are passed.
    pub populate: PopulateOptions,
    pub on_codec_error: OnCodecError,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(5),
            populate: PopulateOptions::default(),
            on_codec_error: OnCodecError::Abort,
        }
    }
}

#[derive(Debug)]
struct Inner {
    registry: Arc<SchemaRegistry>,
    hooks: HookRegistry,
    driver: Arc<dyn Driver>,
    settings: Settings,
}

/// Maps documents of registered models to a storage driver.
///
/// Cheap to clone; clones share the registry, hooks and driver.
#[derive(Debug, Clone)]
pub struct Odm {
    inner: Arc<Inner>,
}

#[derive(Debug)]
pub struct OdmBuilder {
    registry: Arc<SchemaRegistry>,
    hooks: HookRegistry,
    driver: Option<Arc<dyn Driver>>,
    settings: Settings,
}

impl OdmBuilder {
    pub fn new(registry: impl Into<Arc<SchemaRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            hooks: HookRegistry::new(),
            driver: None,
            settings: Settings::default(),
        }
    }

    #[must_use]
    pub fn driver(mut self, driver: impl Driver + 'static) -> Self {
        self.driver = Some(Arc::new(driver));
        self
    }

    #[must_use]
    pub fn shared_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn before<F>(
        mut self,
        model: impl Into<String>,
        operation: Operation,
        name: impl Into<String>,
        callback: F,
    ) -> Self
    where
        F: Fn(&mut Document) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_before(model, operation, name, callback);
        self
    }

    #[must_use]
    pub fn after<F>(
        mut self,
        model: impl Into<String>,
        operation: Operation,
        name: impl Into<String>,
        callback: F,
    ) -> Self
    where
        F: Fn(&Document) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_after(model, operation, name, callback);
        self
    }

    #[must_use]
    pub const fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Finish the builder. Without a driver, documents are kept in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if a relation targets, or a hook is
    /// registered on, a model the registry does not know.
    pub fn build(self) -> Result<Odm> {
        self.registry.verify_relations()?;
        for model in self.hooks.models() {
            self.registry.lookup(model)?;
        }

        let driver = self
            .driver
            .unwrap_or_else(|| Arc::new(MemoryDriver::new()));

        Ok(Odm {
            inner: Arc::new(Inner {
                registry: self.registry,
                hooks: self.hooks,
                driver,
                settings: self.settings,
            }),
        })
    }
}

/// Logs and checks the state transitions of one write.
struct WriteTracker<'a> {
    model: &'a str,
    state: WriteState,
}

impl<'a> WriteTracker<'a> {
    const fn new(model: &'a str) -> Self {
        Self {
            model,
            state: WriteState::Pending,
        }
    }

    fn advance(&mut self, next: WriteState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal write transition {} -> {next}",
            self.state
        );
        log::debug!("{} write: {} -> {next}", self.model, self.state);
        self.state = next;
    }

    fn reject(&mut self) {
        if !self.state.is_terminal() {
            self.advance(WriteState::Rejected);
        }
    }
}

impl Odm {
    pub fn builder(registry: impl Into<Arc<SchemaRegistry>>) -> OdmBuilder {
        OdmBuilder::new(registry)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if `model_id` is not registered.
    pub fn model(&self, model_id: &str) -> Result<Arc<ModelDescriptor>> {
        self.inner.registry.lookup(model_id)
    }

    /// A new, empty, unsaved document of `model_id`.
    pub fn create(&self, model_id: &str) -> Result<Document> {
        Ok(Document::new(self.model(model_id)?))
    }

    /// A new unsaved document from a JSON object of raw values.
    pub fn create_from_json(&self, model_id: &str, json: &JsonValue) -> Result<Document> {
        Document::from_json(self.model(model_id)?, json)
    }

    /// Validate without writing. Never touches storage.
    pub fn validate(&self, doc: &Document) -> ValidationResult {
        validate_document(doc)
    }

    /// Validate, run hooks and persist `doc`.
    ///
    /// A document without an id gets a fresh UUID. On success `doc` holds
    /// the normalized, persisted values; on failure it is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing every violation,
    /// [`Error::HookAbort`] if a before-save hook fails, [`Error::Codec`] if
    /// a hook left a value that cannot be encoded, and [`Error::Storage`] if
    /// the driver fails or times out.
    pub async fn save(&self, doc: &mut Document) -> Result<()> {
        let model_id = doc.model_id().to_string();
        let mut tracker = WriteTracker::new(&model_id);

        match self.stage_and_persist(doc, &mut tracker).await {
            Ok(staged) => {
                tracker.advance(WriteState::AfterSaveHooks);
                if let Err(err) =
                    self.inner
                        .hooks
                        .dispatch_after(&model_id, Phase::AfterSave, &staged)
                {
                    log::warn!("{err}");
                }
                tracker.advance(WriteState::Committed);

                let id = staged.id().unwrap_or_default().to_string();
                log::info!("Saved {model_id} {id}");
                doc.set_id(id);
                doc.replace_fields(staged.into_fields());
                doc.set_persisted(true);
                Ok(())
            }
            Err(err) => {
                tracker.reject();
                log::debug!("Rejected {model_id} write: {err}");
                Err(err)
            }
        }
    }

    async fn stage_and_persist(
        &self,
        doc: &Document,
        tracker: &mut WriteTracker<'_>,
    ) -> Result<Document> {
        let model = Arc::clone(doc.model());

        tracker.advance(WriteState::Validating);
        let mut staged = checked(doc, tracker)?;
        tracker.advance(WriteState::Valid);

        tracker.advance(WriteState::BeforeSaveHooks);
        if staged.id().is_none() {
            staged.set_id(Uuid::new_v4().to_string());
        }
        self.inner
            .hooks
            .dispatch(model.id(), Phase::BeforeSave, &mut staged)?;
        let mut staged = checked(&staged, tracker)?;

        tracker.advance(WriteState::Encoding);
        let body = encode_document(&model, staged.fields())?;

        tracker.advance(WriteState::Persisting);
        let id = staged
            .id()
            .ok_or_else(|| Error::MissingId {
                model: model.id().to_string(),
            })?
            .to_string();
        self.storage("put", self.inner.driver.put(model.collection(), &id, &body))
            .await?;

        staged.set_persisted(true);
        Ok(staged)
    }

    /// Merge `patch` into `doc` and save it. A `null` value removes the field.
    ///
    /// # Errors
    ///
    /// Same as [`Odm::save`]; on failure `doc` is unchanged.
    pub async fn update(&self, doc: &mut Document, patch: Fields) -> Result<()> {
        let mut updated = doc.clone();
        for (name, value) in patch {
            if value.is_null() {
                updated.remove(&name);
            } else {
                updated.set(name, value);
            }
        }
        self.save(&mut updated).await?;
        *doc = updated;
        Ok(())
    }

    /// Load a document by id, or `None` if it is not stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HookAbort`] if a before- or after-load hook fails,
    /// [`Error::Codec`] if the stored body does not decode under the
    /// configured policy, and [`Error::Storage`] on driver failures.
    pub async fn load(&self, model_id: &str, id: &str) -> Result<Option<Document>> {
        let model = self.model(model_id)?;
        self.load_model(&model, id).await
    }

    async fn load_model(&self, model: &Arc<ModelDescriptor>, id: &str) -> Result<Option<Document>> {
        let mut shell = Document::new(Arc::clone(model)).with_id(id);
        self.inner
            .hooks
            .dispatch(model.id(), Phase::BeforeLoad, &mut shell)?;

        let Some(body) = self
            .storage("get", self.inner.driver.get(model.collection(), id))
            .await?
        else {
            return Ok(None);
        };

        self.hydrate(model, id, &body).map(Some)
    }

    /// Decode a stored body and run the after-load hooks.
    fn hydrate(&self, model: &Arc<ModelDescriptor>, id: &str, body: &JsonValue) -> Result<Document> {
        let fields = decode_document(model, body, self.inner.settings.on_codec_error)?;
        let mut doc = Document::new(Arc::clone(model))
            .with_id(id)
            .with_fields(fields);
        doc.set_persisted(true);
        self.inner
            .hooks
            .dispatch_after(model.id(), Phase::AfterLoad, &doc)?;
        Ok(doc)
    }

    /// Like [`Odm::load`], failing when the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing is stored under `id`.
    pub async fn get(&self, model_id: &str, id: &str) -> Result<Document> {
        self.load(model_id, id)
            .await?
            .ok_or_else(|| Error::NotFound {
                model: model_id.to_string(),
                id: id.to_string(),
            })
    }

    /// Re-read `doc` from storage, keeping cached relations whose pointers
    /// did not change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingId`] for unsaved documents and
    /// [`Error::NotFound`] if the document was deleted.
    pub async fn reload(&self, doc: &mut Document) -> Result<()> {
        let id = doc
            .id()
            .ok_or_else(|| Error::MissingId {
                model: doc.model_id().to_string(),
            })?
            .to_string();
        let fresh = self.get(doc.model_id(), &id).await?;
        doc.replace_fields(fresh.into_fields());
        doc.set_persisted(true);
        Ok(())
    }

    /// Delete `doc` from storage. Returns `false` if it was not stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingId`] for documents without an id,
    /// [`Error::HookAbort`] if a before-delete hook vetoes, and
    /// [`Error::Storage`] on driver failures.
    pub async fn delete(&self, doc: &mut Document) -> Result<bool> {
        let model = Arc::clone(doc.model());
        let id = doc
            .id()
            .ok_or_else(|| Error::MissingId {
                model: model.id().to_string(),
            })?
            .to_string();

        let mut staged = doc.clone();
        self.inner
            .hooks
            .dispatch(model.id(), Phase::BeforeDelete, &mut staged)?;

        let removed = self
            .storage("delete", self.inner.driver.delete(model.collection(), &id))
            .await?;
        doc.set_persisted(false);

        if let Err(err) = self
            .inner
            .hooks
            .dispatch_after(model.id(), Phase::AfterDelete, doc)
        {
            log::warn!("{err}");
        }
        if removed {
            log::info!("Deleted {} {id}", model.id());
        }
        Ok(removed)
    }

    /// Load and delete a document by id. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Same as [`Odm::load`] and [`Odm::delete`].
    pub async fn delete_by_id(&self, model_id: &str, id: &str) -> Result<bool> {
        match self.load(model_id, id).await? {
            Some(mut doc) => self.delete(&mut doc).await,
            None => Ok(false),
        }
    }

    /// Every stored document of a model, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns decode, after-load hook and storage errors.
    pub async fn find_all(&self, model_id: &str) -> Result<Vec<Document>> {
        let model = self.model(model_id)?;
        let records = self
            .storage("list", self.inner.driver.list(model.collection()))
            .await?;
        records
            .iter()
            .map(|record| self.hydrate(&model, &record.id, &record.body))
            .collect()
    }

    /// Stored documents of a model matching `filter`.
    ///
    /// # Errors
    ///
    /// Same as [`Odm::find_all`].
    pub async fn find_where(&self, model_id: &str, filter: &Filter) -> Result<Vec<Document>> {
        let mut docs = self.find_all(model_id).await?;
        docs.retain(|doc| filter.matches(doc));
        Ok(docs)
    }

    /// Resolve relation `paths` on `doc` and cache the related documents.
    ///
    /// Uses the configured defaults when `options` is `None`.
    ///
    /// # Errors
    ///
    /// See [`RelationResolver::populate`].
    pub async fn populate(
        &self,
        doc: &mut Document,
        paths: &[&str],
        options: Option<PopulateOptions>,
    ) -> Result<()> {
        let options = options.unwrap_or(self.inner.settings.populate);
        RelationResolver::new(&self.inner.registry, self, options)
            .populate(doc, paths)
            .await
    }

    /// Look up the model stored in a pointer's collection and load it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if no model maps the collection.
    pub async fn load_pointer(&self, pointer: &DocRef) -> Result<Option<Document>> {
        let model = self
            .inner
            .registry
            .by_collection(&pointer.collection)
            .ok_or_else(|| Error::UnknownModel {
                model: pointer.collection.clone(),
            })?;
        self.load_model(&model, &pointer.id).await
    }

    async fn storage<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = std::result::Result<T, StorageError>>,
    ) -> Result<T> {
        let after = self.inner.settings.storage_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                log::warn!("Storage {operation} timed out after {after:?}");
                Err(StorageError::Timeout { operation, after }.into())
            }
        }
    }
}

/// Validate `doc`, moving the write to `Invalid` when it fails.
fn checked(doc: &Document, tracker: &mut WriteTracker<'_>) -> Result<Document> {
    match validate_document(doc) {
        ValidationResult::Valid(normalized) => Ok(normalized),
        ValidationResult::Invalid(violations) => {
            tracker.advance(WriteState::Invalid);
            Err(ValidationError {
                model: doc.model_id().to_string(),
                violations,
            }
            .into())
        }
    }
}

#[async_trait]
impl Loader for Odm {
    async fn fetch(
        &self,
        model: &Arc<ModelDescriptor>,
        pointer: &DocRef,
    ) -> Result<Option<Document>> {
        self.load_model(model, &pointer.id).await
    }
}

/// Convenience for building patches: `patch([("name", "Ann".into())])`.
pub fn patch<K, I>(entries: I) -> Fields
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fireodm_core::FieldDescriptor;
    use serde_json::json;

    fn odm() -> Odm {
        let mut registry = SchemaRegistry::new();
        registry
            .register_model(
                ModelDescriptor::builder("User")
                    .collection("users")
                    .field(FieldDescriptor::string("name").required())
                    .field(FieldDescriptor::integer("visits").with_default(0))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Odm::builder(registry).build().unwrap()
    }

    #[tokio::test]
    async fn test_save_assigns_id_and_normalizes() {
        let odm = odm();
        let mut doc = odm.create_from_json("User", &json!({"name": "Ann"})).unwrap();
        odm.save(&mut doc).await.unwrap();

        assert!(doc.is_persisted());
        assert!(Uuid::parse_str(doc.id().unwrap()).is_ok());
        assert_eq!(doc.get("visits"), Some(&Value::Integer(0)));
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_document_untouched() {
        let odm = odm();
        let mut doc = odm.create("User").unwrap();
        let err = odm.save(&mut doc).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(doc.id().is_none());
        assert!(!doc.is_persisted());
        assert!(odm.find_all("User").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let odm = odm();
        let mut doc = odm.create("User").unwrap().with("name", "Ann");
        odm.save(&mut doc).await.unwrap();

        odm.update(&mut doc, patch([("visits", Value::Integer(3))]))
            .await
            .unwrap();
        let stored = odm.get("User", doc.id().unwrap()).await.unwrap();
        assert_eq!(stored.get("visits"), Some(&Value::Integer(3)));

        let err = odm
            .update(&mut doc, patch([("name", Value::Null)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(doc.get("name"), Some(&Value::from("Ann")));
    }

    #[tokio::test]
    async fn test_unknown_hook_model_fails_build() {
        let err = Odm::builder(SchemaRegistry::new())
            .after("Ghost", Operation::Save, "audit", |_| Ok(()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModel { model } if model == "Ghost"));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let odm = odm();
        assert!(odm.load("User", "nope").await.unwrap().is_none());
        assert!(matches!(
            odm.get("User", "nope").await,
            Err(Error::NotFound { .. })
        ));
        assert!(!odm.delete_by_id("User", "nope").await.unwrap());
    }

    #[test]
    fn test_write_tracker_rejects_once() {
        let mut tracker = WriteTracker::new("User");
        tracker.advance(WriteState::Validating);
        tracker.advance(WriteState::Invalid);
        tracker.reject();
        tracker.reject();
        assert_eq!(tracker.state, WriteState::Rejected);
    }
}
