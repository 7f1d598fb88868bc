//! Storage driver interface.
//!
//! Drivers store opaque JSON bodies keyed by `(collection, id)`. They know
//! nothing about models, codecs or hooks; the runtime encodes documents
//! before handing them over and decodes what comes back.

mod memory;
mod migrations;
mod sqlite;

pub use memory::MemoryDriver;
pub use sqlite::SqliteDriver;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt::Debug;

use crate::error::StorageResult;

/// One stored document body.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub body: JsonValue,
}

/// An asynchronous document store.
///
/// Each call is independent; drivers must be safe to share across tasks.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Insert or overwrite the body stored at `collection/id`.
    async fn put(&self, collection: &str, id: &str, body: &JsonValue) -> StorageResult<()>;

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<JsonValue>>;

    /// Remove a document. Returns `false` if nothing was stored there.
    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool>;

    /// Every document in a collection, ordered by id.
    async fn list(&self, collection: &str) -> StorageResult<Vec<Record>>;
}
