//! Core object-document mapping layer for fireodm.
//!
//! This crate defines model schemas (fields, relations, rules), the
//! process-wide schema registry, the field codec that maps in-memory values
//! to their storage representation, the validation engine run before every
//! write, and the storage driver interface with in-memory and SQLite
//! implementations.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod codec;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod schema;
pub mod storage;
pub mod validation;
pub mod value;

pub use document::{Document, Relation};
pub use error::{CodecError, Error, Result, StorageError};
pub use lifecycle::{Phase, WriteState};
pub use schema::{
    Cardinality, FieldDescriptor, FieldKind, ModelDescriptor, RelationDescriptor, Rule,
    SchemaRegistry,
};
pub use validation::{validate, ValidationError, ValidationResult, Violation};
pub use value::{DocRef, Fields, Value};
