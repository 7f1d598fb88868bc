use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::Phase;
use crate::validation::ValidationError;
use crate::value::DocRef;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model `{model}` is already registered")]
    DuplicateModel { model: String },

    #[error("unknown model `{model}`")]
    UnknownModel { model: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("dangling reference at `{path}` on {model}: {target} does not exist")]
    DanglingReference {
        model: String,
        path: String,
        target: DocRef,
    },

    #[error("{phase} hook `{hook}` on {model} aborted: {message}")]
    HookAbort {
        model: String,
        phase: Phase,
        hook: String,
        message: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid relation path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("{model} document has no id")]
    MissingId { model: String },

    #[error("not found: {model} with id {id}")]
    NotFound { model: String, id: String },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` for errors caused by the shape of the data rather than
    /// by the environment. These are never worth retrying.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::Validation(_) | Self::DanglingReference { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A stored or in-memory value did not match the declared field type.
///
/// Always recoverable: the caller may skip the field, fall back to the
/// field default, or abort the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}`: expected {expected}, found {found}")]
pub struct CodecError {
    pub field: String,
    pub expected: String,
    pub found: String,
}

impl CodecError {
    pub fn new(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl fmt::Display,
    ) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            found: found.to_string(),
        }
    }
}

/// Failures reported by a storage driver.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored body is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns `true` when the failure may clear up if the call is retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
