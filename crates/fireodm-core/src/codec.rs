//! Field codec: conversion between in-memory [`Value`]s and their storage
//! representation (JSON).
//!
//! Dispatch is by field capability:
//!
//! - scalars map to JSON scalars, timestamps to RFC 3339 strings;
//! - references map to their pointer token string (`collection/id`), never
//!   to an embedded copy of the related document;
//! - nested fields map to JSON objects, encoded field by field;
//! - arrays map to JSON arrays of the encoded item type.
//!
//! Every failure is a [`CodecError`] naming the field path and the expected
//! type, so the caller can skip the field, fall back to its default, or
//! abort the document.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::CodecError;
use crate::schema::{Capability, Cardinality, FieldDescriptor, FieldKind, ModelDescriptor};
use crate::value::{DocRef, Fields, Value};

/// What to do when a stored field fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnCodecError {
    /// Fail the whole document.
    #[default]
    Abort,
    /// Leave the field out of the decoded document.
    SkipField,
    /// Use the field default, or leave the field out if it has none.
    UseDefault,
}

/// Encode one field value for storage.
///
/// # Errors
///
/// Returns a [`CodecError`] if the value does not match the field type.
pub fn encode(field: &FieldDescriptor, value: &Value) -> Result<JsonValue, CodecError> {
    encode_kind(field.name(), field.kind(), value)
}

/// Decode one stored field value.
///
/// # Errors
///
/// Returns a [`CodecError`] if the stored value is of the wrong type or out
/// of range for the field.
pub fn decode(field: &FieldDescriptor, stored: &JsonValue) -> Result<Value, CodecError> {
    decode_kind(field.name(), field.kind(), stored)
}

/// Encode every declared field present in `fields` into a JSON object.
/// Fields the model does not declare are not written.
///
/// # Errors
///
/// Returns the first [`CodecError`] encountered.
pub fn encode_document(model: &ModelDescriptor, fields: &Fields) -> Result<JsonValue, CodecError> {
    encode_fields(model.fields(), fields, "").map(JsonValue::Object)
}

/// Decode a stored JSON object into field values.
///
/// Stored keys the model does not declare are ignored.
///
/// # Errors
///
/// Returns a [`CodecError`] if the record is not an object, or if a field
/// fails to decode under [`OnCodecError::Abort`].
pub fn decode_document(
    model: &ModelDescriptor,
    stored: &JsonValue,
    on_error: OnCodecError,
) -> Result<Fields, CodecError> {
    let object = stored
        .as_object()
        .ok_or_else(|| CodecError::new(model.id(), "object", json_kind(stored)))?;

    let mut fields = Fields::new();
    for field in model.fields() {
        let Some(raw) = object.get(field.name()) else {
            continue;
        };
        match decode(field, raw) {
            Ok(value) => {
                fields.insert(field.name().to_string(), value);
            }
            Err(err) => match on_error {
                OnCodecError::Abort => return Err(err),
                OnCodecError::SkipField => {
                    log::warn!("Skipping undecodable field on {}: {}", model.id(), err);
                }
                OnCodecError::UseDefault => {
                    log::warn!("Using default for undecodable field on {}: {}", model.id(), err);
                    if let Some(default) = field.default_value() {
                        fields.insert(field.name().to_string(), default.clone());
                    }
                }
            },
        }
    }

    for key in object.keys() {
        if model.field(key).is_none() {
            log::trace!("Ignoring undeclared stored field {}.{}", model.id(), key);
        }
    }

    Ok(fields)
}

fn encode_fields(
    declared: &[FieldDescriptor],
    fields: &Fields,
    prefix: &str,
) -> Result<Map<String, JsonValue>, CodecError> {
    let mut object = Map::new();
    for field in declared {
        if let Some(value) = fields.get(field.name()) {
            let path = format!("{prefix}{}", field.name());
            object.insert(
                field.name().to_string(),
                encode_kind(&path, field.kind(), value)?,
            );
        }
    }
    Ok(object)
}

fn encode_kind(path: &str, kind: &FieldKind, value: &Value) -> Result<JsonValue, CodecError> {
    if value.is_null() {
        return Ok(JsonValue::Null);
    }
    let mismatch = || CodecError::new(path, kind.name(), value.kind_name());

    match kind.capability() {
        Capability::Scalar => match (kind, value) {
            (FieldKind::String, Value::String(s)) => Ok(JsonValue::String(s.clone())),
            (FieldKind::Boolean, Value::Bool(b)) => Ok(JsonValue::Bool(*b)),
            (FieldKind::Integer, Value::Integer(i)) => Ok(JsonValue::from(*i)),
            (FieldKind::Number, Value::Integer(i)) => Ok(JsonValue::from(*i)),
            (FieldKind::Number, Value::Number(n)) => Number::from_f64(*n)
                .map(JsonValue::Number)
                .ok_or_else(|| CodecError::new(path, "finite number", n)),
            (FieldKind::Timestamp, Value::Timestamp(ts)) => Ok(JsonValue::String(
                ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
            _ => Err(mismatch()),
        },
        Capability::Reference => match (kind, value) {
            (FieldKind::Reference(rel), Value::Array(items))
                if rel.cardinality() == Cardinality::Many =>
            {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| encode_pointer(&format!("{path}[{i}]"), item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(JsonValue::Array)
            }
            (FieldKind::Reference(rel), item) if rel.cardinality() == Cardinality::One => {
                encode_pointer(path, item)
            }
            _ => Err(mismatch()),
        },
        Capability::Nested => match (kind, value) {
            (FieldKind::Nested(declared), Value::Object(fields)) => {
                encode_fields(declared, fields, &format!("{path}.")).map(JsonValue::Object)
            }
            _ => Err(mismatch()),
        },
        Capability::Array => match (kind, value) {
            (FieldKind::Array(item_kind), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{path}[{i}]");
                    if item.is_null() {
                        return Err(CodecError::new(item_path, item_kind.name(), "null"));
                    }
                    encode_kind(&item_path, item_kind, item)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            _ => Err(mismatch()),
        },
    }
}

fn encode_pointer(path: &str, value: &Value) -> Result<JsonValue, CodecError> {
    match value {
        Value::Reference(r) => Ok(JsonValue::String(r.to_string())),
        Value::String(s) => s
            .parse::<DocRef>()
            .map(|r| JsonValue::String(r.to_string()))
            .map_err(|_| CodecError::new(path, "pointer token", format!("string `{s}`"))),
        other => Err(CodecError::new(path, "reference", other.kind_name())),
    }
}

fn decode_kind(path: &str, kind: &FieldKind, stored: &JsonValue) -> Result<Value, CodecError> {
    if stored.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || CodecError::new(path, kind.name(), json_kind(stored));

    match kind.capability() {
        Capability::Scalar => match (kind, stored) {
            (FieldKind::String, JsonValue::String(s)) => Ok(Value::String(s.clone())),
            (FieldKind::Boolean, JsonValue::Bool(b)) => Ok(Value::Bool(*b)),
            (FieldKind::Integer, JsonValue::Number(n)) => n.as_i64().map(Value::Integer).ok_or_else(|| {
                CodecError::new(path, "integer in i64 range", n)
            }),
            (FieldKind::Number, JsonValue::Number(n)) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| CodecError::new(path, "number", n)),
            (FieldKind::Timestamp, JsonValue::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|_| CodecError::new(path, "RFC 3339 timestamp", format!("string `{s}`"))),
            _ => Err(mismatch()),
        },
        Capability::Reference => match (kind, stored) {
            (FieldKind::Reference(rel), JsonValue::Array(items))
                if rel.cardinality() == Cardinality::Many =>
            {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| decode_pointer(&format!("{path}[{i}]"), item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            (FieldKind::Reference(rel), item) if rel.cardinality() == Cardinality::One => {
                decode_pointer(path, item)
            }
            _ => Err(mismatch()),
        },
        Capability::Nested => match (kind, stored) {
            (FieldKind::Nested(declared), JsonValue::Object(object)) => {
                let mut fields = Fields::new();
                for field in declared {
                    if let Some(raw) = object.get(field.name()) {
                        let sub_path = format!("{path}.{}", field.name());
                        fields.insert(
                            field.name().to_string(),
                            decode_kind(&sub_path, field.kind(), raw)?,
                        );
                    }
                }
                Ok(Value::Object(fields))
            }
            _ => Err(mismatch()),
        },
        Capability::Array => match (kind, stored) {
            (FieldKind::Array(item_kind), JsonValue::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| decode_kind(&format!("{path}[{i}]"), item_kind, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(mismatch()),
        },
    }
}

fn decode_pointer(path: &str, stored: &JsonValue) -> Result<Value, CodecError> {
    match stored {
        JsonValue::String(s) => s
            .parse::<DocRef>()
            .map(Value::Reference)
            .map_err(|_| CodecError::new(path, "pointer token", format!("string `{s}`"))),
        other => Err(CodecError::new(path, "pointer token", json_kind(other))),
    }
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
