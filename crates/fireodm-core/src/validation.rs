//! Structural validation run before every write.
//!
//! Validation walks every declared field and collects *all* violations
//! instead of stopping at the first one. For each field:
//!
//! 1. an absent or null value takes the field default, if any; otherwise a
//!    required field yields [`ViolationKind::Required`];
//! 2. the value is type-checked and normalized (pointer-token strings
//!    become references, integral numbers become integers, RFC 3339 strings
//!    become timestamps);
//! 3. the field rules, including custom predicates, run on the normalized
//!    value.
//!
//! Model rules run last, and only when every field passed. Validation is
//! pure: it reads the input and returns a new normalized field set.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::document::Document;
use crate::schema::{Cardinality, FieldDescriptor, FieldKind, ModelDescriptor};
use crate::value::{DocRef, Fields, Value};

/// A single field-level problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Dotted path of the offending field (`address.city`, `tags[2]`).
    pub path: String,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    Required,
    TypeMismatch {
        expected: String,
        found: &'static str,
    },
    Rule {
        rule: String,
        message: String,
    },
    UnknownField,
}

impl Violation {
    pub fn new(path: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// A violation reported by a custom or model rule.
    pub fn rule(
        path: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            path,
            ViolationKind::Rule {
                rule: rule.into(),
                message: message.into(),
            },
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() {
            "<document>"
        } else {
            &self.path
        };
        match &self.kind {
            ViolationKind::Required => write!(f, "{path}: is required"),
            ViolationKind::TypeMismatch { expected, found } => {
                write!(f, "{path}: expected {expected}, found {found}")
            }
            ViolationKind::Rule { rule, message } => write!(f, "{path}: {message} ({rule})"),
            ViolationKind::UnknownField => write!(f, "{path}: unknown field"),
        }
    }
}

/// Every violation found while validating one document.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed for {model}: {}", join_violations(.violations))]
pub struct ValidationError {
    pub model: String,
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of validation: a normalized document or the list of violations.
#[derive(Debug, Clone)]
pub enum ValidationResult {
    Valid(Document),
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Valid(_) => &[],
            Self::Invalid(violations) => violations,
        }
    }

    /// Convert into a `Result`, wrapping violations in a [`ValidationError`].
    ///
    /// # Errors
    ///
    /// Returns the violations if the document was invalid.
    pub fn into_result(self, model: &str) -> Result<Document, ValidationError> {
        match self {
            Self::Valid(doc) => Ok(doc),
            Self::Invalid(violations) => Err(ValidationError {
                model: model.to_string(),
                violations,
            }),
        }
    }
}

/// Validate raw field values against a model.
pub fn validate(model: &Arc<ModelDescriptor>, raw: &Fields) -> ValidationResult {
    match normalize(model, raw) {
        Ok(fields) => ValidationResult::Valid(Document::new(Arc::clone(model)).with_fields(fields)),
        Err(violations) => ValidationResult::Invalid(violations),
    }
}

/// Validate an untyped JSON object against a model.
pub fn validate_json(model: &Arc<ModelDescriptor>, raw: &JsonValue) -> ValidationResult {
    match Value::from_json(raw) {
        Value::Object(fields) => validate(model, &fields),
        other => ValidationResult::Invalid(vec![Violation::new(
            "",
            ViolationKind::TypeMismatch {
                expected: "object".to_string(),
                found: other.kind_name(),
            },
        )]),
    }
}

/// Validate a document instance, carrying its id into the normalized copy.
pub fn validate_document(doc: &Document) -> ValidationResult {
    match validate(doc.model(), doc.fields()) {
        ValidationResult::Valid(mut normalized) => {
            if let Some(id) = doc.id() {
                normalized.set_id(id);
            }
            normalized.set_persisted(doc.is_persisted());
            ValidationResult::Valid(normalized)
        }
        invalid @ ValidationResult::Invalid(_) => invalid,
    }
}

fn normalize(model: &ModelDescriptor, raw: &Fields) -> Result<Fields, Vec<Violation>> {
    let mut violations = Vec::new();
    let fields = check_fields(model.fields(), raw, "", model.is_strict(), &mut violations);

    if violations.is_empty() {
        for rule in model.rules() {
            violations.extend(rule.check(&fields));
        }
    }

    if violations.is_empty() {
        Ok(fields)
    } else {
        Err(violations)
    }
}

fn check_fields(
    declared: &[FieldDescriptor],
    raw: &Fields,
    prefix: &str,
    strict: bool,
    out: &mut Vec<Violation>,
) -> Fields {
    let mut normalized = Fields::new();

    for field in declared {
        let path = format!("{prefix}{}", field.name());
        if let Some(value) = check_field(field, raw.get(field.name()), &path, strict, out) {
            normalized.insert(field.name().to_string(), value);
        }
    }

    for key in raw.keys() {
        if !declared.iter().any(|f| f.name() == key) {
            if strict {
                out.push(Violation::new(
                    format!("{prefix}{key}"),
                    ViolationKind::UnknownField,
                ));
            } else {
                log::trace!("Dropping undeclared field {prefix}{key}");
            }
        }
    }

    normalized
}

fn check_field(
    field: &FieldDescriptor,
    value: Option<&Value>,
    path: &str,
    strict: bool,
    out: &mut Vec<Violation>,
) -> Option<Value> {
    let value = match value.filter(|v| !v.is_null()) {
        Some(value) => value,
        None => match field.default_value() {
            Some(default) => default,
            None => {
                if field.is_required() {
                    out.push(Violation::new(path, ViolationKind::Required));
                }
                return None;
            }
        },
    };

    let normalized = coerce(field.kind(), value, path, strict, out)?;

    for rule in field.rules() {
        if let Err(message) = rule.check(&normalized) {
            out.push(Violation::rule(path, rule.name(), message));
        }
    }

    Some(normalized)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn coerce(
    kind: &FieldKind,
    value: &Value,
    path: &str,
    strict: bool,
    out: &mut Vec<Violation>,
) -> Option<Value> {
    let coerced = match (kind, value) {
        (FieldKind::String, Value::String(_))
        | (FieldKind::Boolean, Value::Bool(_))
        | (FieldKind::Integer, Value::Integer(_))
        | (FieldKind::Timestamp, Value::Timestamp(_)) => Some(value.clone()),
        (FieldKind::Number, Value::Number(n)) if n.is_finite() => Some(value.clone()),
        (FieldKind::Number, Value::Integer(i)) => Some(Value::Number(*i as f64)),
        (FieldKind::Integer, Value::Number(n))
            if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 =>
        {
            Some(Value::Integer(*n as i64))
        }
        (FieldKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc))),
        (FieldKind::Reference(rel), _) => match rel.cardinality() {
            Cardinality::One => coerce_pointer(value),
            Cardinality::Many => {
                if let Value::Array(items) = value {
                    let mut pointers = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        match coerce_pointer(item) {
                            Some(pointer) => pointers.push(pointer),
                            None => out.push(mismatch(&format!("{path}[{i}]"), "reference", item)),
                        }
                    }
                    return Some(Value::Array(pointers));
                }
                None
            }
        },
        (FieldKind::Nested(declared), Value::Object(raw)) => {
            let nested = check_fields(declared, raw, &format!("{path}."), strict, out);
            return Some(Value::Object(nested));
        }
        (FieldKind::Array(item_kind), Value::Array(items)) => {
            let mut normalized = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                if item.is_null() {
                    out.push(mismatch(&item_path, item_kind.name(), item));
                } else if let Some(v) = coerce(item_kind, item, &item_path, strict, out) {
                    normalized.push(v);
                }
            }
            return Some(Value::Array(normalized));
        }
        _ => None,
    };

    if coerced.is_none() {
        out.push(mismatch(path, kind.name(), value));
    }
    coerced
}

fn coerce_pointer(value: &Value) -> Option<Value> {
    match value {
        Value::Reference(_) => Some(value.clone()),
        Value::String(s) => s.parse::<DocRef>().ok().map(Value::Reference),
        _ => None,
    }
}

fn mismatch(path: &str, expected: &str, found: &Value) -> Violation {
    Violation::new(
        path,
        ViolationKind::TypeMismatch {
            expected: expected.to_string(),
            found: found.kind_name(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Rule;
    use serde_json::json;

    fn user_model() -> Arc<ModelDescriptor> {
        Arc::new(
            ModelDescriptor::builder("User")
                .collection("users")
                .field(FieldDescriptor::string("name").required())
                .field(FieldDescriptor::reference("manager", "User"))
                .build()
                .unwrap(),
        )
    }

    fn signup_model() -> Arc<ModelDescriptor> {
        Arc::new(
            ModelDescriptor::builder("Signup")
                .field(FieldDescriptor::string("name").required())
                .field(FieldDescriptor::string("email").required().with_rule(Rule::Email))
                .field(
                    FieldDescriptor::integer("age")
                        .with_rule(Rule::Min(18.0))
                        .with_rule(Rule::custom("even", |v| match v {
                            Value::Integer(i) if i % 2 == 0 => Ok(()),
                            _ => Err("must be even".to_string()),
                        })),
                )
                .field(FieldDescriptor::string("plan").with_default("free"))
                .field(FieldDescriptor::nested(
                    "address",
                    vec![FieldDescriptor::string("city").required()],
                ))
                .field(FieldDescriptor::array("tags", FieldKind::String).with_rule(Rule::MaxItems(2)))
                .field(FieldDescriptor::timestamp("born"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_user_example() {
        let model = user_model();

        let ok = validate_json(&model, &json!({"name": "Ann"}));
        assert!(ok.is_valid());

        let missing = validate_json(&model, &json!({}));
        assert_eq!(
            missing.violations(),
            &[Violation::new("name", ViolationKind::Required)]
        );
    }

    #[test]
    fn test_reference_string_is_normalized() {
        let model = user_model();
        let result = validate_json(&model, &json!({"name": "Bob", "manager": "users/42"}));
        let ValidationResult::Valid(doc) = result else {
            panic!("expected a valid document");
        };
        assert_eq!(
            doc.get("manager"),
            Some(&Value::Reference(DocRef::new("users", "42")))
        );
    }

    #[test]
    fn test_all_violations_are_collected() {
        let model = signup_model();
        let result = validate_json(
            &model,
            &json!({
                "email": "not-an-email",
                "age": 15,
                "address": {},
                "tags": ["a", "b", "c"],
            }),
        );
        let paths: Vec<&str> = result.violations().iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["name", "email", "age", "age", "address.city", "tags"]
        );
    }

    #[test]
    fn test_missing_required_yields_exactly_one_violation() {
        let model = signup_model();
        let result = validate_json(&model, &json!({"email": "a@b.co", "age": "x"}));
        let name_violations: Vec<&Violation> = result
            .violations()
            .iter()
            .filter(|v| v.path == "name")
            .collect();
        assert_eq!(name_violations.len(), 1);
        // The independent type error on `age` is still reported.
        assert!(result
            .violations()
            .iter()
            .any(|v| v.path == "age" && matches!(v.kind, ViolationKind::TypeMismatch { .. })));
    }

    #[test]
    fn test_custom_rule_runs_after_type_check() {
        let model = signup_model();
        let result = validate_json(&model, &json!({"name": "A", "email": "a@b.co", "age": 21}));
        assert_eq!(
            result.violations(),
            &[Violation::rule("age", "even", "must be even")]
        );
    }

    #[test]
    fn test_defaults_and_normalization() {
        let model = signup_model();
        let result = validate_json(
            &model,
            &json!({
                "name": "A",
                "email": "a@b.co",
                "age": 20.0,
                "born": "1990-01-01T00:00:00Z",
            }),
        );
        let ValidationResult::Valid(doc) = result else {
            panic!("expected a valid document");
        };
        assert_eq!(doc.get("plan"), Some(&Value::from("free")));
        assert_eq!(doc.get("age"), Some(&Value::Integer(20)));
        assert!(matches!(doc.get("born"), Some(Value::Timestamp(_))));
    }

    #[test]
    fn test_unknown_fields_dropped_unless_strict() {
        let lenient = user_model();
        let ValidationResult::Valid(doc) = validate_json(&lenient, &json!({"name": "A", "x": 1}))
        else {
            panic!("expected a valid document");
        };
        assert!(doc.get("x").is_none());

        let strict = Arc::new(
            ModelDescriptor::builder("Strict")
                .field(FieldDescriptor::string("name"))
                .strict()
                .build()
                .unwrap(),
        );
        let result = validate_json(&strict, &json!({"name": "A", "x": 1}));
        assert_eq!(
            result.violations(),
            &[Violation::new("x", ViolationKind::UnknownField)]
        );
    }

    #[test]
    fn test_model_rules_run_only_when_fields_pass() {
        let model = Arc::new(
            ModelDescriptor::builder("Range")
                .field(FieldDescriptor::integer("from").required())
                .field(FieldDescriptor::integer("to").required())
                .rule("ordered", |fields| {
                    match (fields.get("from"), fields.get("to")) {
                        (Some(Value::Integer(a)), Some(Value::Integer(b))) if a > b => {
                            vec![Violation::rule("to", "ordered", "must not precede `from`")]
                        }
                        _ => Vec::new(),
                    }
                })
                .build()
                .unwrap(),
        );

        let result = validate_json(&model, &json!({"from": 5, "to": 1}));
        assert_eq!(result.violations().len(), 1);
        assert_eq!(result.violations()[0].path, "to");

        let result = validate_json(&model, &json!({"from": 5}));
        assert_eq!(
            result.violations(),
            &[Violation::new("to", ViolationKind::Required)]
        );
    }

    #[test]
    fn test_validation_does_not_mutate_input() {
        let model = user_model();
        let raw = Fields::from([
            ("name".to_string(), Value::from("Ann")),
            ("manager".to_string(), Value::from("users/1")),
        ]);
        let before = raw.clone();
        let _ = validate(&model, &raw);
        assert_eq!(raw, before);
    }

    #[test]
    fn test_validate_document_keeps_id() {
        let model = user_model();
        let doc = Document::new(model).with_id("u1").with("name", "Ann");
        let ValidationResult::Valid(normalized) = validate_document(&doc) else {
            panic!("expected a valid document");
        };
        assert_eq!(normalized.id(), Some("u1"));
    }

    #[test]
    fn test_non_object_input() {
        let model = user_model();
        let result = validate_json(&model, &json!("Ann"));
        assert_eq!(result.violations()[0].path, "");
        assert_eq!(
            result.violations()[0].to_string(),
            "<document>: expected object, found string"
        );
    }

    #[test]
    fn test_validation_error_lists_every_violation() {
        let err = ValidationError {
            model: "User".to_string(),
            violations: vec![
                Violation::new("name", ViolationKind::Required),
                Violation::new("x", ViolationKind::UnknownField),
            ],
        };
        assert_eq!(
            err.to_string(),
            "validation failed for User: name: is required; x: unknown field"
        );
    }
}
