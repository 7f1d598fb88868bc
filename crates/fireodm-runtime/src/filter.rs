use fireodm_core::{Document, Error, Result, Value};

/// Conjunction of equality conditions over decoded document fields.
///
/// Field names may be dotted to reach into nested objects
/// (`address.city`). Comparison uses [`Value::loosely_eq`], so a pointer
/// token string matches a stored reference.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Add a condition written as `field=value`. The value is read as JSON
    /// when it parses, and as a plain string otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `expr` has no `=` or an empty field.
    pub fn condition(self, expr: &str) -> Result<Self> {
        let (field, raw) = expr
            .split_once('=')
            .filter(|(field, _)| !field.trim().is_empty())
            .ok_or_else(|| {
                Error::InvalidData(format!("`{expr}` is not a condition (expected field=value)"))
            })?;
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map_or_else(|_| Value::from(raw), |json| Value::from_json(&json));
        Ok(self.eq(field.trim(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| lookup(doc, field).is_some_and(|v| v.loosely_eq(expected)))
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        match current {
            Value::Object(fields) => current = fields.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}
