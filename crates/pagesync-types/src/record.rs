//! Raw upstream records and schema-validated typed rows.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Untyped string-keyed mapping produced by a page source. Transient.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// A single coerced field value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl TypedValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON representation written to sinks. Timestamps render as RFC 3339
    /// UTC with a `Z` suffix.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }

    /// String form used for cursor tracking. `None` for nulls and booleans.
    #[must_use]
    pub fn cursor_repr(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Null | Self::Boolean(_) => None,
        }
    }
}

impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// A record validated and coerced against a resource schema.
///
/// Values are kept in schema declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedRow {
    values: Vec<(String, TypedValue)>,
}

impl TypedRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: TypedValue) {
        self.values.push((name.into(), value));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Canonical primary-key string for upsert / deduplication.
    #[must_use]
    pub fn key(&self, primary_key: &[&str]) -> String {
        let parts: Vec<serde_json::Value> = primary_key
            .iter()
            .map(|col| self.get(col).map_or(serde_json::Value::Null, TypedValue::to_json))
            .collect();
        serde_json::Value::Array(parts).to_string()
    }

    /// Object form written to sinks.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Serialize for TypedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Canonical primary-key string for a row already stored as JSON.
///
/// Produces the same string as [`TypedRow::key`] for a row written via
/// [`TypedRow::to_json`].
#[must_use]
pub fn key_from_json(row: &serde_json::Map<String, serde_json::Value>, primary_key: &[&str]) -> String {
    let parts: Vec<serde_json::Value> = primary_key
        .iter()
        .map(|col| row.get(*col).cloned().unwrap_or(serde_json::Value::Null))
        .collect();
    serde_json::Value::Array(parts).to_string()
}

/// Why a raw record was excluded from emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// `MISSING_REQUIRED_FIELD` or `TYPE_MISMATCH`.
    pub code: String,
    pub field: String,
    pub message: String,
    pub record: RawRecord,
}

/// Validation outcome of mapping one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedRow {
    Accepted(TypedRow),
    Rejected(Rejection),
}

impl MappedRow {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> TypedRow {
        let mut row = TypedRow::new();
        row.push("user_id", TypedValue::String("u1".into()));
        row.push("age", TypedValue::Integer(31));
        row.push(
            "created_at",
            TypedValue::Timestamp(Utc.with_ymd_and_hms(2023, 1, 16, 8, 0, 0).unwrap()),
        );
        row.push("nickname", TypedValue::Null);
        row
    }

    #[test]
    fn serializes_in_declaration_order() {
        let json = serde_json::to_string(&row()).unwrap();
        assert_eq!(
            json,
            r#"{"user_id":"u1","age":31,"created_at":"2023-01-16T08:00:00Z","nickname":null}"#
        );
    }

    #[test]
    fn key_matches_json_form() {
        let row = row();
        let json = row.to_json();
        let obj = json.as_object().unwrap();
        assert_eq!(row.key(&["user_id"]), key_from_json(obj, &["user_id"]));
        assert_eq!(row.key(&["user_id", "age"]), r#"["u1",31]"#);
    }

    #[test]
    fn cursor_repr_skips_null_and_boolean() {
        assert_eq!(TypedValue::Null.cursor_repr(), None);
        assert_eq!(TypedValue::Boolean(true).cursor_repr(), None);
        assert_eq!(TypedValue::Integer(7).cursor_repr(), Some("7".into()));
        assert_eq!(
            row().get("created_at").unwrap().cursor_repr(),
            Some("2023-01-16T08:00:00Z".into())
        );
    }

    #[test]
    fn non_finite_float_serializes_as_null() {
        assert_eq!(TypedValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
