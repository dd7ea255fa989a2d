//! Record Mapper: schema-driven coercion of raw records into typed rows.
//!
//! Per field:
//! - present and of the declared type: kept
//! - present with another type: coerced when lossless (numeric string to
//!   number, integral float to integer, epoch seconds to timestamp, ...),
//!   otherwise the row is rejected with `TYPE_MISMATCH`
//! - absent or null and nullable: filled with null
//! - absent or null and required: row rejected with `MISSING_REQUIRED_FIELD`
//!
//! Fields the schema does not declare are dropped.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use pagesync_types::error::ConnectorError;
use pagesync_types::record::{MappedRow, RawRecord, Rejection, TypedRow, TypedValue};
use pagesync_types::schema::{FieldSchema, FieldType, Schema};
use serde_json::Value;

/// Integral floats beyond this magnitude lose precision as `i64`.
const MAX_SAFE_INTEGRAL_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Map one raw record against `schema`.
#[must_use]
pub fn map_record(raw: &RawRecord, schema: &Schema) -> MappedRow {
    let mut row = TypedRow::new();
    for field in &schema.fields {
        match map_field(raw.get(&field.name), field) {
            Ok(value) => row.push(field.name.clone(), value),
            Err(err) => {
                return MappedRow::Rejected(Rejection {
                    code: err.code,
                    field: field.name.clone(),
                    message: err.message,
                    record: raw.clone(),
                })
            }
        }
    }
    MappedRow::Accepted(row)
}

/// Outcome of mapping a whole page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedPage {
    /// Accepted rows in page order, one per primary key.
    pub rows: Vec<TypedRow>,
    pub rejections: Vec<Rejection>,
    /// Accepted rows before primary-key collapsing.
    pub accepted: usize,
}

/// Map every record of a page.
///
/// Rows sharing a primary key within the page collapse to the last one,
/// kept at the position of the first.
#[must_use]
pub fn map_page(records: &[RawRecord], schema: &Schema) -> MappedPage {
    let primary_key = schema.primary_key();
    let mut page = MappedPage::default();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for raw in records {
        match map_record(raw, schema) {
            MappedRow::Accepted(row) => {
                page.accepted += 1;
                let key = row.key(&primary_key);
                if let Some(&pos) = positions.get(&key) {
                    page.rows[pos] = row;
                } else {
                    positions.insert(key, page.rows.len());
                    page.rows.push(row);
                }
            }
            MappedRow::Rejected(rejection) => page.rejections.push(rejection),
        }
    }
    page
}

fn map_field(value: Option<&Value>, field: &FieldSchema) -> Result<TypedValue, ConnectorError> {
    match value {
        None | Some(Value::Null) if field.is_required() => {
            Err(ConnectorError::missing_required_field(&field.name))
        }
        None | Some(Value::Null) => Ok(TypedValue::Null),
        Some(v) => coerce(v, field.field_type)
            .ok_or_else(|| ConnectorError::type_mismatch(&field.name, mismatch_message(v, field.field_type))),
    }
}

fn mismatch_message(value: &Value, expected: FieldType) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    let mut shown = value.to_string();
    if shown.len() > 64 {
        let cut = (0..=61).rev().find(|&i| shown.is_char_boundary(i)).unwrap_or(0);
        shown.truncate(cut);
        shown.push_str("...");
    }
    format!("cannot coerce {kind} {shown} to {expected}")
}

/// Coerce a non-null JSON value to `ty`. `None` when no lossless
/// conversion exists.
#[must_use]
pub fn coerce(value: &Value, ty: FieldType) -> Option<TypedValue> {
    match ty {
        FieldType::String => coerce_string(value).map(TypedValue::String),
        FieldType::Integer => coerce_integer(value).map(TypedValue::Integer),
        FieldType::Float => coerce_float(value).map(TypedValue::Float),
        FieldType::Boolean => coerce_boolean(value).map(TypedValue::Boolean),
        FieldType::Timestamp => coerce_timestamp(value).map(TypedValue::Timestamp),
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn integral_float(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGRAL_FLOAT {
        #[allow(clippy::cast_possible_truncation)]
        let i = f as i64;
        Some(i)
    } else {
        None
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_float))
        }
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    f.is_finite().then_some(f)
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Some(true),
            "false" | "f" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| n.as_f64().and_then(epoch_seconds_f64)),
        _ => None,
    }
}

fn epoch_seconds_f64(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round();
    if millis.abs() > MAX_SAFE_INTEGRAL_FLOAT {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let millis = millis as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Parse a timestamp string: RFC 3339, naive date-time (taken as UTC),
/// bare date, or epoch seconds.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'.' || b == b'-') {
        if let Ok(secs) = s.parse::<f64>() {
            return epoch_seconds_f64(secs);
        }
    }
    None
}
