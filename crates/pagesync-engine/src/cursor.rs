//! Cursor comparison and max-value tracking for incremental runs.
//!
//! `CursorTracker` decides which rows are newer than the run's starting
//! cursor and remembers the largest cursor value it accepted.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use pagesync_types::record::{TypedRow, TypedValue};

use crate::mapper::parse_timestamp;

/// Comparable form of a cursor value.
#[derive(Debug, Clone, PartialEq)]
enum Key {
    Time(DateTime<Utc>),
    Number(f64),
    Text(String),
}

impl Key {
    fn parse(raw: &str) -> Self {
        if let Some(ts) = parse_rfc3339_like(raw) {
            return Self::Time(ts);
        }
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(raw.to_string()),
        }
    }

    fn from_typed(value: &TypedValue) -> Option<Self> {
        match value {
            TypedValue::Timestamp(ts) => Some(Self::Time(*ts)),
            #[allow(clippy::cast_precision_loss)]
            TypedValue::Integer(i) => Some(Self::Number(*i as f64)),
            TypedValue::Float(f) => Some(Self::Number(*f)),
            TypedValue::String(s) => Some(Self::parse(s)),
            TypedValue::Null | TypedValue::Boolean(_) => None,
        }
    }
}

/// Timestamps only; bare numbers stay numbers.
fn parse_rfc3339_like(raw: &str) -> Option<DateTime<Utc>> {
    if raw.contains('-') && !raw.trim_start().starts_with('-') {
        parse_timestamp(raw)
    } else {
        None
    }
}

fn compare_keys(a: &Key, b: &Key) -> Ordering {
    match (a, b) {
        (Key::Time(x), Key::Time(y)) => x.cmp(y),
        (Key::Number(x), Key::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        _ => key_text(a).cmp(&key_text(b)),
    }
}

fn key_text(key: &Key) -> String {
    match key {
        Key::Time(ts) => ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
        Key::Number(n) => n.to_string(),
        Key::Text(s) => s.clone(),
    }
}

/// Order two cursor strings: as timestamps when both parse as one, else
/// as numbers, else lexicographically.
#[must_use]
pub fn compare_cursors(a: &str, b: &str) -> Ordering {
    compare_keys(&Key::parse(a), &Key::parse(b))
}

/// Filters rows against a starting cursor and tracks the maximum seen.
#[derive(Debug, Clone)]
pub struct CursorTracker {
    cursor_field: String,
    start: Option<Key>,
    max: Option<(Key, String)>,
}

impl CursorTracker {
    /// Track `cursor_field`, skipping rows at or before `start`.
    #[must_use]
    pub fn new(cursor_field: impl Into<String>, start: Option<&str>) -> Self {
        Self {
            cursor_field: cursor_field.into(),
            start: start.map(Key::parse),
            max: None,
        }
    }

    /// Seed the maximum with the high-water mark a resumed run had
    /// already emitted before it was interrupted.
    #[must_use]
    pub fn with_high_water(mut self, high_water: Option<&str>) -> Self {
        self.max = high_water.map(|raw| (Key::parse(raw), raw.to_string()));
        self
    }

    #[must_use]
    pub fn cursor_field(&self) -> &str {
        &self.cursor_field
    }

    /// `false` when the row's cursor is at or before the starting cursor.
    /// Rows with a null cursor are always kept.
    #[must_use]
    pub fn is_new(&self, row: &TypedRow) -> bool {
        let (Some(start), Some(key)) = (
            &self.start,
            row.get(&self.cursor_field).and_then(Key::from_typed),
        ) else {
            return true;
        };
        compare_keys(&key, start) == Ordering::Greater
    }

    /// Record the row's cursor value. Updates max if larger.
    pub fn observe(&mut self, row: &TypedRow) {
        let Some(value) = row.get(&self.cursor_field) else {
            return;
        };
        let (Some(key), Some(repr)) = (Key::from_typed(value), value.cursor_repr()) else {
            return;
        };
        match &self.max {
            Some((current, _)) if compare_keys(&key, current) != Ordering::Greater => {}
            _ => self.max = Some((key, repr)),
        }
    }

    /// Largest observed cursor value, rendered for storage.
    #[must_use]
    pub fn high_water(&self) -> Option<&str> {
        self.max.as_ref().map(|(_, repr)| repr.as_str())
    }
}
