//! Ordered primary-key table shared by the sinks.

use std::collections::HashMap;

use pagesync_types::record::{key_from_json, TypedRow};
use pagesync_types::schema::Resource;
use serde_json::Value;

/// Rows in first-insertion order, unique by primary key.
#[derive(Debug, Default, Clone)]
pub(crate) struct Table {
    keys: Vec<String>,
    rows: HashMap<String, Value>,
}

impl Table {
    /// Rebuild a table from stored rows, re-keyed by `resource`'s primary key.
    pub(crate) fn from_rows(resource: &Resource, rows: impl IntoIterator<Item = Value>) -> Self {
        let pk = resource.schema.primary_key();
        let mut table = Self::default();
        for row in rows {
            let key = match &row {
                Value::Object(map) => key_from_json(map, &pk),
                _ => continue,
            };
            table.insert(key, row);
        }
        table
    }

    /// Upsert every row; a key already present keeps its position.
    pub(crate) fn upsert(&mut self, resource: &Resource, batch: &[TypedRow]) {
        let pk = resource.schema.primary_key();
        for row in batch {
            self.insert(row.key(&pk), row.to_json());
        }
    }

    fn insert(&mut self, key: String, row: Value) {
        if self.rows.insert(key.clone(), row).is_none() {
            self.keys.push(key);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &Value> {
        self.keys.iter().filter_map(|key| self.rows.get(key))
    }
}
