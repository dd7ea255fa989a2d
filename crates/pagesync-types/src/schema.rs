//! Resource and schema declarations.
//!
//! A [`Resource`] is a named logical dataset. Its [`Schema`] is an ordered
//! list of [`FieldSchema`] entries. At least one field must be a primary
//! key, and primary-key fields are never nullable.

use serde::{Deserialize, Serialize};

use crate::wire::WriteMode;

/// Semantic type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl FieldType {
    /// Wire-format name used in discovery output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
        }
    }

    /// Whether values of this type have a meaningful ordering for cursors.
    #[must_use]
    pub fn is_orderable(self) -> bool {
        !matches!(self, Self::Boolean)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared field of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Explicitly marked REQUIRED. Primary-key fields are required
    /// regardless of this flag.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl FieldSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            primary_key: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// A row missing this field is rejected.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required || self.primary_key
    }

    #[must_use]
    pub fn is_nullable(&self) -> bool {
        !self.is_required()
    }
}

/// Ordered field list of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub resource: String,
    pub fields: Vec<FieldSchema>,
}

impl Schema {
    #[must_use]
    pub fn new(resource: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            resource: resource.into(),
            fields,
        }
    }

    /// Primary-key column names, in declaration order.
    #[must_use]
    pub fn primary_key(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .collect()
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check the structural invariants of the declaration.
    ///
    /// Returns every violation found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let resource = &self.resource;

        if resource.trim().is_empty() {
            errors.push("resource name must not be empty".to_string());
        }
        if self.fields.is_empty() {
            errors.push(format!("resource '{resource}' declares no fields"));
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                errors.push(format!("resource '{resource}' has a field with an empty name"));
            } else if !seen.insert(field.name.as_str()) {
                errors.push(format!(
                    "resource '{resource}' declares field '{}' more than once",
                    field.name
                ));
            }
        }

        if !self.fields.iter().any(|f| f.primary_key) {
            errors.push(format!(
                "resource '{resource}' must mark at least one field as primary key"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A named logical dataset with its schema and delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub schema: Schema,
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Field whose value orders records for incremental sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,
    /// Destination identifier (table / file stem). Defaults to the name.
    pub sink: String,
    /// Upstream endpoint path, when it differs from the resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Resource {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        let sink = schema.resource.clone();
        Self {
            schema,
            write_mode: WriteMode::default(),
            cursor_field: None,
            sink,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    #[must_use]
    pub fn with_cursor_field(mut self, field: impl Into<String>) -> Self {
        self.cursor_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: impl Into<String>) -> Self {
        self.sink = sink.into();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.resource
    }

    /// Upstream path segment for this resource.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(&self.schema.resource)
    }

    /// Validate the schema plus the resource-level settings.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = match self.schema.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };

        if let Some(cursor) = &self.cursor_field {
            match self.schema.field(cursor) {
                None => errors.push(format!(
                    "resource '{}' cursor_field '{cursor}' is not a declared field",
                    self.name()
                )),
                Some(field) if !field.field_type.is_orderable() => errors.push(format!(
                    "resource '{}' cursor_field '{cursor}' has unorderable type {}",
                    self.name(),
                    field.field_type
                )),
                Some(_) => {}
            }
        }

        if self.sink.trim().is_empty() {
            errors.push(format!("resource '{}' has an empty sink identifier", self.name()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
