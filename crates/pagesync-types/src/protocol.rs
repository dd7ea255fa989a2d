//! Request and response documents of the external protocol.
//!
//! One request produces one response. Both are JSON objects:
//!
//! - `{"action": "schema"}` → `{"schemas": [...]}`
//! - `{"action": "test", "secrets": {...}}` → `{"success": bool, "message": str?}`
//! - `{"action": "sync", "secrets": {...}, "state": {...}}` → `{"state": {...}, "runs": [...]}`
//!
//! The action may also be nested as `{"selection": {"action": ...}}`; a
//! request without an action is a sync.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::Rejection;
use crate::schema::Schema;
use crate::state::{RunStatus, SyncRun};
use crate::wire::Action;

/// Opaque per-resource state, keyed by resource name. Keys are kept
/// sorted so identical inputs serialize identically.
pub type StateDocument = BTreeMap<String, serde_json::Value>;

/// Errors decoding an incoming request document.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("request is empty")]
    EmptyInput,

    #[error("request is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request must be a JSON object")]
    NotAnObject,

    #[error("invalid request field '{field}': {message}")]
    InvalidField { field: &'static str, message: String },
}

/// Credentials supplied with a request. Values are never printed.
#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Secrets(BTreeMap<String, serde_json::Value>);

impl Secrets {
    #[must_use]
    pub fn new(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self(values)
    }

    /// String value of a secret; numbers are rendered as text.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get_str(key).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

/// A decoded request document.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub action: Action,
    pub secrets: Secrets,
    pub state: StateDocument,
}

impl Request {
    /// Decode a request document.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the input is empty, not JSON, not an
    /// object, or carries a field of the wrong shape.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        if input.trim().is_empty() {
            return Err(ProtocolError::EmptyInput);
        }
        let value: serde_json::Value = serde_json::from_str(input)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed request document.
    ///
    /// # Errors
    ///
    /// See [`Request::parse`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let serde_json::Value::Object(mut obj) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let action_value = obj.remove("action").or_else(|| {
            obj.get_mut("selection")
                .and_then(serde_json::Value::as_object_mut)
                .and_then(|selection| selection.remove("action"))
        });
        let action = match action_value {
            None | Some(serde_json::Value::Null) => Action::default(),
            Some(v) => serde_json::from_value(v).map_err(|e| ProtocolError::InvalidField {
                field: "action",
                message: e.to_string(),
            })?,
        };

        let secrets = match obj.remove("secrets") {
            None | Some(serde_json::Value::Null) => Secrets::default(),
            Some(v @ serde_json::Value::Object(_)) => {
                serde_json::from_value(v).map_err(|e| ProtocolError::InvalidField {
                    field: "secrets",
                    message: e.to_string(),
                })?
            }
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "secrets",
                    message: "expected an object".to_string(),
                })
            }
        };

        let state = match obj.remove("state") {
            None | Some(serde_json::Value::Null) => StateDocument::new(),
            Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "state",
                    message: "expected an object keyed by resource name".to_string(),
                })
            }
        };

        Ok(Self {
            action,
            secrets,
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// One field in discovery output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: crate::schema::FieldType,
    pub required: bool,
}

/// One resource in discovery output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub resource: String,
    pub primary_key: Vec<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl From<&Schema> for SchemaDescriptor {
    fn from(schema: &Schema) -> Self {
        Self {
            resource: schema.resource.clone(),
            primary_key: schema.primary_key().into_iter().map(str::to_string).collect(),
            fields: schema
                .fields
                .iter()
                .map(|f| FieldDescriptor {
                    name: f.name.clone(),
                    field_type: f.field_type,
                    required: f.is_required(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub schemas: Vec<SchemaDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-resource outcome reported in a sync response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub resource: String,
    pub rows_emitted: u64,
    pub rows_rejected: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rows_skipped: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<Rejection>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl From<&SyncRun> for RunSummary {
    fn from(run: &SyncRun) -> Self {
        Self {
            resource: run.resource.to_string(),
            rows_emitted: run.rows_emitted,
            rows_rejected: run.rows_rejected,
            rows_skipped: run.rows_skipped,
            status: run.status,
            error: run.error.as_ref().map(ToString::to_string),
            rejections: run.rejections.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub state: StateDocument,
    pub runs: Vec<RunSummary>,
    /// Set when the whole request was aborted (e.g. credentials rejected).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Any response document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Schema(SchemaResponse),
    Test(TestResponse),
    Sync(SyncResponse),
}

impl Response {
    /// Compact JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns a serialization error (not expected for these types).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
