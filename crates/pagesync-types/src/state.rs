//! Cursor state and sync-run model types.
//!
//! Pure data types used by `StateBackend` implementations and the
//! orchestrator. Kept in the types crate so both the state and engine
//! crates can share them without circular dependencies.

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::record::Rejection;

/// Current cursor-state format version.
pub const CURRENT_STATE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque connector identifier. Scopes persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorId(String);

impl ConnectorId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource name (e.g. `"users"`), the key of the state document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for ResourceName {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Cursor state
// ---------------------------------------------------------------------------

/// Persisted position marker for one resource.
///
/// `cursor` is the durable high-water mark. `page_token` is the pagination
/// continuation of a run that was checkpointed mid-way; it is cleared once
/// the run completes, together with `high_water`, the largest cursor value
/// that run had emitted. Unknown keys are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CursorStateInput")]
pub struct CursorState {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_water: Option<String>,
    /// ISO-8601 UTC time of the last successful checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpointed_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CursorState {
    /// "Beginning of history": no cursor, no continuation.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            version: CURRENT_STATE_VERSION,
            cursor: None,
            page_token: None,
            high_water: None,
            checkpointed_at: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.cursor.is_none() && self.page_token.is_none()
    }

    /// Decode an opaque state value supplied by the caller.
    ///
    /// # Errors
    ///
    /// Returns a `schema` error if the value has an unsupported shape or a
    /// version newer than [`CURRENT_STATE_VERSION`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConnectorError> {
        serde_json::from_value(value).map_err(|e| {
            ConnectorError::schema("INVALID_CURSOR_STATE", format!("cannot decode cursor state: {e}"))
        })
    }

    /// Encode for the outgoing state document.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for CursorState {
    fn default() -> Self {
        Self::initial()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CursorStateInput {
    Empty(()),
    Bare(ScalarString),
    Full(CursorStateRepr),
}

#[derive(Deserialize)]
struct CursorStateRepr {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default)]
    cursor: Option<ScalarString>,
    #[serde(default)]
    page_token: Option<ScalarString>,
    #[serde(default)]
    high_water: Option<ScalarString>,
    #[serde(default)]
    checkpointed_at: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

fn current_version() -> u32 {
    CURRENT_STATE_VERSION
}

/// Accepts a JSON string or number and keeps it as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarString {
    Text(String),
    Number(serde_json::Number),
}

impl From<ScalarString> for String {
    fn from(value: ScalarString) -> Self {
        match value {
            ScalarString::Text(s) => s,
            ScalarString::Number(n) => n.to_string(),
        }
    }
}

impl TryFrom<CursorStateInput> for CursorState {
    type Error = String;

    fn try_from(input: CursorStateInput) -> Result<Self, Self::Error> {
        match input {
            CursorStateInput::Empty(()) => Ok(Self::initial()),
            CursorStateInput::Bare(cursor) => Ok(Self::initial().with_cursor(String::from(cursor))),
            CursorStateInput::Full(repr) => {
                if repr.version > CURRENT_STATE_VERSION {
                    return Err(format!(
                        "cursor state version {} is newer than supported version {CURRENT_STATE_VERSION}",
                        repr.version
                    ));
                }
                Ok(Self {
                    version: CURRENT_STATE_VERSION,
                    cursor: repr.cursor.map(String::from),
                    page_token: repr.page_token.map(String::from),
                    high_water: repr.high_water.map(String::from),
                    checkpointed_at: repr.checkpointed_at,
                    extra: repr.extra,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Lifecycle status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum rejected rows retained per run for diagnostics.
pub const MAX_RETAINED_REJECTIONS: usize = 100;

/// One orchestrator invocation for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub resource: ResourceName,
    pub start_cursor: CursorState,
    /// Last checkpointed cursor; equals `start_cursor` if nothing advanced.
    pub end_cursor: CursorState,
    pub rows_emitted: u64,
    pub rows_rejected: u64,
    /// Records at or before the starting cursor, dropped without error.
    pub rows_skipped: u64,
    pub pages: u64,
    pub status: RunStatus,
    pub error: Option<ConnectorError>,
    pub rejections: Vec<Rejection>,
}

impl SyncRun {
    #[must_use]
    pub fn start(resource: ResourceName, start_cursor: CursorState) -> Self {
        Self {
            resource,
            end_cursor: start_cursor.clone(),
            start_cursor,
            rows_emitted: 0,
            rows_rejected: 0,
            rows_skipped: 0,
            pages: 0,
            status: RunStatus::Running,
            error: None,
            rejections: Vec::new(),
        }
    }

    /// Record rejected rows, keeping at most [`MAX_RETAINED_REJECTIONS`].
    pub fn record_rejections(&mut self, rejections: Vec<Rejection>) {
        self.rows_rejected += rejections.len() as u64;
        let room = MAX_RETAINED_REJECTIONS.saturating_sub(self.rejections.len());
        self.rejections.extend(rejections.into_iter().take(room));
    }

    #[must_use]
    pub fn complete(mut self) -> Self {
        self.status = RunStatus::Complete;
        self
    }

    #[must_use]
    pub fn fail(mut self, error: ConnectorError) -> Self {
        self.status = RunStatus::Failed;
        self.error = Some(error);
        self
    }
}
