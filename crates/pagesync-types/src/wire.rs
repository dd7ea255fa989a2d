//! Small protocol enums shared by the registry, engine and adapter.

use serde::{Deserialize, Serialize};

/// How accepted rows are written to a resource's destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Union new rows with existing contents; rows whose primary key was
    /// seen before replace the prior row.
    #[default]
    Append,
    /// Truncate the destination before the first batch of a run, then
    /// append subsequent batches of the same run.
    Replace,
    /// Like [`WriteMode::Replace`], but only when the destination is
    /// confirmed empty. A non-empty destination fails the resource.
    ReplaceIfEmpty,
}

impl WriteMode {
    /// Wire-format string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Replace => "replace",
            Self::ReplaceIfEmpty => "replace_if_empty",
        }
    }

    /// Whether the first batch of a run must clear existing contents.
    #[must_use]
    pub fn truncates_on_first_batch(self) -> bool {
        matches!(self, Self::Replace | Self::ReplaceIfEmpty)
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation requested by an incoming protocol document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Schema discovery. No side effects.
    Schema,
    /// Credential / connectivity probe.
    Test,
    /// Incremental sync run.
    #[default]
    Sync,
}
