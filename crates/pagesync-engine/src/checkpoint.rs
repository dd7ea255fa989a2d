//! Checkpoint gating and cursor persistence.

use pagesync_state::StateBackend;
use pagesync_types::error::ConnectorError;
use pagesync_types::state::{ConnectorId, CursorState, ResourceName};

use crate::sink::BatchAck;

/// What the sink confirmed for the page being checkpointed.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Emission {
    /// Nothing needed writing (empty, fully skipped, or fully collapsed page).
    Nothing,
    /// The sink acknowledged `expected` rows.
    Acknowledged { ack: BatchAck, expected: u64 },
}

/// Persist `next` only if the page it covers is confirmed durable.
///
/// Stamps `checkpointed_at` and returns the state as persisted.
pub(crate) fn commit_checkpoint(
    state: &dyn StateBackend,
    connector: &ConnectorId,
    resource: &ResourceName,
    emission: Emission,
    mut next: CursorState,
) -> Result<CursorState, ConnectorError> {
    if let Emission::Acknowledged { ack, expected } = emission {
        if ack.rows_written < expected {
            tracing::warn!(
                resource = %resource,
                expected,
                acknowledged = ack.rows_written,
                "Skipping cursor advancement: sink acknowledged fewer rows than emitted"
            );
            return Err(ConnectorError::sink(
                "PARTIAL_ACK",
                format!("sink acknowledged {} of {expected} rows", ack.rows_written),
            ));
        }
    }

    next.checkpointed_at = Some(
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    );
    state.set_cursor(connector, resource, &next).map_err(|e| {
        ConnectorError::persistence("CHECKPOINT_FAILED", format!("cannot persist cursor: {e}"))
    })?;

    tracing::info!(
        resource = %resource,
        cursor = next.cursor.as_deref(),
        page_token = next.page_token.as_deref(),
        "Cursor advanced: sink acceptance confirmed"
    );
    Ok(next)
}
