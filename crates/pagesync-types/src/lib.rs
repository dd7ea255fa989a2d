//! Shared pagesync schema, state, record, error and protocol types.
//!
//! Pure data only. Both the state crate and the engine depend on these
//! types, so nothing here performs I/O.

pub mod error;
pub mod protocol;
pub mod record;
pub mod schema;
pub mod state;
pub mod wire;
