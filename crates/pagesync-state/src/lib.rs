//! Cursor state persistence for pagesync.
//!
//! Provides the [`StateBackend`] trait with an in-memory implementation
//! (seeded from a request's opaque state document) and a
//! [`SqliteStateBackend`] for standalone deployments that also keeps run
//! history and rejected rows.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod lease;
pub mod memory;
pub mod sqlite;

pub use backend::{RunRecord, StateBackend};
pub use error::StateError;
pub use lease::{RunLease, LEASE_RENEW_INTERVAL};
pub use memory::MemoryStateBackend;
pub use sqlite::SqliteStateBackend;
