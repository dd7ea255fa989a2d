//! Incremental sync engine for paginated, rate-limited sources.
//!
//! The [`adapter::ProtocolAdapter`] interprets one request document and
//! routes it to the [`registry::SchemaRegistry`] (discovery), the page
//! source probe (connectivity test), or the [`orchestrator::SyncOrchestrator`]
//! (sync). Source and sink are capabilities behind the [`source::PageSource`]
//! and [`sink::Sink`] traits.

pub mod adapter;
pub(crate) mod checkpoint;
pub mod config;
pub mod context;
pub mod cursor;
pub mod errors;
pub mod fetcher;
pub mod mapper;
pub mod orchestrator;
pub mod registry;
pub mod sink;
pub mod source;

pub use adapter::{Handled, ProtocolAdapter};
pub use context::RequestContext;
pub use errors::SyncError;
pub use fetcher::{PageFetcher, RetryPolicy};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use registry::SchemaRegistry;
pub use sink::{BatchAck, Sink};
pub use source::{Page, PageRequest, PageSource};
