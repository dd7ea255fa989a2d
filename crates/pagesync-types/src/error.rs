//! Structured error model for source, sink and state operations.
//!
//! [`ConnectorError`] carries classification, retry metadata, and optional
//! diagnostic details. Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a connector error.
///
/// Determines default retry behavior and where the error stops
/// propagating (row, page, resource or the whole request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid connector configuration.
    Config,
    /// Credentials rejected by the upstream source.
    Auth,
    /// Upstream asked us to slow down (retryable after a mandated delay).
    RateLimit,
    /// Connection reset, timeout, DNS failure (retryable).
    TransientNetwork,
    /// Upstream answered but is unavailable, e.g. HTTP 5xx (retryable).
    UpstreamUnavailable,
    /// Row-level validation failure.
    Data,
    /// Schema mismatch, unknown resource or unsupported state shape.
    Schema,
    /// Cursor state could not be durably recorded.
    Persistence,
    /// Destination refused or failed to accept a batch.
    Sink,
    /// A second run for the same resource overlapped an in-flight run.
    Conflict,
    /// The invocation was cancelled.
    Cancelled,
    /// Internal engine error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Data => "data",
            Self::Schema => "schema",
            Self::Persistence => "persistence",
            Self::Sink => "sink",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Aborts the whole request (every resource).
    Request,
    /// Stops one resource; siblings continue.
    Resource,
    /// Affects a single page fetch (retried locally).
    Page,
    /// Affects an individual record.
    Record,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Resource => "resource",
            Self::Page => "page",
            Self::Record => "record",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Multi-second retry.
    Slow,
}

/// Structured error from a source, sink or state operation.
///
/// Carries classification, retry metadata, and optional diagnostic details.
/// Construct via category-specific factory methods (e.g., [`ConnectorError::auth`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ConnectorError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ConnectorError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
            details: None,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Request, false, BackoffClass::Normal, code, message)
    }

    /// Authentication failure. Never retried; aborts the whole request
    /// because credentials are shared by every resource.
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, ErrorScope::Request, false, BackoffClass::Normal, code, message)
    }

    /// Rate limit error (retryable, slow backoff). `retry_after_ms` is the
    /// minimum wait before the same page may be requested again.
    #[must_use]
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(
            ErrorCategory::RateLimit, ErrorScope::Page, true, BackoffClass::Slow, code, message,
        );
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Transient network error (retryable, normal backoff).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, ErrorScope::Page, true, BackoffClass::Normal, code, message)
    }

    /// Upstream unavailable (retryable, normal backoff).
    #[must_use]
    pub fn upstream_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::UpstreamUnavailable, ErrorScope::Page, true, BackoffClass::Normal, code, message)
    }

    /// A required field was absent or null (record scope).
    #[must_use]
    pub fn missing_required_field(field: &str) -> Self {
        Self::new(
            ErrorCategory::Data,
            ErrorScope::Record,
            false,
            BackoffClass::Normal,
            "MISSING_REQUIRED_FIELD",
            format!("required field '{field}' is missing or null"),
        )
    }

    /// A field value could not be coerced to its declared type (record scope).
    #[must_use]
    pub fn type_mismatch(field: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Data,
            ErrorScope::Record,
            false,
            BackoffClass::Normal,
            "TYPE_MISMATCH",
            format!("field '{field}': {}", message.into()),
        )
    }

    /// Schema mismatch error (not retryable, resource scope).
    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, ErrorScope::Resource, false, BackoffClass::Normal, code, message)
    }

    /// Lookup of a resource the registry does not declare.
    #[must_use]
    pub fn unknown_resource(name: &str) -> Self {
        Self::schema("UNKNOWN_RESOURCE", format!("resource '{name}' is not declared"))
    }

    /// Cursor state could not be persisted (resource scope, fatal).
    #[must_use]
    pub fn persistence(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Persistence, ErrorScope::Resource, false, BackoffClass::Normal, code, message)
    }

    /// Destination failed to accept a batch (resource scope).
    #[must_use]
    pub fn sink(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Sink, ErrorScope::Resource, false, BackoffClass::Normal, code, message)
    }

    /// Another run for the same resource is still in flight.
    #[must_use]
    pub fn run_already_in_progress(resource: &str) -> Self {
        Self::new(
            ErrorCategory::Conflict,
            ErrorScope::Resource,
            false,
            BackoffClass::Normal,
            "RUN_ALREADY_IN_PROGRESS",
            format!("a sync run for resource '{resource}' is already in progress"),
        )
    }

    /// The invocation was cancelled before the resource finished.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, ErrorScope::Resource, false, BackoffClass::Normal, "CANCELLED", message)
    }

    /// Internal error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Resource, false, BackoffClass::Normal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    /// `true` when this error must abort the entire request.
    #[must_use]
    pub fn is_request_fatal(&self) -> bool {
        self.category == ErrorCategory::Auth || self.scope == ErrorScope::Request
    }
}
