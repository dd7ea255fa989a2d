//! Connector config file model.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use pagesync_types::schema::{FieldSchema, Resource, Schema};
use pagesync_types::state::ConnectorId;
use pagesync_types::wire::WriteMode;
use serde::{Deserialize, Serialize};

use crate::fetcher::RetryPolicy;
use crate::orchestrator::DEFAULT_MAX_PARALLEL;
use crate::registry::SchemaRegistry;

/// Top-level connector config (connector YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub version: String,
    pub connector: String,
    /// Source settings, interpreted by the source implementation.
    #[serde(default)]
    pub source: serde_json::Value,
    #[serde(default)]
    pub sink: SinkConfig,
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl ConnectorConfig {
    #[must_use]
    pub fn connector_id(&self) -> ConnectorId {
        ConnectorId::new(self.connector.clone())
    }

    /// Declared resources, in file order.
    #[must_use]
    pub fn to_resources(&self) -> Vec<Resource> {
        self.resources.iter().map(ResourceConfig::to_resource).collect()
    }

    /// Build the schema registry for the declared resources.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource declaration is invalid.
    pub fn registry(&self) -> Result<SchemaRegistry> {
        SchemaRegistry::new(self.to_resources()).context("Invalid resource declarations")
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }
}

/// Where accepted rows go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// JSON-lines files, one per resource, under `path`.
    Jsonl,
    /// Process memory (testing and dry runs).
    #[default]
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// One declared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default)]
    pub cursor_field: Option<String>,
    /// Destination identifier; defaults to the resource name.
    #[serde(default)]
    pub sink: Option<String>,
    /// Upstream path; defaults to the resource name.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl ResourceConfig {
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(Schema::new(self.name.clone(), self.fields.clone()))
            .with_write_mode(self.write_mode);
        if let Some(field) = &self.cursor_field {
            resource = resource.with_cursor_field(field.clone());
        }
        if let Some(sink) = &self.sink {
            resource = resource.with_sink(sink.clone());
        }
        resource.endpoint.clone_from(&self.endpoint);
        resource
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_jitter() -> f64 {
    0.1
}
fn default_max_rate_limit_waits() -> u32 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: 0.0,
            max_rate_limit_waits: self.max_rate_limit_waits,
        }
        .with_jitter(self.jitter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_parallel_resources")]
    pub max_parallel_resources: usize,
}

fn default_max_parallel_resources() -> usize {
    DEFAULT_MAX_PARALLEL
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_parallel_resources: default_max_parallel_resources(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    /// State travels with the request document.
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
}
