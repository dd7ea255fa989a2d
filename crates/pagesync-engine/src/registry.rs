//! Schema Registry: the declared resources of a connector.

use std::collections::HashMap;

use pagesync_types::error::ConnectorError;
use pagesync_types::protocol::{SchemaDescriptor, SchemaResponse};
use pagesync_types::schema::{Resource, Schema};

/// Immutable set of declared resources, in declaration order.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
}

impl SchemaRegistry {
    /// Build a registry, refusing invalid declarations.
    ///
    /// # Errors
    ///
    /// Returns a `config` error listing every invalid resource and every
    /// duplicate resource name.
    pub fn new(resources: Vec<Resource>) -> Result<Self, ConnectorError> {
        let mut errors = Vec::new();
        let mut index = HashMap::with_capacity(resources.len());

        for (i, resource) in resources.iter().enumerate() {
            if let Err(mut errs) = resource.validate() {
                errors.append(&mut errs);
            }
            if index.insert(resource.name().to_string(), i).is_some() {
                errors.push(format!("resource '{}' is declared more than once", resource.name()));
            }
        }

        if !errors.is_empty() {
            return Err(ConnectorError::config(
                "INVALID_SCHEMA",
                format!("invalid resource declarations: {}", errors.join("; ")),
            ));
        }

        Ok(Self { resources, index })
    }

    /// Schema of one resource.
    ///
    /// # Errors
    ///
    /// Returns `UNKNOWN_RESOURCE` if `name` is not declared.
    pub fn describe(&self, name: &str) -> Result<&Schema, ConnectorError> {
        self.resource(name)
            .map(|r| &r.schema)
            .ok_or_else(|| ConnectorError::unknown_resource(name))
    }

    /// Every schema, in declaration order.
    #[must_use]
    pub fn describe_all(&self) -> Vec<&Schema> {
        self.resources.iter().map(|r| &r.schema).collect()
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.index.get(name).map(|&i| &self.resources[i])
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Discovery document for the `schema` action.
    #[must_use]
    pub fn discovery(&self) -> SchemaResponse {
        SchemaResponse {
            schemas: self
                .resources
                .iter()
                .map(|r| SchemaDescriptor::from(&r.schema))
                .collect(),
        }
    }
}
