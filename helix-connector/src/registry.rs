//! Connector registry
//!
//! Connectors are selected by a configured name at process start. The
//! registry maps names to constructors; `local`, `ssh`, and `dry-run` are
//! built in, and out-of-tree connectors can be registered before the lookup.
//! An unknown name is a startup-fatal configuration error.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::ConnectorConfig;
use crate::dry_run::DryRunConnector;
use crate::local::LocalConnector;
use crate::ssh::SshConnector;
use crate::{Connector, ConnectorError};

type Factory =
    Box<dyn Fn(&ConnectorConfig) -> Result<Arc<dyn Connector>, RegistryError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown connector {name:?}; known connectors: {known}")]
    UnknownConnector { name: String, known: String },

    #[error("connector {name:?} cannot be constructed: {message}")]
    InvalidSettings { name: String, message: String },
}

pub struct ConnectorRegistry {
    factories: BTreeMap<String, Factory>,
}

impl ConnectorRegistry {
    /// A registry with the in-tree connectors registered.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register("local", |config| {
            Ok(Arc::new(LocalConnector::new(config.clone())))
        });
        registry.register("ssh", |config| match SshConnector::new(config.clone()) {
            Ok(connector) => Ok(Arc::new(connector)),
            Err(ConnectorError::Staging { message, .. }) => Err(RegistryError::InvalidSettings {
                name: "ssh".into(),
                message,
            }),
            Err(other) => Err(RegistryError::InvalidSettings {
                name: "ssh".into(),
                message: other.to_string(),
            }),
        });
        registry.register("dry-run", |config| {
            Ok(Arc::new(DryRunConnector::new(config.clone())))
        });
        registry
    }

    /// Registers a named constructor, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectorConfig) -> Result<Arc<dyn Connector>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn known_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Constructs the named connector.
    pub fn build(
        &self,
        name: &str,
        config: &ConnectorConfig,
    ) -> Result<Arc<dyn Connector>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownConnector {
                name: name.to_string(),
                known: self.known_names().join(", "),
            })?;
        factory(config)
    }

    /// Constructs the dry-run connector in place of the named one.
    ///
    /// The named connector is still resolved and constructed first, so a dry
    /// run surfaces the same configuration errors a real run would: an
    /// unknown name or unconstructible settings stay fatal.
    pub fn build_dry_run(
        &self,
        name: &str,
        config: &ConnectorConfig,
    ) -> Result<Arc<dyn Connector>, RegistryError> {
        self.build(name, config)?;
        self.build("dry-run", config)
    }
}
