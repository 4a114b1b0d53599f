//! Service registration and discovery.
//!
//! A [`Registry`] publishes the instances a process serves; a [`Discovery`]
//! resolves a service name back to those instances. [`MemoryRegistry`]
//! implements both in-process and is what single-host clusters and tests use.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

/// Errors raised by registry backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The instance has no service name or id.
    #[error("service instance must have a name and an id")]
    InvalidInstance,

    /// Deregistering an instance that was never registered.
    #[error("instance {id} of service {name} is not registered")]
    NotRegistered {
        /// Service name.
        name: String,
        /// Instance id.
        id: String,
    },
}

/// One running instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique instance id.
    pub id: String,
    /// Service name instances are grouped by.
    pub name: String,
    /// Role of the instance (`mesh`, `gate`, `node`).
    pub kind: String,
    /// Human readable alias.
    #[serde(default)]
    pub alias: String,
    /// Dialable `host:port`.
    pub address: String,
}

/// Publishes service instances.
#[async_trait]
pub trait Registry: Discovery {
    /// Registers or refreshes an instance.
    async fn register(&self, instance: &ServiceInstance) -> Result<(), RegistryError>;

    /// Removes an instance.
    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), RegistryError>;

    /// The discovery side of this registry.
    fn as_discovery(self: Arc<Self>) -> Arc<dyn Discovery>;
}

/// Resolves service names to instances.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Instances currently registered under `name`.
    async fn services(&self, name: &str) -> Result<Vec<ServiceInstance>, RegistryError>;

    /// Receiver that observes every change to the instances of `name`.
    async fn watch(&self, name: &str) -> Result<watch::Receiver<Vec<ServiceInstance>>, RegistryError>;
}

/// In-process registry.
#[derive(Default)]
pub struct MemoryRegistry {
    services: RwLock<HashMap<String, watch::Sender<Vec<ServiceInstance>>>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> watch::Sender<Vec<ServiceInstance>> {
        if let Some(tx) = self.services.read().get(name) {
            return tx.clone();
        }
        self.services
            .write()
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .clone()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), RegistryError> {
        if instance.name.is_empty() || instance.id.is_empty() {
            return Err(RegistryError::InvalidInstance);
        }
        self.channel(&instance.name).send_modify(|instances| {
            instances.retain(|existing| existing.id != instance.id);
            instances.push(instance.clone());
        });
        info!(service = %instance.name, id = %instance.id, address = %instance.address, "instance registered");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), RegistryError> {
        let not_registered = || RegistryError::NotRegistered {
            name: instance.name.clone(),
            id: instance.id.clone(),
        };
        let tx = self
            .services
            .read()
            .get(&instance.name)
            .cloned()
            .ok_or_else(not_registered)?;

        let mut removed = false;
        tx.send_if_modified(|instances| {
            let before = instances.len();
            instances.retain(|existing| existing.id != instance.id);
            removed = instances.len() != before;
            removed
        });
        if !removed {
            return Err(not_registered());
        }
        debug!(service = %instance.name, id = %instance.id, "instance deregistered");
        Ok(())
    }

    fn as_discovery(self: Arc<Self>) -> Arc<dyn Discovery> {
        self
    }
}

#[async_trait]
impl Discovery for MemoryRegistry {
    async fn services(&self, name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        Ok(self
            .services
            .read()
            .get(name)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default())
    }

    async fn watch(&self, name: &str) -> Result<watch::Receiver<Vec<ServiceInstance>>, RegistryError> {
        Ok(self.channel(name).subscribe())
    }
}
