//! Mesh node: a microservice that hosts user services and pushes messages
//! to users through the gateway holding their connection.

pub mod options;

pub use options::{DEFAULT_CODEC, DEFAULT_NAME, DEFAULT_TIMEOUT, MeshOptions, MeshOverrides};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{GATE, MESH};
use crate::component::Component;
use crate::crypto::CipherError;
use crate::encoding::{CodecError, Message};
use crate::locate::{LocateError, Locator};
use crate::registry::{MemoryRegistry, Registry, RegistryError, ServiceInstance};
use crate::session::Kind;
use crate::transport::{ClientOptions, Endpoint, Server, TransportError, TransportOptions, Transporter};

/// Errors raised by mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Push needs a locator and none is configured.
    #[error("no locator configured")]
    NoLocator,

    /// The user is not connected through any gateway.
    #[error("user {0} is not located on any gateway")]
    NotLocated(i64),

    /// The located gateway is not registered.
    #[error("gateway {0} is not registered")]
    GateNotFound(String),

    /// The service server was used before `init`.
    #[error("mesh is not initialized")]
    NotInitialized,

    /// Locator backend failure.
    #[error(transparent)]
    Locate(#[from] LocateError),

    /// Registry backend failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// RPC failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Message encoding failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Payload encryption failure.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// A mesh instance.
///
/// Lifecycle follows [`Component`]: `init` creates the service server so
/// user services can be added, `start` serves and registers the instance,
/// `destroy` deregisters and stops.
pub struct Mesh {
    id: String,
    options: MeshOptions,
    transporter: Arc<Transporter>,
    registry: Arc<dyn Registry>,
    server: Mutex<Option<Arc<Server>>>,
    instance: Mutex<Option<ServiceInstance>>,
}

impl Mesh {
    /// Creates a mesh from resolved options. A missing registry is replaced
    /// by an in-memory one; a missing transporter by one whose clients carry
    /// the mesh name and timeout.
    #[must_use]
    pub fn new(options: MeshOptions) -> Self {
        let transporter = options.transporter.clone().unwrap_or_else(|| {
            Arc::new(Transporter::new(TransportOptions {
                client: ClientOptions {
                    name: options.name.clone(),
                    timeout: options.timeout,
                    ..ClientOptions::default()
                },
                ..TransportOptions::default()
            }))
        });
        let registry = options
            .registry
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new()) as Arc<dyn Registry>);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            options,
            transporter,
            registry,
            server: Mutex::new(None),
            instance: Mutex::new(None),
        }
    }

    /// Unique instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolved options.
    pub fn options(&self) -> &MeshOptions {
        &self.options
    }

    /// Transporter clients and servers are built with.
    pub fn transporter(&self) -> &Arc<Transporter> {
        &self.transporter
    }

    /// The service server; add user services to it between `init` and
    /// `start`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NotInitialized`] before `init`.
    pub fn server(&self) -> Result<Arc<Server>, MeshError> {
        self.server.lock().clone().ok_or(MeshError::NotInitialized)
    }

    /// Registered instance, while started.
    pub fn instance(&self) -> Option<ServiceInstance> {
        self.instance.lock().clone()
    }

    /// Encrypts `payload` if an encryptor is configured and encodes it with
    /// `route`.
    ///
    /// # Errors
    ///
    /// Returns the cipher or codec failure.
    pub fn encode(&self, route: i32, payload: &[u8]) -> Result<Bytes, MeshError> {
        let buffer = match &self.options.encryptor {
            Some(encryptor) => encryptor.encrypt(payload)?.to_vec(),
            None => payload.to_vec(),
        };
        let message = Message {
            seq: 0,
            route,
            buffer,
        };
        Ok(self.options.codec.encode(&message)?)
    }

    /// Decodes `data` and decrypts its buffer if a decryptor is configured.
    ///
    /// # Errors
    ///
    /// Returns the codec or cipher failure.
    pub fn decode(&self, data: &[u8]) -> Result<Message, MeshError> {
        let mut message = self.options.codec.decode(data)?;
        if let Some(decryptor) = &self.options.decryptor {
            message.buffer = decryptor.decrypt(&message.buffer)?.to_vec();
        }
        Ok(message)
    }

    /// Pushes `payload` under `route` to user `uid` through its gateway.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NotLocated`] or [`MeshError::GateNotFound`] when
    /// the user cannot be reached, or the encoding or RPC failure.
    pub async fn push(&self, uid: i64, route: i32, payload: &[u8]) -> Result<(), MeshError> {
        let locator = self.options.locator.as_ref().ok_or(MeshError::NoLocator)?;
        let gid = locator.locate_gate(uid).await?.ok_or(MeshError::NotLocated(uid))?;
        let endpoint = self.gate_endpoint(&gid).await?;
        let message = self.encode(route, payload)?;

        let client = self
            .transporter
            .new_gate_client(&endpoint)
            .await?
            .with_timeout(self.options.timeout);
        client.push(Kind::User, uid, message).await?;
        debug!(uid, route, gid = %gid, "pushed");
        Ok(())
    }

    async fn gate_endpoint(&self, gid: &str) -> Result<Endpoint, MeshError> {
        self.registry
            .services(GATE)
            .await?
            .into_iter()
            .find(|instance| instance.id == gid)
            .map(|instance| Endpoint::direct(instance.address))
            .ok_or_else(|| MeshError::GateNotFound(gid.to_string()))
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Component for Mesh {
    fn name(&self) -> &str {
        MESH
    }

    async fn init(&self) -> anyhow::Result<()> {
        let mut server = self.server.lock();
        if server.is_none() {
            *server = Some(Arc::new(self.transporter.new_service_server()?));
        }
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let server = self.server()?;
        let addr = server.start().await?;

        self.transporter
            .set_default_discovery(self.registry.clone().as_discovery());

        let instance = ServiceInstance {
            id: self.id.clone(),
            name: self.options.name.clone(),
            kind: MESH.to_string(),
            alias: self.options.name.clone(),
            address: addr.to_string(),
        };
        self.registry.register(&instance).await?;
        info!(id = %self.id, name = %self.options.name, %addr, "mesh started");
        *self.instance.lock() = Some(instance);
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        let instance = self.instance.lock().take();
        if let Some(instance) = instance {
            if let Err(e) = self.registry.deregister(&instance).await {
                warn!(id = %instance.id, error = %e, "mesh deregistration failed");
            }
        }
        let server = self.server.lock().clone();
        if let Some(server) = server {
            server.stop().await?;
        }
        info!(id = %self.id, "mesh destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherRegistry, ChaCha20Cipher};
    use crate::encoding::CodecRegistry;
    use crate::infrastructure::config::MeshSettings;
    use crate::locate::MemoryLocator;
    use crate::registry::Discovery;

    fn mesh(overrides: MeshOverrides) -> Mesh {
        let options = MeshOptions::resolve(
            &MeshSettings::default(),
            overrides,
            &CodecRegistry::new(),
            &CipherRegistry::new(),
        )
        .unwrap();
        Mesh::new(options)
    }

    #[test]
    fn decode_reverses_encode() {
        let key = [3u8; 32];
        let mesh = mesh(
            MeshOverrides::new()
                .with_encryptor(Arc::new(ChaCha20Cipher::new(&key)))
                .with_decryptor(Arc::new(ChaCha20Cipher::new(&key))),
        );
        let data = mesh.encode(12, b"hello").unwrap();
        let message = mesh.decode(&data).unwrap();
        assert_eq!(message.route, 12);
        assert_eq!(message.buffer, b"hello");
    }

    #[test]
    fn plaintext_without_ciphers() {
        let mesh = mesh(MeshOverrides::new());
        let data = mesh.encode(1, b"clear").unwrap();
        assert_eq!(mesh.decode(&data).unwrap().buffer, b"clear");
    }

    #[tokio::test]
    async fn push_needs_a_located_user() {
        let mesh_without_locator = mesh(MeshOverrides::new());
        assert!(matches!(
            mesh_without_locator.push(7, 1, b"x").await,
            Err(MeshError::NoLocator)
        ));

        let locator = Arc::new(MemoryLocator::new());
        let mesh = mesh(MeshOverrides::new().with_locator(locator.clone()));
        assert!(matches!(mesh.push(7, 1, b"x").await, Err(MeshError::NotLocated(7))));

        locator.bind_gate(7, "gate-9").await.unwrap();
        assert!(matches!(
            mesh.push(7, 1, b"x").await,
            Err(MeshError::GateNotFound(gid)) if gid == "gate-9"
        ));
    }

    #[tokio::test]
    async fn default_transporter_carries_mesh_timeout() {
        let mesh = mesh(
            MeshOverrides::new()
                .with_name("lobby")
                .with_timeout(std::time::Duration::from_secs(10)),
        );
        let builder = mesh.transporter().builder().await.unwrap();
        assert_eq!(builder.options().timeout, std::time::Duration::from_secs(10));
        assert_eq!(builder.options().name, "lobby");
    }

    #[tokio::test]
    async fn lifecycle_registers_and_deregisters() {
        let registry = Arc::new(MemoryRegistry::new());
        let transporter = Arc::new(Transporter::new(TransportOptions::default()));
        let mesh = mesh(
            MeshOverrides::new()
                .with_name("lobby")
                .with_registry(registry.clone())
                .with_transporter(transporter.clone()),
        );

        assert!(matches!(mesh.server(), Err(MeshError::NotInitialized)));
        mesh.init().await.unwrap();
        mesh.start().await.unwrap();

        let instances = registry.services("lobby").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, mesh.id());
        assert_eq!(instances[0].kind, "mesh");
        assert!(transporter.has_discovery());

        mesh.destroy().await.unwrap();
        assert!(registry.services("lobby").await.unwrap().is_empty());
        assert!(mesh.instance().is_none());
    }
}
