//! Cluster RPC transport.
//!
//! The [`Transporter`] hands out role-specific servers and clients. Gate and
//! node roles are each served under a fixed gRPC service path, so one
//! listener can host both. All clients share a single [`Builder`], which is
//! constructed lazily on first use through a [`SingleFlight`] cell.

pub mod builder;
pub mod endpoint;
pub mod gate;
pub mod node;
pub mod pb;
pub mod server;
pub mod service;
pub mod singleflight;

pub use builder::{Builder, ClientOptions};
pub use endpoint::Endpoint;
pub use gate::{GateClient, GateProvider};
pub use node::{Delivery, Event, NodeClient, NodeProvider};
pub use server::{Server, ServerOptions};
pub use service::ServiceClient;
pub use singleflight::SingleFlight;

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tonic::Status;
use tracing::debug;

use crate::registry::{Discovery, RegistryError};

/// gRPC service path of the gate role.
pub const GATE_SERVICE_PATH: &str = "gate.Gate";
/// gRPC service path of the node role.
pub const NODE_SERVICE_PATH: &str = "node.Node";

pub(crate) type DiscoverySlot = Arc<RwLock<Option<Arc<dyn Discovery>>>>;

/// Errors raised while building or using transport clients and servers.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// A discovery target was used but no discovery source is configured.
    #[error("no discovery configured to resolve service {0}")]
    NoDiscovery(String),

    /// Discovery returned no instances.
    #[error("no instances of service {0}")]
    NoInstances(String),

    /// Connecting to the resolved address failed.
    #[error("failed to dial {address}: {reason}")]
    Dial {
        /// Address that was dialed.
        address: String,
        /// Underlying failure.
        reason: String,
    },

    /// The target string could not be parsed.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The call did not complete within the configured timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// A service tried to register under a path that is taken.
    #[error("service path {0} is reserved")]
    ReservedPath(String),

    /// The remote side answered with an error status.
    #[error("rpc failed: {0}")]
    Status(#[from] Status),

    /// The client builder could not be constructed.
    #[error("client builder construction failed: {0}")]
    Build(String),

    /// The discovery backend failed.
    #[error(transparent)]
    Discovery(#[from] RegistryError),

    /// The server could not bind or is in the wrong state.
    #[error("server error: {0}")]
    Server(String),
}

/// Awaits an RPC bounded by `timeout`.
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<tonic::Response<T>, Status>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(TransportError::Status(status)),
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

/// Server and client options of a [`Transporter`].
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Listener options for every server.
    pub server: ServerOptions,
    /// Dial options for every client.
    pub client: ClientOptions,
}

/// Factory for role servers and clients.
///
/// The client builder is created on the first client request, exactly once
/// even under concurrent first requests. A failed construction is returned to
/// every caller that waited on it and retried on the next request.
pub struct Transporter {
    options: TransportOptions,
    discovery: DiscoverySlot,
    builder: SingleFlight<Arc<Builder>, TransportError>,
    constructions: Arc<AtomicUsize>,
}

impl Transporter {
    /// Creates a transporter without a discovery source.
    #[must_use]
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            discovery: Arc::new(RwLock::new(None)),
            builder: SingleFlight::new(),
            constructions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the discovery source, replacing any previous one.
    #[must_use]
    pub fn with_discovery(self, discovery: Arc<dyn Discovery>) -> Self {
        *self.discovery.write() = Some(discovery);
        self
    }

    /// Options this transporter was created with.
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Supplies a discovery source only if none is configured yet.
    pub fn set_default_discovery(&self, discovery: Arc<dyn Discovery>) {
        let mut slot = self.discovery.write();
        if slot.is_none() {
            *slot = Some(discovery);
        }
    }

    /// True once a discovery source is configured.
    pub fn has_discovery(&self) -> bool {
        self.discovery.read().is_some()
    }

    /// Server hosting only the gate role.
    ///
    /// # Errors
    ///
    /// Returns an error if the role cannot be registered.
    pub fn new_gate_server(&self, provider: Arc<dyn GateProvider>) -> Result<Server, TransportError> {
        let server = Server::new(self.options.server.clone(), &[]);
        server.add_gate(provider)?;
        Ok(server)
    }

    /// Server hosting only the node role.
    ///
    /// # Errors
    ///
    /// Returns an error if the role cannot be registered.
    pub fn new_node_server(&self, provider: Arc<dyn NodeProvider>) -> Result<Server, TransportError> {
        let server = Server::new(self.options.server.clone(), &[]);
        server.add_node(provider)?;
        Ok(server)
    }

    /// Server that can host both role paths plus user services on one
    /// listener. User services may not take the role paths.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible like the role constructors.
    pub fn new_service_server(&self) -> Result<Server, TransportError> {
        Ok(Server::new(
            self.options.server.clone(),
            &[GATE_SERVICE_PATH, NODE_SERVICE_PATH],
        ))
    }

    /// Client for a gateway.
    ///
    /// # Errors
    ///
    /// Returns the builder construction, discovery or dial failure.
    pub async fn new_gate_client(&self, endpoint: &Endpoint) -> Result<GateClient, TransportError> {
        let builder = self.builder().await?;
        let channel = builder.build(endpoint).await?;
        Ok(GateClient::new(channel, builder.options().timeout))
    }

    /// Client for a logic node.
    ///
    /// # Errors
    ///
    /// Returns the builder construction, discovery or dial failure.
    pub async fn new_node_client(&self, endpoint: &Endpoint) -> Result<NodeClient, TransportError> {
        let builder = self.builder().await?;
        let channel = builder.build(endpoint).await?;
        Ok(NodeClient::new(channel, builder.options().timeout))
    }

    /// Client for an arbitrary service given as a target string.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTarget`] or the build failure.
    pub async fn new_service_client(&self, target: &str) -> Result<ServiceClient, TransportError> {
        let endpoint: Endpoint = target.parse()?;
        let builder = self.builder().await?;
        let channel = builder.build(&endpoint).await?;
        Ok(ServiceClient::new(channel, builder.options().timeout))
    }

    /// The shared client builder, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if construction fails.
    pub async fn builder(&self) -> Result<Arc<Builder>, TransportError> {
        let options = self.options.client.clone();
        let discovery = self.discovery.clone();
        let constructions = self.constructions.clone();
        self.builder
            .get_or_try_init(move || async move {
                constructions.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Builder::new(options, discovery).map(Arc::new)
            })
            .await
    }

    /// Number of builder construction attempts so far.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

impl Drop for Transporter {
    fn drop(&mut self) {
        if self.builder.take().is_some() {
            debug!("client builder released");
        }
    }
}
