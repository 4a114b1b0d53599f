//! Client builder: resolves targets and caches dialed channels.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint as TonicEndpoint};
use tracing::{debug, info};

use super::{DiscoverySlot, Endpoint, TransportError};

/// Options every client channel is dialed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Instance name, sent as the user agent.
    pub name: String,
    /// Per-call timeout, applied by the role clients.
    pub timeout: Duration,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Maximum in-flight requests per channel.
    pub concurrency_limit: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: "relay".to_string(),
            timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(1),
            concurrency_limit: 256,
        }
    }
}

/// Turns targets into connected channels.
///
/// Channels are cached per resolved address; every client built for the
/// same address shares one HTTP/2 connection.
pub struct Builder {
    options: ClientOptions,
    user_agent: String,
    discovery: DiscoverySlot,
    channels: RwLock<HashMap<String, Channel>>,
    cursor: AtomicUsize,
}

impl Builder {
    /// Validates `options` and creates a builder resolving discovery targets
    /// through `discovery`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] for an unusable name, a zero timeout
    /// or a zero concurrency limit.
    pub fn new(options: ClientOptions, discovery: DiscoverySlot) -> Result<Self, TransportError> {
        if options.timeout.is_zero() || options.connect_timeout.is_zero() {
            return Err(TransportError::Build("timeouts must be positive".to_string()));
        }
        if options.concurrency_limit == 0 {
            return Err(TransportError::Build("concurrency limit must be positive".to_string()));
        }
        let user_agent = format!("{}/{}", options.name, env!("CARGO_PKG_VERSION"));
        TonicEndpoint::from_static("http://127.0.0.1:0")
            .user_agent(user_agent.clone())
            .map_err(|e| TransportError::Build(format!("invalid instance name {:?}: {e}", options.name)))?;

        metrics::counter!("relay_client_builders_total").increment(1);
        info!(name = %options.name, timeout = ?options.timeout, "client builder constructed");
        Ok(Self {
            options,
            user_agent,
            discovery,
            channels: RwLock::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Options channels are dialed with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Resolves `target` and returns a connected channel for it.
    ///
    /// # Errors
    ///
    /// Returns the discovery or dial failure.
    pub async fn build(&self, target: &Endpoint) -> Result<Channel, TransportError> {
        let address = self.resolve(target).await?;
        self.get_or_connect(&address).await
    }

    async fn resolve(&self, target: &Endpoint) -> Result<String, TransportError> {
        match target {
            Endpoint::Direct(address) => Ok(address.clone()),
            Endpoint::Discovery(service) => {
                let discovery = self
                    .discovery
                    .read()
                    .clone()
                    .ok_or_else(|| TransportError::NoDiscovery(service.clone()))?;
                let instances = discovery.services(service).await?;
                if instances.is_empty() {
                    return Err(TransportError::NoInstances(service.clone()));
                }
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % instances.len();
                Ok(instances[index].address.clone())
            }
        }
    }

    async fn get_or_connect(&self, address: &str) -> Result<Channel, TransportError> {
        // Fast path: check if connected
        if let Some(channel) = self.channels.read().get(address) {
            return Ok(channel.clone());
        }

        // Slow path: connect
        let endpoint = TonicEndpoint::from_shared(format!("http://{address}"))
            .map_err(|_| TransportError::InvalidTarget(address.to_string()))?
            .user_agent(self.user_agent.clone())
            .map_err(|e| TransportError::Build(e.to_string()))?
            .connect_timeout(self.options.connect_timeout)
            .concurrency_limit(self.options.concurrency_limit);
        let channel = endpoint.connect().await.map_err(|e| TransportError::Dial {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        debug!(address, "channel connected");

        Ok(self
            .channels
            .write()
            .entry(address.to_string())
            .or_insert(channel)
            .clone())
    }

    /// Number of cached channels.
    pub fn cached(&self) -> usize {
        self.channels.read().len()
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("options", &self.options)
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}
