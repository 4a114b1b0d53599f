//! RPC server hosting one or more service paths on a single listener.

use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::Body;
use tonic::codegen::{Service, http};
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tracing::{error, info};

use super::gate::GateService;
use super::node::NodeService;
use super::pb::gate::gate_server::GateServer;
use super::pb::node::node_server::NodeServer;
use super::{Endpoint, GateProvider, NodeProvider, TransportError};

const SCHEME: &str = "grpc";

/// Listener options shared by every server of a transporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Address to listen on. Port 0 picks an ephemeral port.
    pub addr: SocketAddr,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

struct State {
    routes: Option<RoutesBuilder>,
    hosted: Vec<&'static str>,
    bound: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// gRPC server multiplexing service paths on one listener.
///
/// Services are registered before [`Server::start`]; each path can be
/// hosted once. Paths listed as reserved can only be taken by the gate and
/// node roles.
pub struct Server {
    options: ServerOptions,
    reserved: Vec<&'static str>,
    state: Mutex<State>,
}

impl Server {
    /// Creates a server that keeps `reserved` paths for the role services.
    #[must_use]
    pub fn new(options: ServerOptions, reserved: &[&'static str]) -> Self {
        Self {
            options,
            reserved: reserved.to_vec(),
            state: Mutex::new(State {
                routes: Some(RoutesBuilder::default()),
                hosted: Vec::new(),
                bound: None,
                shutdown: None,
                task: None,
            }),
        }
    }

    /// Hosts the gate role.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReservedPath`] if the gate role is already
    /// hosted, or an error if the server has started.
    pub fn add_gate(&self, provider: Arc<dyn GateProvider>) -> Result<(), TransportError> {
        self.register(GateServer::new(GateService::new(provider)), true)
    }

    /// Hosts the node role.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReservedPath`] if the node role is already
    /// hosted, or an error if the server has started.
    pub fn add_node(&self, provider: Arc<dyn NodeProvider>) -> Result<(), TransportError> {
        self.register(NodeServer::new(NodeService::new(provider)), true)
    }

    /// Hosts a user service.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReservedPath`] if the service name is a role
    /// path or already hosted, or an error if the server has started.
    pub fn add_service<S>(&self, svc: S) -> Result<(), TransportError>
    where
        S: Service<http::Request<Body>, Error = Infallible> + NamedService + Clone + Send + Sync + 'static,
        S::Response: axum::response::IntoResponse,
        S::Future: Send + 'static,
    {
        self.register(svc, false)
    }

    fn register<S>(&self, svc: S, role: bool) -> Result<(), TransportError>
    where
        S: Service<http::Request<Body>, Error = Infallible> + NamedService + Clone + Send + Sync + 'static,
        S::Response: axum::response::IntoResponse,
        S::Future: Send + 'static,
    {
        let path = S::NAME;
        if !role && self.reserved.contains(&path) {
            return Err(TransportError::ReservedPath(path.to_string()));
        }
        let mut state = self.state.lock();
        if state.hosted.contains(&path) {
            return Err(TransportError::ReservedPath(path.to_string()));
        }
        let routes = state
            .routes
            .as_mut()
            .ok_or_else(|| TransportError::Server("server already started".to_string()))?;
        routes.add_service(svc);
        state.hosted.push(path);
        info!(path, "service registered");
        Ok(())
    }

    /// Binds the listener and starts serving. Returns the bound address;
    /// calling it again returns the same address.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Server`] if the address cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr, TransportError> {
        if let Some(addr) = self.state.lock().bound {
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.options.addr)
            .await
            .map_err(|e| TransportError::Server(format!("failed to bind {}: {e}", self.options.addr)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TransportError::Server(e.to_string()))?;

        let mut state = self.state.lock();
        if let Some(bound) = state.bound {
            return Ok(bound);
        }
        let routes = state
            .routes
            .take()
            .ok_or_else(|| TransportError::Server("server already stopped".to_string()))?
            .routes();

        let (tx, rx) = oneshot::channel::<()>();
        let router = tonic::transport::Server::builder().add_routes(routes);
        let incoming = TcpListenerStream::new(listener);
        let task = tokio::spawn(async move {
            let signal = async {
                let _ = rx.await;
            };
            if let Err(e) = router.serve_with_incoming_shutdown(incoming, signal).await {
                error!(error = %e, "rpc server failed");
            }
        });

        state.bound = Some(addr);
        state.shutdown = Some(tx);
        state.task = Some(task);
        info!(%addr, paths = ?state.hosted, "rpc server started");
        Ok(addr)
    }

    /// Stops serving and waits for in-flight calls to finish.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Server`] if the serving task panicked.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let (shutdown, task) = {
            let mut state = self.state.lock();
            (state.shutdown.take(), state.task.take())
        };
        let Some(shutdown) = shutdown else {
            return Ok(());
        };
        let _ = shutdown.send(());
        if let Some(task) = task {
            task.await.map_err(|e| TransportError::Server(e.to_string()))?;
        }
        info!(addr = %self.addr(), "rpc server stopped");
        Ok(())
    }

    /// Bound address once started, the configured address before.
    pub fn addr(&self) -> SocketAddr {
        self.state.lock().bound.unwrap_or(self.options.addr)
    }

    /// Protocol scheme of this server.
    pub fn scheme(&self) -> &'static str {
        SCHEME
    }

    /// Endpoint clients can dial to reach this server.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.addr())
    }

    /// Service paths hosted so far.
    pub fn paths(&self) -> Vec<&'static str> {
        self.state.lock().hosted.clone()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr())
            .field("paths", &self.paths())
            .finish_non_exhaustive()
    }
}
