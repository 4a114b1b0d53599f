//! WebSocket upgrade handler and inbound message seam.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    response::Response,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::session::{Session, SessionHub};
use crate::ws::connection;

/// Default depth of a connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Receives what clients send to the gateway.
///
/// `on_message` runs on the connection's own task, so messages from one
/// client are handled in order.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Called once the session is registered with the hub.
    async fn on_connect(&self, _session: &Arc<Session>) {}

    /// Called for every text or binary frame.
    async fn on_message(&self, session: &Arc<Session>, data: Bytes);

    /// Called after the session has been removed from the hub.
    async fn on_disconnect(&self, _cid: i64, _uid: Option<i64>) {}
}

/// Handler that only logs what it sees.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl InboundHandler for LoggingHandler {
    async fn on_connect(&self, session: &Arc<Session>) {
        debug!(cid = session.cid().ok(), "client connected");
    }

    async fn on_message(&self, session: &Arc<Session>, data: Bytes) {
        debug!(cid = session.cid().ok(), uid = session.uid(), len = data.len(), "client message");
    }

    async fn on_disconnect(&self, cid: i64, uid: Option<i64>) {
        debug!(cid, uid, "client disconnected");
    }
}

/// Shared state of the WebSocket gateway.
pub struct Gateway {
    hub: Arc<SessionHub>,
    handler: Arc<dyn InboundHandler>,
    local_addr: SocketAddr,
    queue_capacity: usize,
}

impl Gateway {
    /// Creates a gateway registering its sessions with `hub`.
    pub fn new(hub: Arc<SessionHub>, handler: Arc<dyn InboundHandler>, local_addr: SocketAddr) -> Self {
        Self {
            hub,
            handler,
            local_addr,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Sets the per-connection outbound queue depth.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Session registry.
    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    /// Inbound message handler.
    pub fn handler(&self) -> &Arc<dyn InboundHandler> {
        &self.handler
    }

    /// Address the gateway listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Per-connection outbound queue depth.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

/// Handles WebSocket upgrade requests.
///
/// The router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    info!(%remote_addr, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = connection::run(socket, gateway, remote_addr).await {
            tracing::error!(error = %e, "WebSocket connection error");
        }
    })
}

/// Creates a router serving the gateway at `/ws`.
pub fn ws_router(gateway: Arc<Gateway>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(handle_ws_upgrade))
        .with_state(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_capacity_is_at_least_one() {
        let gateway = Gateway::new(
            Arc::new(SessionHub::new()),
            Arc::new(LoggingHandler),
            SocketAddr::from(([127, 0, 0, 1], 3553)),
        )
        .with_queue_capacity(0);
        assert_eq!(gateway.queue_capacity(), 1);
        assert_eq!(gateway.local_addr().port(), 3553);
    }
}
