//! Shared test utilities for integration tests.
//!
//! Spins up a gateway in-test: a session hub served over the gate RPC role
//! plus the control plane with the `/ws` endpoint.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use relay_kernel::infrastructure::server;
use relay_kernel::session::{Session, SessionHub};
use relay_kernel::transport::{Endpoint, GateClient, Server, TransportOptions, Transporter};
use relay_kernel::ws::{Gateway, InboundHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// What the gateway saw from its clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A client connected with this connection id.
    Connected(i64),
    /// A client sent a frame.
    Message(i64, Bytes),
    /// A client went away.
    Disconnected(i64, Option<i64>),
}

/// Forwards every gateway callback into a channel.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<Inbound>,
}

#[async_trait]
impl InboundHandler for ChannelHandler {
    async fn on_connect(&self, session: &Arc<Session>) {
        if let Ok(cid) = session.cid() {
            let _ = self.tx.send(Inbound::Connected(cid));
        }
    }

    async fn on_message(&self, session: &Arc<Session>, data: Bytes) {
        if let Ok(cid) = session.cid() {
            let _ = self.tx.send(Inbound::Message(cid, data));
        }
    }

    async fn on_disconnect(&self, cid: i64, uid: Option<i64>) {
        let _ = self.tx.send(Inbound::Disconnected(cid, uid));
    }
}

/// WebSocket client connection.
pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running gateway.
pub struct GatewayHarness {
    /// Sessions of connected clients.
    pub hub: Arc<SessionHub>,
    /// Transporter the gate server was built with.
    pub transporter: Arc<Transporter>,
    /// Gate RPC server.
    pub gate_server: Server,
    /// Control-plane address.
    pub http_addr: SocketAddr,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl GatewayHarness {
    /// Starts a gateway whose client traffic is read with
    /// [`GatewayHarness::next_inbound`].
    pub async fn start() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut harness = Self::start_with(Arc::new(ChannelHandler { tx })).await?;
        harness.inbound = Some(rx);
        Ok(harness)
    }

    /// Starts a gateway with a custom handler.
    pub async fn start_with(handler: Arc<dyn InboundHandler>) -> Result<Self> {
        let hub = Arc::new(SessionHub::new());
        let transporter = Arc::new(Transporter::new(TransportOptions::default()));
        let gate_server = transporter.new_gate_server(hub.clone())?;
        gate_server.start().await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let http_addr = listener.local_addr()?;
        let gateway = Arc::new(Gateway::new(hub.clone(), handler, http_addr));
        let (shutdown, rx) = oneshot::channel::<()>();
        tokio::spawn(server::serve(listener, server::control_router(gateway, None), async {
            let _ = rx.await;
        }));

        Ok(Self {
            hub,
            transporter,
            gate_server,
            http_addr,
            inbound: None,
            shutdown: Some(shutdown),
        })
    }

    /// Gate RPC client pointed at this gateway.
    pub async fn gate(&self) -> Result<GateClient> {
        Ok(self
            .transporter
            .new_gate_client(&Endpoint::from(self.gate_server.addr()))
            .await?)
    }

    /// Opens a WebSocket client.
    pub async fn open(&self) -> Result<Client> {
        let (client, _) = connect_async(format!("ws://{}/ws", self.http_addr)).await?;
        Ok(client)
    }

    /// Opens a WebSocket client and returns it with its connection id.
    pub async fn connect(&mut self) -> Result<(Client, i64)> {
        let client = self.open().await?;
        match self.next_inbound().await? {
            Inbound::Connected(cid) => Ok((client, cid)),
            other => anyhow::bail!("expected a connect, got {other:?}"),
        }
    }

    /// Next gateway callback, failing after five seconds.
    pub async fn next_inbound(&mut self) -> Result<Inbound> {
        let inbound = self
            .inbound
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("harness started with a custom handler"))?;
        timeout(Duration::from_secs(5), inbound.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("handler channel closed"))
    }

    /// Stops both servers.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.gate_server.stop().await?;
        Ok(())
    }
}

/// Polls `check` until it holds, failing after five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}
