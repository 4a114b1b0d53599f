//! Inbound handler that forwards client traffic to a logic node.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

use super::handler::InboundHandler;
use crate::session::Session;
use crate::transport::{Delivery, Endpoint, Event, NodeClient, TransportError, Transporter};

/// Forwards connection events and messages to the node at `target`.
pub struct NodeForwarder {
    gid: String,
    target: Endpoint,
    transporter: Arc<Transporter>,
}

impl NodeForwarder {
    /// Creates a forwarder for gateway `gid`.
    pub fn new(gid: impl Into<String>, target: Endpoint, transporter: Arc<Transporter>) -> Self {
        Self {
            gid: gid.into(),
            target,
            transporter,
        }
    }

    async fn client(&self) -> Result<NodeClient, TransportError> {
        self.transporter.new_node_client(&self.target).await
    }

    async fn trigger(&self, event: Event, cid: i64, uid: Option<i64>) {
        let result = match self.client().await {
            Ok(client) => client.trigger(event, &self.gid, cid, uid).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(%event, cid, target = %self.target, error = %e, "node trigger failed");
        }
    }
}

#[async_trait]
impl InboundHandler for NodeForwarder {
    async fn on_connect(&self, session: &Arc<Session>) {
        if let Ok(cid) = session.cid() {
            self.trigger(Event::Connect, cid, session.uid()).await;
        }
    }

    async fn on_message(&self, session: &Arc<Session>, data: Bytes) {
        let Ok(cid) = session.cid() else {
            return;
        };
        let delivery = Delivery {
            gid: self.gid.clone(),
            nid: String::new(),
            cid,
            uid: session.uid(),
            message: data,
        };
        let result = match self.client().await {
            Ok(client) => client.deliver(delivery).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(cid, target = %self.target, error = %e, "node delivery failed");
        }
    }

    async fn on_disconnect(&self, cid: i64, uid: Option<i64>) {
        self.trigger(Event::Disconnect, cid, uid).await;
    }
}
