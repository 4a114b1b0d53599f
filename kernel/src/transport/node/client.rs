use std::time::Duration;
use tonic::transport::Channel;

use super::{Delivery, Event, wire_uid};
use crate::transport::pb::node::{
    DeliverRequest, Event as WireEvent, TriggerRequest, node_client::NodeClient as RawNodeClient,
};
use crate::transport::{TransportError, bounded};

/// Client of a remote node. Cheap to clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct NodeClient {
    inner: RawNodeClient<Channel>,
    timeout: Duration,
}

impl NodeClient {
    /// Wraps a connected channel.
    #[must_use]
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self {
            inner: RawNodeClient::new(channel),
            timeout,
        }
    }

    /// Reports a connection lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn trigger(&self, event: Event, gid: &str, cid: i64, uid: Option<i64>) -> Result<(), TransportError> {
        let mut client = self.inner.clone();
        let request = TriggerRequest {
            event: WireEvent::from(event).into(),
            gid: gid.to_string(),
            cid,
            uid: wire_uid(uid),
        };
        bounded(self.timeout, client.trigger(request)).await?;
        Ok(())
    }

    /// Forwards a client message.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn deliver(&self, delivery: Delivery) -> Result<(), TransportError> {
        let mut client = self.inner.clone();
        let request = DeliverRequest {
            gid: delivery.gid,
            nid: delivery.nid,
            cid: delivery.cid,
            uid: wire_uid(delivery.uid),
            message: delivery.message.to_vec(),
        };
        bounded(self.timeout, client.deliver(request)).await?;
        Ok(())
    }
}
