use bytes::Bytes;
use std::net::IpAddr;
use std::time::Duration;
use tonic::Status;
use tonic::transport::Channel;

use crate::session::Kind;
use crate::transport::pb::gate::{
    BindRequest, BroadcastRequest, DisconnectRequest, GetIpRequest, MulticastRequest, PushRequest,
    Kind as WireKind, StatRequest, UnbindRequest, gate_client::GateClient as RawGateClient,
};
use crate::transport::{TransportError, bounded};

/// Outcome of a multicast or broadcast on a remote gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fanout {
    /// Targets attempted.
    pub total: usize,
    /// Targets that did not receive the message.
    pub failed: Vec<i64>,
}

/// Client of a remote gate. Cheap to clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct GateClient {
    inner: RawGateClient<Channel>,
    timeout: Duration,
}

impl GateClient {
    /// Wraps a connected channel.
    #[must_use]
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self {
            inner: RawGateClient::new(channel),
            timeout,
        }
    }

    /// Replaces the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Binds `uid` to connection `cid` on the gate.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn bind(&self, cid: i64, uid: i64) -> Result<(), TransportError> {
        let mut client = self.inner.clone();
        bounded(self.timeout, client.bind(BindRequest { cid, uid })).await?;
        Ok(())
    }

    /// Unbinds `uid` on the gate.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn unbind(&self, uid: i64) -> Result<(), TransportError> {
        let mut client = self.inner.clone();
        bounded(self.timeout, client.unbind(UnbindRequest { uid })).await?;
        Ok(())
    }

    /// Remote IP of a connection or user.
    ///
    /// # Errors
    ///
    /// Returns the remote status, a timeout, or an unparsable reply.
    pub async fn get_ip(&self, kind: Kind, target: i64) -> Result<IpAddr, TransportError> {
        let mut client = self.inner.clone();
        let request = GetIpRequest {
            kind: WireKind::from(kind).into(),
            target,
        };
        let reply = bounded(self.timeout, client.get_ip(request)).await?;
        reply
            .ip
            .parse()
            .map_err(|_| TransportError::Status(Status::internal(format!("invalid ip {:?}", reply.ip))))
    }

    /// Enqueues a message to one connection or user.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn push(&self, kind: Kind, target: i64, message: Bytes) -> Result<(), TransportError> {
        let mut client = self.inner.clone();
        let request = PushRequest {
            kind: WireKind::from(kind).into(),
            target,
            message: message.to_vec(),
        };
        bounded(self.timeout, client.push(request)).await?;
        Ok(())
    }

    /// Enqueues a message to several connections or users.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn multicast(&self, kind: Kind, targets: Vec<i64>, message: Bytes) -> Result<Fanout, TransportError> {
        let mut client = self.inner.clone();
        let request = MulticastRequest {
            kind: WireKind::from(kind).into(),
            targets,
            message: message.to_vec(),
        };
        let reply = bounded(self.timeout, client.multicast(request)).await?;
        Ok(Fanout {
            total: usize::try_from(reply.total).unwrap_or_default(),
            failed: reply.failed,
        })
    }

    /// Enqueues a message to every connection or bound user.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn broadcast(&self, kind: Kind, message: Bytes) -> Result<Fanout, TransportError> {
        let mut client = self.inner.clone();
        let request = BroadcastRequest {
            kind: WireKind::from(kind).into(),
            message: message.to_vec(),
        };
        let reply = bounded(self.timeout, client.broadcast(request)).await?;
        Ok(Fanout {
            total: usize::try_from(reply.total).unwrap_or_default(),
            failed: reply.failed,
        })
    }

    /// Number of connections or bound users on the gate.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn stat(&self, kind: Kind) -> Result<usize, TransportError> {
        let mut client = self.inner.clone();
        let request = StatRequest {
            kind: WireKind::from(kind).into(),
        };
        let reply = bounded(self.timeout, client.stat(request)).await?;
        Ok(usize::try_from(reply.total).unwrap_or_default())
    }

    /// Closes a connection on the gate.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn disconnect(&self, kind: Kind, target: i64, force: bool) -> Result<(), TransportError> {
        let mut client = self.inner.clone();
        let request = DisconnectRequest {
            kind: WireKind::from(kind).into(),
            target,
            force,
        };
        bounded(self.timeout, client.disconnect(request)).await?;
        Ok(())
    }
}
