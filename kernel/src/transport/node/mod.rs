//! Node role: the RPC surface a logic node exposes to gateways.

mod client;
mod server;

pub use client::NodeClient;
pub use server::NodeService;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tonic::Status;

use super::pb::node as pb;

/// Connection lifecycle event raised by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A client connected.
    Connect,
    /// A client reconnected.
    Reconnect,
    /// A client disconnected.
    Disconnect,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connect => write!(f, "connect"),
            Event::Reconnect => write!(f, "reconnect"),
            Event::Disconnect => write!(f, "disconnect"),
        }
    }
}

impl From<Event> for pb::Event {
    fn from(event: Event) -> Self {
        match event {
            Event::Connect => pb::Event::Connect,
            Event::Reconnect => pb::Event::Reconnect,
            Event::Disconnect => pb::Event::Disconnect,
        }
    }
}

impl TryFrom<i32> for Event {
    type Error = Status;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match pb::Event::try_from(raw) {
            Ok(pb::Event::Connect) => Ok(Event::Connect),
            Ok(pb::Event::Reconnect) => Ok(Event::Reconnect),
            Ok(pb::Event::Disconnect) => Ok(Event::Disconnect),
            Ok(pb::Event::Unknown) | Err(_) => {
                Err(Status::invalid_argument(format!("unknown event {raw}")))
            }
        }
    }
}

/// A client message forwarded from a gateway to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Gateway instance id.
    pub gid: String,
    /// Node instance id the message is addressed to; empty for any.
    pub nid: String,
    /// Connection id on the gateway.
    pub cid: i64,
    /// Bound user id, if any.
    pub uid: Option<i64>,
    /// Raw message.
    pub message: Bytes,
}

/// Application side of the node role.
#[async_trait]
pub trait NodeProvider: Send + Sync + 'static {
    /// Handles a connection lifecycle event.
    async fn trigger(&self, event: Event, gid: String, cid: i64, uid: Option<i64>) -> Result<(), Status>;

    /// Handles a forwarded client message.
    async fn deliver(&self, delivery: Delivery) -> Result<(), Status>;
}

fn wire_uid(uid: Option<i64>) -> i64 {
    uid.unwrap_or_default()
}

fn local_uid(uid: i64) -> Option<i64> {
    (uid != 0).then_some(uid)
}
