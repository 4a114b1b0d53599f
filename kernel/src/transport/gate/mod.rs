//! Gate role: the RPC surface a gateway exposes to the cluster.

mod client;
mod server;

pub use client::{Fanout, GateClient};
pub use server::GateService;

use async_trait::async_trait;
use bytes::Bytes;
use std::net::IpAddr;
use tonic::Status;

use super::pb::gate as pb;
use crate::session::{BroadcastReport, Kind, SessionError};

/// Application side of the gate role.
///
/// [`SessionHub`](crate::session::SessionHub) is the implementation a
/// gateway serves.
#[async_trait]
pub trait GateProvider: Send + Sync + 'static {
    /// Binds a user id to a connection.
    async fn bind(&self, cid: i64, uid: i64) -> Result<(), Status>;

    /// Unbinds a user id.
    async fn unbind(&self, uid: i64) -> Result<(), Status>;

    /// Remote IP of a connection or user.
    async fn get_ip(&self, kind: Kind, target: i64) -> Result<IpAddr, Status>;

    /// Enqueues a message to one connection or user.
    async fn push(&self, kind: Kind, target: i64, message: Bytes) -> Result<(), Status>;

    /// Enqueues a message to several connections or users.
    async fn multicast(&self, kind: Kind, targets: Vec<i64>, message: Bytes) -> Result<BroadcastReport, Status>;

    /// Enqueues a message to every connection or bound user.
    async fn broadcast(&self, kind: Kind, message: Bytes) -> Result<BroadcastReport, Status>;

    /// Number of connections or bound users.
    async fn stat(&self, kind: Kind) -> Result<usize, Status>;

    /// Closes a connection.
    async fn disconnect(&self, kind: Kind, target: i64, force: bool) -> Result<(), Status>;
}

impl From<SessionError> for Status {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotFound { .. } | SessionError::MemberNotFound { .. } => {
                Status::not_found(err.to_string())
            }
            SessionError::Detached => Status::failed_precondition(err.to_string()),
            SessionError::Network(_) => Status::unavailable(err.to_string()),
        }
    }
}

impl From<Kind> for pb::Kind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Conn => pb::Kind::Conn,
            Kind::User => pb::Kind::User,
        }
    }
}

impl From<pb::Kind> for Kind {
    fn from(kind: pb::Kind) -> Self {
        match kind {
            pb::Kind::Conn => Kind::Conn,
            pb::Kind::User => Kind::User,
        }
    }
}

fn decode_kind(raw: i32) -> Result<Kind, Status> {
    pb::Kind::try_from(raw)
        .map(Kind::from)
        .map_err(|_| Status::invalid_argument(format!("unknown target kind {raw}")))
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
