use thiserror::Error;

use super::Kind;
use crate::network::NetworkError;

/// Errors raised by session, group and hub operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session has no attached connection (before `init` or after `reset`).
    #[error("session has no attached connection")]
    Detached,

    /// The connection id is not a member of the group.
    #[error("member {cid} not found in group {group}")]
    MemberNotFound {
        /// Group id.
        group: u64,
        /// Connection id that was looked up.
        cid: i64,
    },

    /// No live session matches the target.
    #[error("{kind} session {target} not found")]
    SessionNotFound {
        /// How the target was interpreted.
        kind: Kind,
        /// Connection or user id.
        target: i64,
    },

    /// The underlying connection failed.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// A member that did not receive a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Connection id of the member (or the requested target when no session matched).
    pub cid: i64,
    /// Why delivery failed.
    pub error: SessionError,
}

/// Outcome of a fan-out delivery.
///
/// Delivery never stops at the first failure; every member is attempted and
/// the failing ones are enumerated here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connection ids that received the message.
    pub delivered: Vec<i64>,
    /// Members that did not.
    pub failures: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    /// Number of members attempted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }

    /// True when every attempted member received the message.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Connection ids that failed.
    #[must_use]
    pub fn failed_cids(&self) -> Vec<i64> {
        self.failures.iter().map(|f| f.cid).collect()
    }

    pub(crate) fn record(&mut self, cid: i64, result: Result<(), SessionError>) {
        match result {
            Ok(()) => self.delivered.push(cid),
            Err(error) => self.failures.push(DeliveryFailure { cid, error }),
        }
    }
}
