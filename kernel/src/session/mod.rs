//! Per-connection sessions and broadcast groups.
//!
//! A [`Session`] wraps one connection and records the groups it joined; a
//! [`Group`] indexes its member sessions by connection id and, once bound,
//! by user id. Neither side owns the other: both hold weak references, so
//! either can be dropped independently.
//!
//! Lock order is always session before group. A group never touches a
//! session lock while holding its own, and broadcasts deliver from a
//! snapshot taken under the group lock.

mod error;
mod group;
mod hub;
#[allow(clippy::module_inception)]
mod session;

pub use error::{BroadcastReport, DeliveryFailure, SessionError};
pub use group::Group;
pub use hub::SessionHub;
pub use session::Session;

use std::fmt;

/// Selects how a target id is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Target is a connection id.
    Conn,
    /// Target is a bound user id.
    User,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Conn => write!(f, "conn"),
            Kind::User => write!(f, "user"),
        }
    }
}
