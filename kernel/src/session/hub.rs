//! Registry of live sessions on a gateway.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tonic::Status;
use tracing::{debug, info, warn};

use super::{BroadcastReport, Group, Kind, Session, SessionError};
use crate::infrastructure::audit::{self, AuditEvent};
use crate::transport::gate::GateProvider;

#[derive(Default)]
struct Index {
    sessions: HashMap<i64, Arc<Session>>,
    users: HashMap<i64, i64>,
}

/// Live sessions indexed by connection id and by bound user id, plus the
/// named groups created on this gateway.
///
/// The hub is what the gate RPC role is served from.
#[derive(Default)]
pub struct SessionHub {
    index: RwLock<Index>,
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl SessionHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an initialised session under its connection id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] if the session has no connection.
    pub fn insert(&self, session: Arc<Session>) -> Result<(), SessionError> {
        let cid = session.cid()?;
        let replaced = self.index.write().sessions.insert(cid, session);
        if replaced.is_none() {
            metrics::gauge!("relay_sessions_online").increment(1.0);
        }
        debug!(cid, replaced = replaced.is_some(), "session registered");
        Ok(())
    }

    /// Unregisters a session, quits all of its groups and resets it.
    pub fn remove(&self, cid: i64) -> Option<Arc<Session>> {
        let session = {
            let mut index = self.index.write();
            let session = index.sessions.remove(&cid)?;
            index.users.retain(|_, member| *member != cid);
            session
        };

        for error in session.quit_all_groups() {
            warn!(cid, error = %error, "group cleanup failed");
        }
        session.reset();
        metrics::gauge!("relay_sessions_online").decrement(1.0);
        debug!(cid, "session removed");
        Some(session)
    }

    /// Looks up a session by connection or user id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] when nothing matches.
    pub fn session(&self, kind: Kind, target: i64) -> Result<Arc<Session>, SessionError> {
        let index = self.index.read();
        let cid = match kind {
            Kind::Conn => Some(target),
            Kind::User => index.users.get(&target).copied(),
        };
        cid.and_then(|cid| index.sessions.get(&cid).cloned())
            .ok_or(SessionError::SessionNotFound { kind, target })
    }

    /// Binds a user id to a connection.
    ///
    /// A different connection already bound to the same user id is unbound
    /// first, so a user id maps to at most one connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] for an unknown connection.
    pub fn bind(&self, cid: i64, uid: i64) -> Result<(), SessionError> {
        let session = self.session(Kind::Conn, cid)?;
        let displaced = {
            let index = self.index.read();
            index
                .users
                .get(&uid)
                .filter(|bound| **bound != cid)
                .and_then(|bound| index.sessions.get(bound).cloned())
        };
        if let Some(other) = displaced {
            if let Err(e) = other.unbind() {
                warn!(uid, error = %e, "failed to unbind displaced session");
            }
        }

        let previous = session.uid();
        session.bind(uid)?;

        let mut index = self.index.write();
        if let Some(previous) = previous {
            if index.users.get(&previous) == Some(&cid) {
                index.users.remove(&previous);
            }
        }
        index.users.insert(uid, cid);
        Ok(())
    }

    /// Unbinds a user id from whichever connection holds it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] if the user id is not bound.
    pub fn unbind(&self, uid: i64) -> Result<(), SessionError> {
        let session = {
            let mut index = self.index.write();
            let cid = index
                .users
                .remove(&uid)
                .ok_or(SessionError::SessionNotFound { kind: Kind::User, target: uid })?;
            index.sessions.get(&cid).cloned()
        };
        match session {
            Some(session) => session.unbind(),
            None => Ok(()),
        }
    }

    /// Enqueues a message to one session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] or the session's push error.
    pub fn push(&self, kind: Kind, target: i64, msg: Bytes) -> Result<(), SessionError> {
        self.session(kind, target)?.push(msg, None)
    }

    /// Enqueues a message to several sessions, reporting each failure.
    pub fn multicast(&self, kind: Kind, targets: &[i64], msg: &Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut seen = HashSet::with_capacity(targets.len());
        for target in targets.iter().filter(|t| seen.insert(**t)) {
            let result = self
                .session(kind, *target)
                .and_then(|session| session.push(msg.clone(), None));
            report.record(*target, result);
        }
        report
    }

    /// Enqueues a message to every session, or every bound session for
    /// [`Kind::User`].
    pub fn broadcast(&self, kind: Kind, msg: &Bytes) -> BroadcastReport {
        let targets: Vec<(i64, Arc<Session>)> = {
            let index = self.index.read();
            match kind {
                Kind::Conn => index
                    .sessions
                    .iter()
                    .map(|(cid, s)| (*cid, s.clone()))
                    .collect(),
                Kind::User => index
                    .users
                    .values()
                    .filter_map(|cid| index.sessions.get(cid).map(|s| (*cid, s.clone())))
                    .collect(),
            }
        };

        let mut report = BroadcastReport::default();
        for (cid, session) in targets {
            report.record(cid, session.push(msg.clone(), None));
        }
        report
    }

    /// Number of connections, or of bound users for [`Kind::User`].
    #[must_use]
    pub fn stat(&self, kind: Kind) -> usize {
        let index = self.index.read();
        match kind {
            Kind::Conn => index.sessions.len(),
            Kind::User => index.users.len(),
        }
    }

    /// Closes a session's connection. Cleanup happens when the connection
    /// task observes the close and calls [`SessionHub::remove`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] or the close error.
    pub fn disconnect(&self, kind: Kind, target: i64, force: bool) -> Result<(), SessionError> {
        let session = self.session(kind, target)?;
        session.close(force)?;
        if force {
            audit::log_audit(&AuditEvent::ForcedDisconnect {
                kind: kind.to_string(),
                target,
            });
        }
        info!(%kind, target, force, "session disconnected");
        Ok(())
    }

    /// Remote IP of a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] or the address error.
    pub fn remote_ip(&self, kind: Kind, target: i64) -> Result<IpAddr, SessionError> {
        self.session(kind, target)?.remote_ip()
    }

    /// Returns the named group, creating it on first use.
    pub fn group(&self, name: &str) -> Arc<Group> {
        if let Some(group) = self.groups.read().get(name) {
            return group.clone();
        }
        self.groups
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Group::new(name)))
            .clone()
    }

    /// Forgets a named group. Members keep a dangling weak entry that
    /// disappears from their group list immediately.
    pub fn remove_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.write().remove(name)
    }
}

#[async_trait]
impl GateProvider for SessionHub {
    async fn bind(&self, cid: i64, uid: i64) -> Result<(), Status> {
        Ok(SessionHub::bind(self, cid, uid)?)
    }

    async fn unbind(&self, uid: i64) -> Result<(), Status> {
        Ok(SessionHub::unbind(self, uid)?)
    }

    async fn get_ip(&self, kind: Kind, target: i64) -> Result<IpAddr, Status> {
        Ok(self.remote_ip(kind, target)?)
    }

    async fn push(&self, kind: Kind, target: i64, message: Bytes) -> Result<(), Status> {
        Ok(SessionHub::push(self, kind, target, message)?)
    }

    async fn multicast(&self, kind: Kind, targets: Vec<i64>, message: Bytes) -> Result<BroadcastReport, Status> {
        Ok(SessionHub::multicast(self, kind, &targets, &message))
    }

    async fn broadcast(&self, kind: Kind, message: Bytes) -> Result<BroadcastReport, Status> {
        Ok(SessionHub::broadcast(self, kind, &message))
    }

    async fn stat(&self, kind: Kind) -> Result<usize, Status> {
        Ok(SessionHub::stat(self, kind))
    }

    async fn disconnect(&self, kind: Kind, target: i64, force: bool) -> Result<(), Status> {
        Ok(SessionHub::disconnect(self, kind, target, force)?)
    }
}
