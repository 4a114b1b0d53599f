//! Per-connection session state.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::{Group, SessionError};
use crate::network::{Conn, MessageKind};

#[derive(Default)]
struct State {
    uid: Option<i64>,
    conn: Option<Arc<dyn Conn>>,
    groups: HashMap<u64, Weak<Group>>,
}

/// A connection bound to an optional user id and a set of groups.
///
/// Sessions are pooling friendly: [`Session::reset`] detaches everything and
/// the same value can be [`Session::init`]ialised again for a new connection.
#[derive(Default)]
pub struct Session {
    state: RwLock<State>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Session")
            .field("cid", &state.conn.as_ref().map(|c| c.id()))
            .field("uid", &state.uid)
            .field("groups", &state.groups.len())
            .finish()
    }
}

impl Session {
    /// Creates an empty, detached session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a connection and starts with an empty group set.
    pub fn init(&self, conn: Arc<dyn Conn>) {
        let mut state = self.state.write();
        state.conn = Some(conn);
        state.groups = HashMap::new();
    }

    /// Detaches the connection and clears the user id and group set.
    ///
    /// Groups are not notified; callers quit groups first.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.uid = None;
        state.conn = None;
        state.groups = HashMap::new();
    }

    /// Connection id of the attached connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] if no connection is attached.
    pub fn cid(&self) -> Result<i64, SessionError> {
        let state = self.state.read();
        state.conn.as_ref().map(|c| c.id()).ok_or(SessionError::Detached)
    }

    /// Bound user id, if any.
    #[must_use]
    pub fn uid(&self) -> Option<i64> {
        self.state.read().uid
    }

    /// True when a connection is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state.read().conn.is_some()
    }

    /// Groups this session currently belongs to.
    #[must_use]
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let state = self.state.read();
        state.groups.values().filter_map(Weak::upgrade).collect()
    }

    /// True when the session lists the group in its local set.
    #[must_use]
    pub fn in_group(&self, group: &Group) -> bool {
        self.state.read().groups.contains_key(&group.id())
    }

    /// Binds a user id.
    ///
    /// Every joined group has its user index updated: an entry for the
    /// previous user id that still points at this session is removed before
    /// the new one is inserted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] if no connection is attached.
    pub fn bind(&self, uid: i64) -> Result<(), SessionError> {
        let mut state = self.state.write();
        let conn = state.conn.clone().ok_or(SessionError::Detached)?;
        let cid = conn.id();
        let previous = state.uid.replace(uid);
        conn.bind(uid);

        for group in state.groups.values().filter_map(Weak::upgrade) {
            if let Some(old) = previous.filter(|old| *old != uid) {
                group.remove_user_map(old, cid);
            }
            group.add_user_map(uid, cid);
        }
        debug!(cid, uid, ?previous, "session bound");
        Ok(())
    }

    /// Clears the user id and removes it from every joined group's user index.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] if no connection is attached.
    pub fn unbind(&self) -> Result<(), SessionError> {
        let mut state = self.state.write();
        let conn = state.conn.clone().ok_or(SessionError::Detached)?;
        let cid = conn.id();
        let Some(uid) = state.uid.take() else {
            return Ok(());
        };
        conn.unbind();

        for group in state.groups.values().filter_map(Weak::upgrade) {
            group.remove_user_map(uid, cid);
        }
        debug!(cid, uid, "session unbound");
        Ok(())
    }

    /// Closes the underlying connection. Group membership is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] without a connection, or the
    /// connection's own close error.
    pub fn close(&self, force: bool) -> Result<(), SessionError> {
        let state = self.state.write();
        let conn = state.conn.as_ref().ok_or(SessionError::Detached)?;
        conn.close(force).map_err(SessionError::from)
    }

    /// Local IP of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] or the connection's address error.
    pub fn local_ip(&self) -> Result<IpAddr, SessionError> {
        Ok(self.conn()?.local_ip()?)
    }

    /// Local address of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] or the connection's address error.
    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.conn()?.local_addr()?)
    }

    /// Remote IP of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] or the connection's address error.
    pub fn remote_ip(&self) -> Result<IpAddr, SessionError> {
        Ok(self.conn()?.remote_ip()?)
    }

    /// Remote address of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] or the connection's address error.
    pub fn remote_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.conn()?.remote_addr()?)
    }

    /// Sends a frame and waits for the write to complete.
    ///
    /// The session lock is only held long enough to clone the connection
    /// handle; the write itself happens outside it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] or the connection's write error.
    pub async fn send(&self, msg: Bytes, kind: Option<MessageKind>) -> Result<(), SessionError> {
        let conn = self.conn()?;
        conn.send(msg, kind.unwrap_or_default()).await?;
        Ok(())
    }

    /// Enqueues a frame without waiting for the write.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] or the connection's queue error.
    pub fn push(&self, msg: Bytes, kind: Option<MessageKind>) -> Result<(), SessionError> {
        let conn = self.conn()?;
        conn.push(msg, kind.unwrap_or_default())?;
        Ok(())
    }

    /// Joins each group, registering this session in the group's member
    /// index (and user index, when bound) and recording the group locally.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] if no connection is attached; no
    /// group is touched in that case.
    pub fn join_group(self: &Arc<Self>, groups: &[&Arc<Group>]) -> Result<(), SessionError> {
        let mut state = self.state.write();
        let cid = state.conn.as_ref().map(|c| c.id()).ok_or(SessionError::Detached)?;
        let uid = state.uid;

        for group in groups {
            group.add(cid, uid, Arc::downgrade(self));
            state.groups.insert(group.id(), Arc::downgrade(group));
        }
        Ok(())
    }

    /// Leaves each group.
    ///
    /// Returns one error per group that did not contain this session; the
    /// remaining groups are still processed and every listed group is
    /// dropped from the local set.
    pub fn quit_group(&self, groups: &[&Arc<Group>]) -> Vec<SessionError> {
        let mut state = self.state.write();
        let Some(cid) = state.conn.as_ref().map(|c| c.id()) else {
            return vec![SessionError::Detached];
        };

        let mut failures = Vec::new();
        for group in groups {
            if let Err(e) = group.remove(cid) {
                warn!(cid, group = group.id(), error = %e, "quit group failed");
                failures.push(e);
            }
            state.groups.remove(&group.id());
        }
        failures
    }

    /// Leaves every group this session belongs to.
    pub fn quit_all_groups(&self) -> Vec<SessionError> {
        let groups = self.groups();
        let refs: Vec<&Arc<Group>> = groups.iter().collect();
        self.quit_group(&refs)
    }

    // Group-initiated removal. Holds the session lock across the group
    // update so a concurrent join cannot be undone half way.
    pub(crate) fn leave(&self, group: &Group, cid: i64) -> Result<(), SessionError> {
        let mut state = self.state.write();
        if state.conn.as_ref().map(|c| c.id()) != Some(cid) {
            return Err(SessionError::MemberNotFound { group: group.id(), cid });
        }
        group.remove(cid)?;
        state.groups.remove(&group.id());
        Ok(())
    }

    fn conn(&self) -> Result<Arc<dyn Conn>, SessionError> {
        self.state.read().conn.clone().ok_or(SessionError::Detached)
    }
}
