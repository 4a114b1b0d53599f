//! Named fan-out sets of sessions.

use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::{BroadcastReport, Session, SessionError};
use crate::network::MessageKind;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct Index {
    members: HashMap<i64, Weak<Session>>,
    // Secondary index: uid -> cid. Every value is a key of `members`.
    users: HashMap<i64, i64>,
}

/// A named set of sessions indexed by connection id and by bound user id.
///
/// A group never owns its members; dropping the last `Arc<Session>` makes the
/// member unreachable and it is pruned on the next broadcast. The group's
/// lifetime belongs to whoever created it.
pub struct Group {
    id: u64,
    name: String,
    index: RwLock<Index>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("members", &index.members.len())
            .field("users", &index.users.len())
            .finish()
    }
}

impl Group {
    /// Creates an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            index: RwLock::new(Index::default()),
        }
    }

    /// Process-unique group id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().members.len()
    }

    /// True when the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the connection id is a member.
    #[must_use]
    pub fn contains(&self, cid: i64) -> bool {
        self.index.read().members.contains_key(&cid)
    }

    /// Member session for a connection id.
    #[must_use]
    pub fn member(&self, cid: i64) -> Option<Arc<Session>> {
        self.index.read().members.get(&cid).and_then(Weak::upgrade)
    }

    /// Member session bound to a user id.
    #[must_use]
    pub fn user(&self, uid: i64) -> Option<Arc<Session>> {
        let index = self.index.read();
        let cid = index.users.get(&uid)?;
        index.members.get(cid).and_then(Weak::upgrade)
    }

    /// Connection ids of all members.
    #[must_use]
    pub fn cids(&self) -> Vec<i64> {
        self.index.read().members.keys().copied().collect()
    }

    /// User ids of all bound members.
    #[must_use]
    pub fn uids(&self) -> Vec<i64> {
        self.index.read().users.keys().copied().collect()
    }

    pub(crate) fn add(&self, cid: i64, uid: Option<i64>, session: Weak<Session>) {
        let mut index = self.index.write();
        index.members.insert(cid, session);
        if let Some(uid) = uid {
            index.users.insert(uid, cid);
        }
    }

    pub(crate) fn add_user_map(&self, uid: i64, cid: i64) {
        let mut index = self.index.write();
        if index.members.contains_key(&cid) {
            index.users.insert(uid, cid);
        }
    }

    pub(crate) fn remove_user_map(&self, uid: i64, cid: i64) {
        let mut index = self.index.write();
        if index.users.get(&uid) == Some(&cid) {
            index.users.remove(&uid);
        }
    }

    pub(crate) fn remove(&self, cid: i64) -> Result<Weak<Session>, SessionError> {
        let mut index = self.index.write();
        let session = index
            .members
            .remove(&cid)
            .ok_or(SessionError::MemberNotFound { group: self.id, cid })?;
        index.users.retain(|_, member| *member != cid);
        Ok(session)
    }

    /// Removes a member from the group side, also dropping the group from
    /// that session's local set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MemberNotFound`] if `cid` is not a member.
    pub fn kick(&self, cid: i64) -> Result<(), SessionError> {
        let member = self
            .index
            .read()
            .members
            .get(&cid)
            .cloned()
            .ok_or(SessionError::MemberNotFound { group: self.id, cid })?;

        // Session lock first, like every other membership change.
        match member.upgrade() {
            Some(session) => session.leave(self, cid)?,
            None => self.remove_dead(cid)?,
        }
        debug!(group = self.id, cid, "member kicked");
        Ok(())
    }

    fn remove_dead(&self, cid: i64) -> Result<(), SessionError> {
        let mut index = self.index.write();
        if !index.members.get(&cid).is_some_and(|s| s.strong_count() == 0) {
            return Err(SessionError::MemberNotFound { group: self.id, cid });
        }
        index.members.remove(&cid);
        index.users.retain(|_, member| *member != cid);
        Ok(())
    }

    /// Sends to every member, waiting for each write.
    pub async fn send(&self, msg: Bytes, kind: Option<MessageKind>) -> BroadcastReport {
        let targets = self.snapshot_all();
        self.deliver_sync(targets, msg, kind).await
    }

    /// Sends to the members bound to any of `uids`.
    pub async fn send_to(&self, uids: &[i64], msg: Bytes, kind: Option<MessageKind>) -> BroadcastReport {
        let targets = self.snapshot_users(uids);
        self.deliver_sync(targets, msg, kind).await
    }

    /// Enqueues to every member without waiting for writes.
    pub fn push(&self, msg: &Bytes, kind: Option<MessageKind>) -> BroadcastReport {
        let targets = self.snapshot_all();
        self.deliver_async(targets, msg, kind)
    }

    /// Enqueues to the members bound to any of `uids`.
    pub fn push_to(&self, uids: &[i64], msg: &Bytes, kind: Option<MessageKind>) -> BroadcastReport {
        let targets = self.snapshot_users(uids);
        self.deliver_async(targets, msg, kind)
    }

    fn snapshot_all(&self) -> Vec<(i64, Weak<Session>)> {
        let index = self.index.read();
        index
            .members
            .iter()
            .map(|(cid, session)| (*cid, session.clone()))
            .collect()
    }

    fn snapshot_users(&self, uids: &[i64]) -> Vec<(i64, Weak<Session>)> {
        let index = self.index.read();
        let mut seen = HashSet::with_capacity(uids.len());
        uids.iter()
            .filter_map(|uid| index.users.get(uid))
            .filter(|cid| seen.insert(**cid))
            .filter_map(|cid| index.members.get(cid).map(|s| (*cid, s.clone())))
            .collect()
    }

    async fn deliver_sync(
        &self,
        targets: Vec<(i64, Weak<Session>)>,
        msg: Bytes,
        kind: Option<MessageKind>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut live = Vec::with_capacity(targets.len());
        let mut dead = Vec::new();

        for (cid, session) in targets {
            match session.upgrade() {
                Some(session) => live.push((cid, session)),
                None => dead.push(cid),
            }
        }

        let results = join_all(live.iter().map(|(_, session)| session.send(msg.clone(), kind))).await;
        for ((cid, _), result) in live.iter().zip(results) {
            report.record(*cid, result);
        }
        self.finish(report, dead)
    }

    fn deliver_async(
        &self,
        targets: Vec<(i64, Weak<Session>)>,
        msg: &Bytes,
        kind: Option<MessageKind>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();

        for (cid, session) in targets {
            match session.upgrade() {
                Some(session) => report.record(cid, session.push(msg.clone(), kind)),
                None => dead.push(cid),
            }
        }
        self.finish(report, dead)
    }

    fn finish(&self, mut report: BroadcastReport, dead: Vec<i64>) -> BroadcastReport {
        if !dead.is_empty() {
            let mut index = self.index.write();
            for cid in &dead {
                let still_dead = index
                    .members
                    .get(cid)
                    .is_some_and(|s| s.strong_count() == 0);
                if still_dead {
                    index.members.remove(cid);
                    index.users.retain(|_, member| member != cid);
                }
            }
        }
        for cid in dead {
            report.record(cid, Err(SessionError::Detached));
        }

        if !report.is_complete() {
            warn!(
                group = self.id,
                failed = report.failures.len(),
                delivered = report.delivered.len(),
                "broadcast partially failed"
            );
            metrics::counter!("relay_broadcast_failures_total").increment(report.failures.len() as u64);
        }
        report
    }
}
