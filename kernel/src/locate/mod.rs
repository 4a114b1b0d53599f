//! User location: which gateway a user is connected through.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised by locator backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocateError {
    /// The backend could not be reached.
    #[error("locator backend failed: {0}")]
    Backend(String),
}

/// Maps user ids to the gateway instance holding their connection.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Gateway instance id of `uid`, if the user is located.
    async fn locate_gate(&self, uid: i64) -> Result<Option<String>, LocateError>;

    /// Records that `uid` is connected through gateway `gid`.
    async fn bind_gate(&self, uid: i64, gid: &str) -> Result<(), LocateError>;

    /// Forgets `uid` if it is still recorded on gateway `gid`.
    async fn unbind_gate(&self, uid: i64, gid: &str) -> Result<(), LocateError>;
}

/// In-process locator.
#[derive(Debug, Default)]
pub struct MemoryLocator {
    gates: RwLock<HashMap<i64, String>>,
}

impl MemoryLocator {
    /// Creates an empty locator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Locator for MemoryLocator {
    async fn locate_gate(&self, uid: i64) -> Result<Option<String>, LocateError> {
        Ok(self.gates.read().get(&uid).cloned())
    }

    async fn bind_gate(&self, uid: i64, gid: &str) -> Result<(), LocateError> {
        self.gates.write().insert(uid, gid.to_string());
        debug!(uid, gid, "user located");
        Ok(())
    }

    async fn unbind_gate(&self, uid: i64, gid: &str) -> Result<(), LocateError> {
        let mut gates = self.gates.write();
        if gates.get(&uid).is_some_and(|current| current == gid) {
            gates.remove(&uid);
        }
        Ok(())
    }
}
