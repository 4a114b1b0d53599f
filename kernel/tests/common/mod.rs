//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_kernel::network::{Conn, MessageKind, NetworkError};
use relay_kernel::session::Session;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Connection that records every frame written to it.
pub struct RecordingConn {
    id: i64,
    uid: Mutex<Option<i64>>,
    frames: Mutex<Vec<Bytes>>,
    broken: AtomicBool,
    closed: AtomicBool,
}

impl RecordingConn {
    pub fn new(id: i64) -> Arc<Self> {
        Arc::new(Self {
            id,
            uid: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn broken(id: i64) -> Arc<Self> {
        let conn = Self::new(id);
        conn.broken.store(true, Ordering::SeqCst);
        conn
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    pub fn bound_uid(&self) -> Option<i64> {
        *self.uid.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, msg: Bytes) -> Result<(), NetworkError> {
        if self.broken.load(Ordering::SeqCst) || self.is_closed() {
            return Err(NetworkError::ConnectionClosed(self.id));
        }
        self.frames.lock().push(msg);
        Ok(())
    }
}

#[async_trait]
impl Conn for RecordingConn {
    fn id(&self) -> i64 {
        self.id
    }

    fn bind(&self, uid: i64) {
        *self.uid.lock() = Some(uid);
    }

    fn unbind(&self) {
        *self.uid.lock() = None;
    }

    async fn send(&self, msg: Bytes, _kind: MessageKind) -> Result<(), NetworkError> {
        self.record(msg)
    }

    fn push(&self, msg: Bytes, _kind: MessageKind) -> Result<(), NetworkError> {
        self.record(msg)
    }

    fn close(&self, _force: bool) -> Result<(), NetworkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 3553)))
    }

    fn remote_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(SocketAddr::from(([192, 168, 1, 20], 40000 + u16::try_from(self.id % 1000).unwrap_or(0))))
    }
}

/// Session attached to a fresh recording connection.
pub fn session(id: i64) -> (Arc<Session>, Arc<RecordingConn>) {
    let conn = RecordingConn::new(id);
    let session = Arc::new(Session::new());
    session.init(conn.clone());
    (session, conn)
}
