//! Connection capability consumed by sessions.
//!
//! A [`Conn`] is one live client connection owned by the network layer
//! (the WebSocket gateway in this crate, or a mock in tests). Sessions only
//! ever talk to connections through this trait.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Frame discriminator passed through to the connection unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    /// UTF-8 text frame.
    Text,
    /// Opaque binary frame.
    #[default]
    Binary,
}

/// Errors raised by a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// The connection has been closed locally or by the peer.
    #[error("connection {0} is closed")]
    ConnectionClosed(i64),

    /// The outbound queue is full; the frame was not enqueued.
    #[error("connection {0} send queue is full")]
    QueueFull(i64),

    /// A text frame carried bytes that are not valid UTF-8.
    #[error("text frame is not valid UTF-8")]
    InvalidText,

    /// The address is not known for this connection.
    #[error("address unavailable for connection {0}")]
    AddrUnavailable(i64),

    /// Transport-level write failure.
    #[error("write failed: {0}")]
    Write(String),
}

/// A live network connection.
///
/// Implementations must be cheap to share behind an `Arc`; all methods take
/// `&self` and are called concurrently from session and group code.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Stable connection identifier.
    fn id(&self) -> i64;

    /// Associates a user id with this connection.
    fn bind(&self, uid: i64);

    /// Clears any user id associated with this connection.
    fn unbind(&self);

    /// Writes a frame and waits until the write has completed.
    async fn send(&self, msg: Bytes, kind: MessageKind) -> Result<(), NetworkError>;

    /// Enqueues a frame without waiting for the write.
    fn push(&self, msg: Bytes, kind: MessageKind) -> Result<(), NetworkError>;

    /// Closes the connection. A forced close drops any queued frames.
    fn close(&self, force: bool) -> Result<(), NetworkError>;

    /// Local socket address.
    fn local_addr(&self) -> Result<SocketAddr, NetworkError>;

    /// Remote socket address.
    fn remote_addr(&self) -> Result<SocketAddr, NetworkError>;

    /// Local IP address.
    fn local_ip(&self) -> Result<IpAddr, NetworkError> {
        self.local_addr().map(|addr| addr.ip())
    }

    /// Remote IP address.
    fn remote_ip(&self) -> Result<IpAddr, NetworkError> {
        self.remote_addr().map(|addr| addr.ip())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory connection used by unit tests across the crate.

    use super::{Conn, MessageKind, NetworkError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) struct MockConn {
        id: i64,
        uid: Mutex<Option<i64>>,
        frames: Mutex<Vec<(Bytes, MessageKind)>>,
        fail: AtomicBool,
        closed: AtomicBool,
    }

    impl MockConn {
        pub(crate) fn new(id: i64) -> Self {
            Self {
                id,
                uid: Mutex::new(None),
                frames: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }
        }

        pub(crate) fn failing(id: i64) -> Self {
            let conn = Self::new(id);
            conn.fail.store(true, Ordering::SeqCst);
            conn
        }

        pub(crate) fn frames(&self) -> Vec<(Bytes, MessageKind)> {
            self.frames.lock().clone()
        }

        pub(crate) fn bound_uid(&self) -> Option<i64> {
            *self.uid.lock()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn record(&self, msg: Bytes, kind: MessageKind) -> Result<(), NetworkError> {
            if self.fail.load(Ordering::SeqCst) || self.is_closed() {
                return Err(NetworkError::ConnectionClosed(self.id));
            }
            self.frames.lock().push((msg, kind));
            Ok(())
        }
    }

    #[async_trait]
    impl Conn for MockConn {
        fn id(&self) -> i64 {
            self.id
        }

        fn bind(&self, uid: i64) {
            *self.uid.lock() = Some(uid);
        }

        fn unbind(&self) {
            *self.uid.lock() = None;
        }

        async fn send(&self, msg: Bytes, kind: MessageKind) -> Result<(), NetworkError> {
            self.record(msg, kind)
        }

        fn push(&self, msg: Bytes, kind: MessageKind) -> Result<(), NetworkError> {
            self.record(msg, kind)
        }

        fn close(&self, _force: bool) -> Result<(), NetworkError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 3553)))
        }

        fn remote_addr(&self) -> Result<SocketAddr, NetworkError> {
            Ok(SocketAddr::from(([10, 0, 0, 7], 50000)))
        }
    }
}
