//! Domain types for the WebSocket gateway.

use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

static NEXT_CONN_ID: AtomicI64 = AtomicI64::new(1);

/// Allocates a process-unique connection id.
#[must_use]
pub fn next_conn_id() -> i64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Errors from a gateway connection loop.
#[derive(Debug, Error)]
pub enum WsError {
    /// WebSocket transport failure.
    #[error("WebSocket connection error: {0}")]
    AxumWs(#[from] axum::Error),

    /// The session could not be registered.
    #[error("session error: {0}")]
    Session(#[from] crate::session::SessionError),
}
