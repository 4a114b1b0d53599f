//! WebSocket gateway: turns accepted WebSocket connections into sessions.

pub mod connection;
pub mod forward;
pub mod handler;
pub mod types;

pub use connection::WsConn;
pub use forward::NodeForwarder;
pub use handler::{Gateway, InboundHandler, LoggingHandler, ws_router};
pub use types::{WsError, next_conn_id};
