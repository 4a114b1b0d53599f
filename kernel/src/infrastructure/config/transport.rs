//! Cluster RPC transport settings.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use super::ConfigError;
use crate::transport::{ClientOptions, ServerOptions, TransportOptions};

/// RPC listener and client settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportSettings {
    /// Host the RPC server binds to.
    pub host: String,
    /// Port the RPC server binds to; 0 picks one.
    pub port: u16,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum in-flight calls per channel.
    pub concurrency_limit: usize,
}

impl TransportSettings {
    /// Transport options for an instance called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if host and port do not form
    /// a socket address.
    pub fn to_options(&self, name: &str) -> Result<TransportOptions, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        let addr: SocketAddr = raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))?;
        Ok(TransportOptions {
            server: ServerOptions { addr },
            client: ClientOptions {
                name: name.to_string(),
                timeout: Duration::from_secs(self.timeout_secs),
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                concurrency_limit: self.concurrency_limit,
            },
        })
    }
}
