//! Configuration management for the relay kernel.
//!
//! Settings are layered with the `config` crate: compiled defaults first,
//! then `RELAY_`-prefixed environment variables with `__` separating
//! nested keys (`RELAY_MESH__TIMEOUT=5`).
//!
//! # Example
//!
//! ```no_run
//! use relay_kernel::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! ```

pub mod gateway;
pub mod mesh;
pub mod server;
pub mod telemetry;
pub mod transport;

pub use gateway::GatewaySettings;
pub use mesh::MeshSettings;
pub use server::ServerSettings;
pub use telemetry::TelemetrySettings;
pub use transport::TransportSettings;

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A codec name does not resolve.
    #[error("unknown codec {0:?}")]
    UnknownCodec(String),

    /// An encryptor or decryptor name does not resolve.
    #[error("unknown cipher {0:?}")]
    UnknownCipher(String),

    /// A cipher was selected without key material.
    #[error("cipher {0:?} selected but no cipher key is configured")]
    MissingCipherKey(String),

    /// A host and port do not form a socket address.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

/// Top-level configuration for the relay kernel.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Control-plane server settings.
    pub server: ServerSettings,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
    /// Cluster RPC transport settings.
    pub transport: TransportSettings,
    /// Mesh node settings.
    #[serde(default)]
    pub mesh: MeshSettings,
    /// WebSocket gateway settings.
    pub gateway: GatewaySettings,
}

impl Settings {
    /// Creates a new settings instance from environment variables and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_builder(Config::builder().add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        ))
    }

    /// Applies the compiled defaults underneath `builder`'s sources and
    /// deserializes the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let s = builder
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 9090)?
            .set_default("telemetry.service_name", "relay-kernel")?
            .set_default("telemetry.sampling_ratio", 1.0)?
            .set_default("transport.host", "127.0.0.1")?
            .set_default("transport.port", 0)?
            .set_default("transport.timeout_secs", 3)?
            .set_default("transport.connect_timeout_ms", 1000)?
            .set_default("transport.concurrency_limit", 256)?
            .set_default("gateway.id", "gate-1")?
            .set_default("gateway.queue_capacity", 256)?
            .build()?;

        Ok(s.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_load_without_sources() {
        let settings = Settings::from_builder(Config::builder()).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.transport.timeout_secs, 3);
        assert_eq!(settings.gateway.queue_capacity, 256);
        assert!(settings.mesh.name.is_none());
        assert!(settings.mesh.timeout.is_none());
    }

    #[test]
    fn sources_override_defaults() {
        let builder = Config::builder()
            .set_override("mesh.timeout", 5)
            .unwrap()
            .set_override("mesh.codec", "json")
            .unwrap()
            .set_override("mesh.cipher_key", "hunter2")
            .unwrap()
            .set_override("transport.port", 7000)
            .unwrap();
        let settings = Settings::from_builder(builder).unwrap();
        assert_eq!(settings.mesh.timeout, Some(5));
        assert_eq!(settings.mesh.codec.as_deref(), Some("json"));
        assert_eq!(
            settings.mesh.cipher_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("hunter2".to_string())
        );
        assert_eq!(settings.transport.port, 7000);
    }

    #[test]
    fn transport_options_from_settings() {
        let settings = Settings::from_builder(Config::builder()).unwrap();
        let options = settings.transport.to_options("gate-1").unwrap();
        assert_eq!(options.client.name, "gate-1");
        assert_eq!(options.client.timeout, std::time::Duration::from_secs(3));
        assert_eq!(options.server.addr.port(), 0);

        let mut bad = settings.transport.clone();
        bad.host = "not a host".to_string();
        assert!(matches!(bad.to_options("x"), Err(ConfigError::InvalidAddress(_))));
    }
}
