//! Mesh option resolution.
//!
//! Every option is taken from, in order of precedence: an explicit
//! [`MeshOverrides`] value, the external [`MeshSettings`], the compiled
//! default. The snapshot is resolved once and never changes afterwards.

use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{CipherError, CipherRegistry, Decryptor, Encryptor};
use crate::encoding::{Codec, CodecError, CodecRegistry};
use crate::infrastructure::config::{ConfigError, MeshSettings};
use crate::locate::Locator;
use crate::registry::Registry;
use crate::transport::Transporter;

/// Default instance name.
pub const DEFAULT_NAME: &str = "mesh";
/// Default codec name.
pub const DEFAULT_CODEC: &str = "proto";
/// Default RPC timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Explicit caller options; anything set here wins over configuration.
#[derive(Default, Clone)]
pub struct MeshOverrides {
    name: Option<String>,
    codec: Option<Arc<dyn Codec>>,
    timeout: Option<Duration>,
    locator: Option<Arc<dyn Locator>>,
    registry: Option<Arc<dyn Registry>>,
    transporter: Option<Arc<Transporter>>,
    encryptor: Option<Arc<dyn Encryptor>>,
    decryptor: Option<Arc<dyn Decryptor>>,
}

impl MeshOverrides {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Sets the RPC timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the user locator.
    #[must_use]
    pub fn with_locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Sets the service registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the transporter.
    #[must_use]
    pub fn with_transporter(mut self, transporter: Arc<Transporter>) -> Self {
        self.transporter = Some(transporter);
        self
    }

    /// Sets the encryptor.
    #[must_use]
    pub fn with_encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Sets the decryptor.
    #[must_use]
    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }
}

/// Resolved, immutable mesh configuration.
#[derive(Clone)]
pub struct MeshOptions {
    /// Instance name.
    pub name: String,
    /// Message codec.
    pub codec: Arc<dyn Codec>,
    /// RPC timeout.
    pub timeout: Duration,
    /// User locator.
    pub locator: Option<Arc<dyn Locator>>,
    /// Service registry.
    pub registry: Option<Arc<dyn Registry>>,
    /// Transporter.
    pub transporter: Option<Arc<Transporter>>,
    /// Encryptor; payloads are sent in the clear when absent.
    pub encryptor: Option<Arc<dyn Encryptor>>,
    /// Decryptor; payloads are read in the clear when absent.
    pub decryptor: Option<Arc<dyn Decryptor>>,
}

impl std::fmt::Debug for MeshOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshOptions")
            .field("name", &self.name)
            .field("codec", &self.codec.name())
            .field("timeout", &self.timeout)
            .field("encryptor", &self.encryptor.as_ref().map(|e| e.name()))
            .field("decryptor", &self.decryptor.as_ref().map(|d| d.name()))
            .finish_non_exhaustive()
    }
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

fn cipher_error(err: CipherError) -> ConfigError {
    match err {
        CipherError::MissingKey(name) => ConfigError::MissingCipherKey(name),
        CipherError::Unknown(name) => ConfigError::UnknownCipher(name),
        other => ConfigError::UnknownCipher(other.to_string()),
    }
}

impl MeshOptions {
    /// Resolves the snapshot from defaults, `settings` and `overrides`.
    ///
    /// Names in `settings` are looked up in `codecs` and `ciphers` only when
    /// no override supersedes them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCodec`] or [`ConfigError::UnknownCipher`]
    /// for names that do not resolve.
    pub fn resolve(
        settings: &MeshSettings,
        overrides: MeshOverrides,
        codecs: &CodecRegistry,
        ciphers: &CipherRegistry,
    ) -> Result<Self, ConfigError> {
        let name = overrides
            .name
            .or_else(|| present(settings.name.as_ref()).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        let codec = match overrides.codec {
            Some(codec) => codec,
            None => {
                let name = present(settings.codec.as_ref()).unwrap_or(DEFAULT_CODEC);
                codecs.invoke(name).map_err(|e| match e {
                    CodecError::Unknown(name) => ConfigError::UnknownCodec(name),
                    other => ConfigError::UnknownCodec(other.to_string()),
                })?
            }
        };

        let timeout = overrides
            .timeout
            .or_else(|| {
                settings
                    .timeout
                    .and_then(|secs| u64::try_from(secs).ok())
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
            })
            .unwrap_or(DEFAULT_TIMEOUT);

        let key = settings.cipher_key.as_ref();
        let encryptor = match overrides.encryptor {
            Some(encryptor) => Some(encryptor),
            None => present(settings.encryptor.as_ref())
                .map(|name| ciphers.encryptor(name, key))
                .transpose()
                .map_err(cipher_error)?,
        };
        let decryptor = match overrides.decryptor {
            Some(decryptor) => Some(decryptor),
            None => present(settings.decryptor.as_ref())
                .map(|name| ciphers.decryptor(name, key))
                .transpose()
                .map_err(cipher_error)?,
        };

        Ok(Self {
            name,
            codec,
            timeout,
            locator: overrides.locator,
            registry: overrides.registry,
            transporter: overrides.transporter,
            encryptor,
            decryptor,
        })
    }
}
