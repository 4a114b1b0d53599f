//! Mesh node settings.
//!
//! Every field is optional; an empty string or a non-positive timeout is
//! treated as unset so the compiled default applies.

use secrecy::SecretString;
use serde::Deserialize;

/// Mesh node settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MeshSettings {
    /// Instance name.
    pub name: Option<String>,
    /// Codec name.
    pub codec: Option<String>,
    /// RPC timeout in seconds.
    pub timeout: Option<i64>,
    /// Encryptor name.
    pub encryptor: Option<String>,
    /// Decryptor name.
    pub decryptor: Option<String>,
    /// Key material for the encryptor and decryptor.
    pub cipher_key: Option<SecretString>,
}
