//! Optional message encryption selected by name.

use bytes::Bytes;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Name of the ChaCha20-Poly1305 cipher.
pub const CHACHA20: &str = "chacha20";

const NONCE_LEN: usize = 12;

/// Errors raised by ciphers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CipherError {
    /// No cipher is registered under the name.
    #[error("unknown cipher {0:?}")]
    Unknown(String),

    /// A cipher was selected but no key is configured.
    #[error("cipher {0:?} requires a key")]
    MissingKey(String),

    /// Encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// The ciphertext is truncated, tampered with or under another key.
    #[error("decryption failed")]
    DecryptionFailed,
}

/// Encrypts outbound payloads.
pub trait Encryptor: Send + Sync {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// Encrypts `data`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::EncryptionFailed`] on failure.
    fn encrypt(&self, data: &[u8]) -> Result<Bytes, CipherError>;
}

/// Decrypts inbound payloads.
pub trait Decryptor: Send + Sync {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// Decrypts `data`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::DecryptionFailed`] on failure.
    fn decrypt(&self, data: &[u8]) -> Result<Bytes, CipherError>;
}

/// ChaCha20-Poly1305 AEAD. Output is the random nonce followed by the
/// ciphertext.
pub struct ChaCha20Cipher {
    cipher: ChaCha20Poly1305,
}

impl ChaCha20Cipher {
    /// Cipher over a raw 256-bit key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Cipher whose key is the SHA-256 digest of `secret`.
    #[must_use]
    pub fn from_secret(secret: &SecretString) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.expose_secret().as_bytes()).into();
        Self::new(&key)
    }
}

impl Encryptor for ChaCha20Cipher {
    fn name(&self) -> &'static str {
        CHACHA20
    }

    fn encrypt(&self, data: &[u8]) -> Result<Bytes, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, data)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(Bytes::from(combined))
    }
}

impl Decryptor for ChaCha20Cipher {
    fn name(&self) -> &'static str {
        CHACHA20
    }

    fn decrypt(&self, data: &[u8]) -> Result<Bytes, CipherError> {
        if data.len() < NONCE_LEN {
            return Err(CipherError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map(Bytes::from)
            .map_err(|_| CipherError::DecryptionFailed)
    }
}

type EncryptorConstructor = fn(&SecretString) -> Arc<dyn Encryptor>;
type DecryptorConstructor = fn(&SecretString) -> Arc<dyn Decryptor>;

fn chacha20_encryptor(key: &SecretString) -> Arc<dyn Encryptor> {
    Arc::new(ChaCha20Cipher::from_secret(key))
}

fn chacha20_decryptor(key: &SecretString) -> Arc<dyn Decryptor> {
    Arc::new(ChaCha20Cipher::from_secret(key))
}

/// Cipher constructors by name.
#[derive(Clone)]
pub struct CipherRegistry {
    encryptors: HashMap<String, EncryptorConstructor>,
    decryptors: HashMap<String, DecryptorConstructor>,
}

impl Default for CipherRegistry {
    fn default() -> Self {
        let mut registry = Self {
            encryptors: HashMap::new(),
            decryptors: HashMap::new(),
        };
        registry.register(CHACHA20, chacha20_encryptor, chacha20_decryptor);
        registry
    }
}

impl CipherRegistry {
    /// Registry with the built-in `chacha20` cipher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers both directions of a cipher.
    pub fn register(&mut self, name: &str, encryptor: EncryptorConstructor, decryptor: DecryptorConstructor) {
        self.encryptors.insert(name.to_string(), encryptor);
        self.decryptors.insert(name.to_string(), decryptor);
    }

    /// Constructs the encryptor registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Unknown`] or [`CipherError::MissingKey`].
    pub fn encryptor(&self, name: &str, key: Option<&SecretString>) -> Result<Arc<dyn Encryptor>, CipherError> {
        let construct = self
            .encryptors
            .get(name)
            .ok_or_else(|| CipherError::Unknown(name.to_string()))?;
        let key = key.ok_or_else(|| CipherError::MissingKey(name.to_string()))?;
        Ok(construct(key))
    }

    /// Constructs the decryptor registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Unknown`] or [`CipherError::MissingKey`].
    pub fn decryptor(&self, name: &str, key: Option<&SecretString>) -> Result<Arc<dyn Decryptor>, CipherError> {
        let construct = self
            .decryptors
            .get(name)
            .ok_or_else(|| CipherError::Unknown(name.to_string()))?;
        let key = key.ok_or_else(|| CipherError::MissingKey(name.to_string()))?;
        Ok(construct(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = ChaCha20Cipher::from_secret(&secret("k"));
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), Bytes::from_static(b"same"));
        assert_eq!(cipher.decrypt(&b).unwrap(), Bytes::from_static(b"same"));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = ChaCha20Cipher::from_secret(&secret("one")).encrypt(b"x").unwrap();
        let other = ChaCha20Cipher::from_secret(&secret("two"));
        assert_eq!(other.decrypt(&sealed), Err(CipherError::DecryptionFailed));
    }

    #[test]
    fn tampered_or_truncated_input_fails() {
        let cipher = ChaCha20Cipher::from_secret(&secret("k"));
        let mut sealed = cipher.encrypt(b"payload").unwrap().to_vec();
        if let Some(last) = sealed.last_mut() {
            *last ^= 0x01;
        }
        assert!(cipher.decrypt(&sealed).is_err());
        assert!(cipher.decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn registry_resolution() {
        let registry = CipherRegistry::new();
        let key = secret("k");
        let enc = registry.encryptor(CHACHA20, Some(&key)).unwrap();
        let dec = registry.decryptor(CHACHA20, Some(&key)).unwrap();
        let sealed = enc.encrypt(b"hi").unwrap();
        assert_eq!(dec.decrypt(&sealed).unwrap(), Bytes::from_static(b"hi"));

        assert_eq!(
            registry.encryptor("aes", Some(&key)).err(),
            Some(CipherError::Unknown("aes".to_string()))
        );
        assert_eq!(
            registry.decryptor(CHACHA20, None).err(),
            Some(CipherError::MissingKey(CHACHA20.to_string()))
        );
    }
}
