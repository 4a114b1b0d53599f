//! Message envelope and wire codecs selected by name.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Name of the JSON codec.
pub const JSON: &str = "json";
/// Name of the protobuf codec.
pub const PROTO: &str = "proto";

/// Errors raised by codecs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// No codec is registered under the name.
    #[error("unknown codec {0:?}")]
    Unknown(String),

    /// Encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The input is not a valid message for this codec.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Application message pushed to clients.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
pub struct Message {
    /// Sequence number chosen by the sender.
    #[prost(int32, tag = "1")]
    pub seq: i32,
    /// Route the client dispatches on.
    #[prost(int32, tag = "2")]
    pub route: i32,
    /// Payload.
    #[prost(bytes = "vec", tag = "3")]
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub buffer: Vec<u8>,
}

fn to_base64<S: Serializer>(buffer: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(buffer))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}

/// Serializes [`Message`] envelopes.
pub trait Codec: Send + Sync {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// Encodes a message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError>;

    /// Decodes a message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] for malformed input.
    fn decode(&self, data: &[u8]) -> Result<Message, CodecError>;
}

/// JSON codec; the buffer is carried as base64.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        JSON
    }

    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Message, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Protobuf codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoCodec;

impl Codec for ProtoCodec {
    fn name(&self) -> &'static str {
        PROTO
    }

    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(prost::Message::encode_to_vec(message)))
    }

    fn decode(&self, data: &[u8]) -> Result<Message, CodecError> {
        <Message as prost::Message>::decode(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

type Constructor = fn() -> Arc<dyn Codec>;

fn json() -> Arc<dyn Codec> {
    Arc::new(JsonCodec)
}

fn proto() -> Arc<dyn Codec> {
    Arc::new(ProtoCodec)
}

/// Codec constructors by name.
#[derive(Clone)]
pub struct CodecRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(JSON, json);
        registry.register(PROTO, proto);
        registry
    }
}

impl CodecRegistry {
    /// Registry with the built-in `json` and `proto` codecs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no codecs.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a codec, replacing any previous one with the same name.
    pub fn register(&mut self, name: &str, constructor: Constructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Constructs the codec registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Unknown`] if nothing is registered.
    pub fn invoke(&self, name: &str) -> Result<Arc<dyn Codec>, CodecError> {
        self.constructors
            .get(name)
            .map(|construct| construct())
            .ok_or_else(|| CodecError::Unknown(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}
