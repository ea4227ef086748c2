//! Payload codecs
//!
//! The type code framing is fixed; the bytes after it are produced by one of
//! these codecs. Both ends of a session must agree on the codec.
//!
//! ```
//! use tidewire_protocol::codec::{Codec, PostcardCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Position { x: i32, y: i32 }
//!
//! let bytes = PostcardCodec.encode(&Position { x: 1, y: -1 }).unwrap();
//! let decoded: Position = PostcardCodec.decode(&bytes).unwrap();
//! assert_eq!(decoded, Position { x: 1, y: -1 });
//! ```

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Codec trait for serializing/deserializing message payloads
pub trait Codec: Send + Sync {
    /// Returns a human-readable name for this codec
    fn name(&self) -> &'static str;

    /// Encodes a serializable message into bytes
    fn encode<T: Serialize>(&self, message: &T) -> Result<Bytes>;

    /// Decodes bytes into a deserializable message
    ///
    /// The whole input must be consumed; leftover bytes are an error.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON codec, human-readable and handy while debugging a server
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "JSON"
    }

    fn encode<T: Serialize>(&self, message: &T) -> Result<Bytes> {
        let vec = serde_json::to_vec(message)
            .map_err(|e| ProtocolError::CodecError(format!("JSON encode failed: {}", e)))?;
        Ok(Bytes::from(vec))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::CodecError(format!("JSON decode failed: {}", e)))
    }
}

/// Postcard codec, compact binary encoding
#[derive(Debug, Clone, Copy)]
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    fn name(&self) -> &'static str {
        "Postcard"
    }

    fn encode<T: Serialize>(&self, message: &T) -> Result<Bytes> {
        let vec = postcard::to_allocvec(message)
            .map_err(|e| ProtocolError::CodecError(format!("Postcard encode failed: {}", e)))?;
        Ok(Bytes::from(vec))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let (value, rest) = postcard::take_from_bytes(bytes)
            .map_err(|e| ProtocolError::CodecError(format!("Postcard decode failed: {}", e)))?;
        if !rest.is_empty() {
            return Err(ProtocolError::CodecError(format!(
                "Postcard decode left {} trailing bytes",
                rest.len()
            )));
        }
        Ok(value)
    }
}

/// Codec selection, usable from configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    Json,
    #[default]
    Postcard,
}

impl CodecType {
    pub fn name(&self) -> &'static str {
        match self {
            CodecType::Json => JsonCodec.name(),
            CodecType::Postcard => PostcardCodec.name(),
        }
    }

    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Bytes> {
        match self {
            CodecType::Json => JsonCodec.encode(message),
            CodecType::Postcard => PostcardCodec.encode(message),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::Json => JsonCodec.decode(bytes),
            CodecType::Postcard => PostcardCodec.decode(bytes),
        }
    }
}
