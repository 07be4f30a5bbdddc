//! Payload codecs.
//!
//! The backlog deduplicates on the exact encoded bytes, so a codec must
//! produce the same bytes for the same logical item every time. Both
//! provided codecs are deterministic for plain structs, enums, sequences
//! and `BTreeMap`s; a `HashMap` payload is not, because its iteration order
//! varies between processes.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Turns work items into backlog payloads and back.
pub trait Codec {
    fn encode<T: Serialize + ?Sized>(&self, item: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Compact JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, item: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(item).map_err(|e| Error::Codec(format!("json encode: {e}")))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("json decode: {e}")))
    }
}

/// bincode's binary encoding. Not self-describing: the reader must decode
/// into the same type the writer encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize + ?Sized>(&self, item: &T) -> Result<Vec<u8>> {
        bincode::serialize(item).map_err(|e| Error::Codec(format!("bincode encode: {e}")))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| Error::Codec(format!("bincode decode: {e}")))
    }
}

/// Codec selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Json,
    Bincode,
}

impl Codec for CodecKind {
    fn encode<T: Serialize + ?Sized>(&self, item: &T) -> Result<Vec<u8>> {
        match self {
            CodecKind::Json => JsonCodec.encode(item),
            CodecKind::Bincode => BincodeCodec.encode(item),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecKind::Json => JsonCodec.decode(bytes),
            CodecKind::Bincode => BincodeCodec.decode(bytes),
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CodecKind::Json => "json",
            CodecKind::Bincode => "bincode",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "bincode" | "binary" => Ok(CodecKind::Bincode),
            other => Err(Error::Config(format!("unknown codec: {other}"))),
        }
    }
}
