//! Base64 helpers for binary message payloads.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize bytes as a single base64 string.
///
/// Used with `#[serde(serialize_with = "serialize_bytes")]`
pub fn serialize_bytes<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&BASE64_STANDARD.encode(data))
}

/// Deserialize a base64 string into Bytes.
///
/// Used with `#[serde(deserialize_with = "deserialize_bytes")]`
pub fn deserialize_bytes<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    BASE64_STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}
