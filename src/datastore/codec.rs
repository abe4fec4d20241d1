//! Binary encoding for cached values and patch operations.
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{DipperError, Result, SerializationError};

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let encoded = bincode::serde::encode_to_vec(value, config())?;
    Ok(Bytes::from(encoded))
}

/// Decode a whole value. A valid prefix followed by leftover bytes is a
/// different type or a corrupt value, never a match.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let (value, consumed) = bincode::serde::decode_from_slice(data, config())?;
    if consumed != data.len() {
        return Err(DipperError::Serialization(SerializationError::Binary(
            format!("{} trailing bytes after value", data.len() - consumed),
        )));
    }
    Ok(value)
}
