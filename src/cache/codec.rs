//! Serializer boundary
//!
//! The cache layer treats values as opaque bytes; these two functions are
//! the only place a wire format is chosen. Failures surface as
//! `SerializationError`, never as a cache miss.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::utils::SerializationError;

/// Marshal a value into cacheable bytes
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec(value).map_err(SerializationError::Encode)
}

/// Unmarshal cached bytes back into a value
pub fn unserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    serde_json::from_slice(bytes).map_err(SerializationError::Decode)
}
