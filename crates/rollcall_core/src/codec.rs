//! CBOR encoding for persisted records.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a record as CBOR.
pub(crate) fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR record.
pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}
