//! CBOR encoding for broker wire records.
//!
//! The watch stream's websocket messages already carry frame boundaries, so
//! each binary message holds exactly one CBOR record, no length prefix.

use std::io::Cursor;

use crate::error::GateResult;

/// Encode a serializable record into CBOR bytes.
pub fn encode<T: serde::Serialize>(value: &T) -> GateResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;
    Ok(payload)
}

/// Decode one CBOR record into a typed value.
pub fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> GateResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}
