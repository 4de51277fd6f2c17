//! Classification blob encoding.
//!
//! A blob is one header byte naming the protocol followed by the payload:
//!
//! | Header | Payload |
//! |--------|---------|
//! | `0x01` | JSON object of label → score |
//! | `0x02` | bincode-encoded label → score map |
//!
//! Decoding dispatches on the header, so a reader configured for one protocol
//! can still read rows written with the other.

use crate::models::{ClassificationMap, SerializationProtocol};
use crate::{Error, Result};

/// Encodes a classification map.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the payload cannot be encoded.
pub fn encode(map: &ClassificationMap, protocol: SerializationProtocol) -> Result<Vec<u8>> {
    let payload = match protocol {
        SerializationProtocol::Json => {
            serde_json::to_vec(map).map_err(|e| Error::Serialization(e.to_string()))?
        },
        SerializationProtocol::Bincode => {
            bincode::serialize(map).map_err(|e| Error::Serialization(e.to_string()))?
        },
    };

    let mut blob = Vec::with_capacity(payload.len() + 1);
    blob.push(protocol.tag());
    blob.extend_from_slice(&payload);
    Ok(blob)
}

/// Decodes a classification blob written by [`encode`].
///
/// # Errors
///
/// Returns [`Error::Serialization`] for empty blobs, unknown headers, or
/// corrupt payloads.
pub fn decode(blob: &[u8]) -> Result<ClassificationMap> {
    let (&tag, payload) = blob
        .split_first()
        .ok_or_else(|| Error::Serialization("empty classification blob".to_string()))?;

    let protocol = SerializationProtocol::from_tag(tag).ok_or_else(|| {
        Error::Serialization(format!("unknown classification blob header 0x{tag:02x}"))
    })?;

    match protocol {
        SerializationProtocol::Json => {
            serde_json::from_slice(payload).map_err(|e| Error::Serialization(e.to_string()))
        },
        SerializationProtocol::Bincode => {
            bincode::deserialize(payload).map_err(|e| Error::Serialization(e.to_string()))
        },
    }
}
