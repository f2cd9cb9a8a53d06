//! Binary frame codec.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [hive_type: u8][bin_type: u8][metadata_len: u32][metadata: JSON][payload]
//! ```
//!
//! BINARY envelopes carry their raw bytes as the payload section. Any other
//! envelope type is carried as its complete JSON serialization, so nothing
//! is lost when a peer negotiates `binarize` for all traffic.

use crate::message::{BinaryPayloadType, HiveMessage, HiveMessageType, HivePayload};
use crate::{Result, WireError};

/// Frame header size: type byte, bin-type byte, metadata length.
const HEADER_SIZE: usize = 1 + 1 + 4;

/// Encode an envelope into the binary frame form.
pub fn encode_frame(msg: &HiveMessage) -> Result<Vec<u8>> {
    let metadata = serde_json::to_vec(&msg.metadata)
        .map_err(|e| WireError::Serialization(e.to_string()))?;
    let payload: Vec<u8> = match (&msg.msg_type, &msg.payload) {
        (HiveMessageType::Binary, HivePayload::Binary(data)) => data.clone(),
        (HiveMessageType::Binary, _) => {
            return Err(WireError::Frame("binary envelope without byte payload".into()))
        }
        _ => msg.serialize()?.into_bytes(),
    };

    let metadata_len = u32::try_from(metadata.len())
        .map_err(|_| WireError::Frame("metadata too large".into()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + metadata.len() + payload.len());
    out.push(msg.msg_type.as_u8());
    out.push(msg.bin_type.unwrap_or(BinaryPayloadType::Undefined).as_u8());
    out.extend_from_slice(&metadata_len.to_le_bytes());
    out.extend_from_slice(&metadata);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a binary frame back into an envelope.
pub fn decode_frame(data: &[u8]) -> Result<HiveMessage> {
    if data.len() < HEADER_SIZE {
        return Err(WireError::Frame("frame shorter than header".into()));
    }
    let hive_type = HiveMessageType::from_u8(data[0])
        .ok_or_else(|| WireError::Frame(format!("unknown envelope type code {}", data[0])))?;
    let bin_type = BinaryPayloadType::from_u8(data[1]);

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[2..6]);
    let metadata_len = u32::from_le_bytes(len_bytes) as usize;

    let body = &data[HEADER_SIZE..];
    if body.len() < metadata_len {
        return Err(WireError::Frame("metadata length exceeds frame".into()));
    }
    let (metadata_raw, payload) = body.split_at(metadata_len);
    let metadata: serde_json::Map<String, serde_json::Value> = if metadata_raw.is_empty() {
        serde_json::Map::new()
    } else {
        serde_json::from_slice(metadata_raw)
            .map_err(|e| WireError::Deserialization(e.to_string()))?
    };

    if hive_type == HiveMessageType::Binary {
        let mut msg = HiveMessage::binary(bin_type, payload.to_vec());
        msg.metadata = metadata;
        Ok(msg)
    } else {
        let raw = std::str::from_utf8(payload)
            .map_err(|e| WireError::Deserialization(e.to_string()))?;
        let mut msg = HiveMessage::deserialize(raw)?;
        if msg.metadata.is_empty() {
            msg.metadata = metadata;
        }
        Ok(msg)
    }
}
