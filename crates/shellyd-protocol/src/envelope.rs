//! The message envelope framing every WebSocket text frame.

use crate::MessageType;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is not valid base64
    #[error("Payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Result type alias using ProtocolError.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// One wire message: a typed envelope with a base64-encoded JSON payload.
///
/// Exactly one envelope travels per text frame. Binary frames bypass the
/// envelope entirely and are treated as raw terminal input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message type; unknown values decode to [`MessageType::Unknown`].
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Base64-encoded bytes of a nested JSON document.
    pub payload: String,
    /// Send instant.
    pub timestamp: DateTime<Utc>,
    /// Fresh UUID v4 per message.
    pub message_id: Uuid,
}

impl Envelope {
    /// Build an envelope around a serializable payload.
    pub fn new<P: Serialize>(message_type: MessageType, payload: &P) -> ProtocolResult<Self> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self {
            message_type,
            payload: BASE64.encode(bytes),
            timestamp: Utc::now(),
            message_id: Uuid::new_v4(),
        })
    }

    /// Build an envelope with an empty JSON object payload (ping, pong,
    /// disconnect).
    pub fn empty(message_type: MessageType) -> Self {
        Self {
            message_type,
            payload: BASE64.encode(b"{}"),
            timestamp: Utc::now(),
            message_id: Uuid::new_v4(),
        }
    }

    /// Decode the nested payload into a typed document.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        let bytes = BASE64.decode(&self.payload)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The raw payload bytes, base64-decoded but otherwise uninterpreted.
    ///
    /// Used by the terminal-input fallback path: clients may put raw
    /// keystrokes in the payload without the JSON wrapper.
    pub fn payload_bytes(&self) -> ProtocolResult<Vec<u8>> {
        Ok(BASE64.decode(&self.payload)?)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
