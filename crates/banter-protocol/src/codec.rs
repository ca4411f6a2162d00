//! Codec for encoding and decoding banter envelopes.
//!
//! The wire format is one JSON object per WebSocket text frame. Decoding is
//! deliberately two-step: the `type` field is inspected first so that a
//! missing type, an unrecognized type, and a malformed body each produce
//! their own error, and none of them ever costs the sender its connection.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::{ClientEnvelope, ServerEnvelope};

/// Errors produced while decoding inbound or encoding outbound envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The envelope has no `type` field.
    #[error("Message does not contain type.")]
    MissingType,

    /// The payload is not valid JSON, or a field has the wrong shape.
    #[error("Error parsing message: {0}")]
    Parse(#[source] serde_json::Error),

    /// An outbound envelope failed to serialize.
    #[error("Error encoding message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encode an outbound envelope to its wire representation.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &ServerEnvelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(ProtocolError::Encode)
}

/// Decode a raw text frame into a client envelope.
///
/// An unrecognized `type` is not an error at this layer: it decodes to
/// [`ClientEnvelope::Unknown`] so the router can apply its own ordering of
/// authentication and unknown-type checks.
///
/// # Errors
///
/// Returns an error if the payload is not a JSON object with a string
/// `type` field, or if a recognized envelope has malformed fields.
pub fn decode(raw: &str) -> Result<ClientEnvelope, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(ProtocolError::Parse)?;

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(ProtocolError::MissingType);
    };

    match kind {
        "login" | "message" | "private_message" | "command" => {
            serde_json::from_value(value).map_err(ProtocolError::Parse)
        }
        other => Ok(ClientEnvelope::Unknown {
            kind: other.to_string(),
        }),
    }
}
