//! JSON encoding for push-channel frames.
//!
//! Frames travel as WebSocket text frames, so message boundaries are
//! preserved by the transport and no extra framing is needed.

use crate::push::{ClientFrame, ServerFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`ClientFrame`] to its JSON text representation.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientFrame`] from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a valid frame.
pub fn decode_client(text: &str) -> Result<ClientFrame, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ServerFrame`] to its JSON text representation.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ServerFrame`] from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a valid frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}
