//! Frame Protocol
//!
//! Realtime events travel as one JSON text frame each:
//!
//! ```text
//! {"event": "<name>", "data": <payload>}
//! ```
//!
//! # Security
//!
//! - Maximum frame size is enforced in both directions
//! - A frame that fails to decode is an error for that frame only; the
//!   transport skips it and keeps reading

use serde::{de::DeserializeOwned, Serialize};

use super::TransportError;

/// Maximum frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encode an event to a text frame
///
/// # Errors
///
/// Returns `TransportError::SerializationError` if JSON serialization fails,
/// or `TransportError::FrameTooLarge` if the result exceeds `MAX_FRAME_SIZE`.
pub fn encode<T: Serialize>(event: &T) -> Result<String, TransportError> {
    let json =
        serde_json::to_string(event).map_err(|e| TransportError::SerializationError(e.to_string()))?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(json)
}

/// Decode a text frame into an event
///
/// # Errors
///
/// Returns `TransportError::FrameTooLarge` before parsing an oversized frame,
/// or `TransportError::SerializationError` for malformed JSON and unknown
/// event names.
pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, TransportError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    serde_json::from_str(frame).map_err(|e| TransportError::SerializationError(e.to_string()))
}
