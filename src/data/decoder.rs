//! Notification payload decoding.
//!
//! Each subscribed characteristic carries a decoder turning raw
//! notification bytes into a [`KeyState`]. The trait keeps the
//! subscription registry independent of any particular wire layout.

use crate::data::keys::KeyState;
use crate::error::{Error, Result};

/// Decodes raw notification payloads into key states.
pub trait NotificationDecoder: Send + Sync {
    /// Decode one notification payload.
    fn decode(&self, payload: &[u8]) -> Result<KeyState>;
}

/// Decoder for the standard Simple Key status byte.
///
/// Reads the first payload byte through the declared bit table.
/// Trailing bytes, if a peripheral sends any, are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyStateDecoder;

impl NotificationDecoder for KeyStateDecoder {
    fn decode(&self, payload: &[u8]) -> Result<KeyState> {
        let byte = payload.first().copied().ok_or_else(|| Error::InvalidData {
            context: "empty key state notification".to_string(),
        })?;
        Ok(KeyState::from_byte(byte))
    }
}
