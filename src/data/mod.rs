//! Data types for key states and notification decoding.

pub mod decoder;
pub mod keys;

pub use decoder::{KeyStateDecoder, NotificationDecoder};
pub use keys::{KeyFlag, KeyState, KEY_BIT_TABLE};
