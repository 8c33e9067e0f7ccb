// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # simplekey-ble
//!
//! A cross-platform Rust library for connecting to Simple Key button
//! peripherals (SensorTag-style devices exposing service `0xFFE0` /
//! characteristic `0xFFE1`) via Bluetooth Low Energy.
//!
//! The peripheral reports its two push buttons and magnetic reed
//! switch as a one-byte bitmask over notifications; the client scans
//! for a device by advertised name, connects, subscribes, and decodes
//! each notification into a [`KeyState`].
//!
//! ## Features
//!
//! - **Scan by name**: connect only to the peripheral you asked for
//! - **Connection lifecycle**: one ordered state machine from scan to
//!   teardown, with optional reconnect-after-backoff
//! - **Key decoding**: data-driven bitmask decoding (left button,
//!   right button, reed switch)
//! - **Observer events**: connection lifecycle and decoded key states
//!   over a broadcast channel or registered callbacks
//! - **Custom decoders**: attach your own decoder per characteristic
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simplekey_ble::{ClientConfig, ClientEvent, KeyClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = KeyClient::new(ClientConfig::for_device("SensorTag")).await?;
//!     let mut events = client.subscribe_events();
//!
//!     client.start().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::Keys { keys, .. } = event {
//!             println!("keys: {}", keys);
//!         }
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod registry;
pub mod session;

mod dispatcher;

// Re-exports for convenience
pub use client::{CallbackHandle, KeyClient};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use registry::SubscriptionRegistry;
pub use session::{ClientEvent, LinkState};

// Re-export commonly used types from submodules
pub use ble::advertising::Advertisement;
pub use ble::filter::TargetFilter;
pub use ble::uuids::{
    sig_uuid_from_u16, COMBINED_SERVICE_UUID, KEY_STATE_CHARACTERISTIC_UUID,
    SENSOR_TAG_SERVICE_UUID, SIMPLE_KEY_SERVICE_UUID,
};
pub use data::decoder::{KeyStateDecoder, NotificationDecoder};
pub use data::keys::{KeyFlag, KeyState, KEY_BIT_TABLE};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<KeyClient>();
        let _ = std::any::TypeId::of::<ClientConfig>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<KeyState>();
        let _ = std::any::TypeId::of::<KeyFlag>();
        let _ = std::any::TypeId::of::<LinkState>();
        let _ = std::any::TypeId::of::<SubscriptionRegistry>();
    }

    #[test]
    fn test_default_profile_uuids() {
        assert_eq!(sig_uuid_from_u16(0xffe0), SIMPLE_KEY_SERVICE_UUID);
        assert_eq!(sig_uuid_from_u16(0xffe1), KEY_STATE_CHARACTERISTIC_UUID);
    }
}
