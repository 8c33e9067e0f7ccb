//! Error types for the simplekey-ble crate.

use thiserror::Error;
use uuid::Uuid;

use crate::session::LinkState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Failed to establish a connection to the peripheral.
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service/characteristic discovery failed or a requested
    /// characteristic is absent on the peripheral.
    #[error("Discovery failed: {context}")]
    DiscoveryFailed {
        /// Description of what went wrong during discovery.
        context: String,
    },

    /// Subscribing to notifications on a characteristic failed.
    #[error("Subscribe failed for characteristic {characteristic}: {reason}")]
    SubscribeFailed {
        /// The characteristic that could not be subscribed.
        characteristic: Uuid,
        /// Description of why the subscribe failed.
        reason: String,
    },

    /// A subscription already exists for this characteristic.
    #[error("Already subscribed to characteristic {characteristic}")]
    AlreadySubscribed {
        /// The characteristic that is already subscribed.
        characteristic: Uuid,
    },

    /// Operation requires the connection to be ready.
    #[error("Connection not ready (state: {state})")]
    NotReady {
        /// The state the connection was actually in.
        state: LinkState,
    },

    /// The peer dropped the connection while it was in use.
    #[error("Unexpected disconnect from {peripheral}")]
    UnexpectedDisconnect {
        /// Identifier of the peripheral that dropped the connection.
        peripheral: String,
    },

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConnectFailed {
            reason: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Connection failed: timed out");

        let err = Error::NotReady {
            state: LinkState::Scanning,
        };
        assert_eq!(err.to_string(), "Connection not ready (state: Scanning)");
    }

    #[test]
    fn test_already_subscribed_display() {
        let err = Error::AlreadySubscribed {
            characteristic: crate::ble::uuids::KEY_STATE_CHARACTERISTIC_UUID,
        };
        assert!(err.to_string().contains("ffe1"));
    }
}
