//! Client configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{
    COMBINED_SERVICE_UUID, KEY_STATE_CHARACTERISTIC_UUID, SENSOR_TAG_SERVICE_UUID,
    SIMPLE_KEY_SERVICE_UUID,
};

/// Configuration for a [`KeyClient`](crate::KeyClient).
///
/// The defaults target a standard Simple Key peripheral: scan for the
/// known button-tag services, discover the Simple Key service and its
/// key state characteristic, and give up on disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Advertised name of the peripheral to connect to.
    ///
    /// With no name configured the client scans and reports
    /// discoveries but never connects.
    pub target_name: Option<String>,
    /// Service UUIDs used as the radio scan filter and to narrow
    /// advertisement matches.
    pub target_services: Vec<Uuid>,
    /// The service to discover after connecting.
    pub service: Uuid,
    /// The characteristics to subscribe within [`Self::service`].
    ///
    /// Every listed characteristic must exist on the peripheral;
    /// a missing one fails discovery.
    pub characteristics: Vec<Uuid>,
    /// Whether to return to scanning after a connection drops.
    pub auto_reconnect: bool,
    /// Delay before re-entering scanning when reconnecting.
    pub reconnect_backoff: Duration,
}

impl ClientConfig {
    /// Default delay before a reconnect attempt re-enters scanning.
    pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

    /// Configuration targeting a peripheral by advertised name, with
    /// all other options at their defaults.
    pub fn for_device(name: impl Into<String>) -> Self {
        Self {
            target_name: Some(name.into()),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_name: None,
            target_services: vec![
                SIMPLE_KEY_SERVICE_UUID,
                COMBINED_SERVICE_UUID,
                SENSOR_TAG_SERVICE_UUID,
            ],
            service: SIMPLE_KEY_SERVICE_UUID,
            characteristics: vec![KEY_STATE_CHARACTERISTIC_UUID],
            auto_reconnect: false,
            reconnect_backoff: Self::DEFAULT_RECONNECT_BACKOFF,
        }
    }
}
