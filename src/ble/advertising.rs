//! Advertisement snapshots.
//!
//! A discovered peripheral is summarized by the advertisement fields
//! the filter cares about: local name, advertised services, and RSSI.

use btleplug::api::PeripheralProperties;
use uuid::Uuid;

/// Advertisement data captured at discovery time.
///
/// Immutable snapshot; a later advertisement from the same peripheral
/// produces a fresh value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised local name, if the peripheral broadcasts one.
    pub local_name: Option<String>,
    /// Service UUIDs carried in the advertisement.
    pub services: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// The advertised name, or a placeholder for anonymous peripherals.
    pub fn display_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or("(unknown)")
    }

    /// Check whether the advertisement carries a service UUID.
    pub fn advertises_service(&self, uuid: &Uuid) -> bool {
        self.services.contains(uuid)
    }
}

impl From<&PeripheralProperties> for Advertisement {
    fn from(properties: &PeripheralProperties) -> Self {
        Self {
            local_name: properties.local_name.clone(),
            services: properties.services.clone(),
            rssi: properties.rssi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::SIMPLE_KEY_SERVICE_UUID;

    #[test]
    fn test_display_name_fallback() {
        let adv = Advertisement {
            local_name: None,
            services: vec![],
            rssi: None,
        };
        assert_eq!(adv.display_name(), "(unknown)");

        let adv = Advertisement {
            local_name: Some("SensorTag".to_string()),
            services: vec![],
            rssi: Some(-60),
        };
        assert_eq!(adv.display_name(), "SensorTag");
    }

    #[test]
    fn test_from_peripheral_properties() {
        let mut properties = PeripheralProperties::default();
        properties.local_name = Some("SensorTag".to_string());
        properties.services = vec![SIMPLE_KEY_SERVICE_UUID];
        properties.rssi = Some(-42);

        let adv = Advertisement::from(&properties);
        assert_eq!(adv.local_name.as_deref(), Some("SensorTag"));
        assert!(adv.advertises_service(&SIMPLE_KEY_SERVICE_UUID));
        assert_eq!(adv.rssi, Some(-42));
    }
}
