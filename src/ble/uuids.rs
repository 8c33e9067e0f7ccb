//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for Simple Key peripheral
//! communication, plus helpers for the Bluetooth SIG 16-bit short form.

use uuid::Uuid;

/// Bluetooth SIG base UUID with the 16-bit field zeroed
/// (`0000xxxx-0000-1000-8000-00805f9b34fb`).
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

// Simple Key Service (buttons and reed switch)
/// Simple Key Service UUID (`0xFFE0`).
pub const SIMPLE_KEY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_00805f9b34fb);
/// Key State characteristic UUID (`0xFFE1`, Notify).
pub const KEY_STATE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_ffe1_0000_1000_8000_00805f9b34fb);

// Additional services advertised by compatible button tags
/// Combined-sensor tag service UUID (`0x721B`).
pub const COMBINED_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_721b_0000_1000_8000_00805f9b34fb);
/// SensorTag base service UUID (`0xAA80`).
pub const SENSOR_TAG_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_aa80_0000_1000_8000_00805f9b34fb);

/// Expand a Bluetooth SIG 16-bit identifier to a full 128-bit UUID.
pub const fn sig_uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Check if a UUID is a SIG-base UUID (expandable from 16 bits).
pub fn is_sig_uuid(uuid: &Uuid) -> bool {
    let value = uuid.as_u128();
    (value & !(0xffff_u128 << 96)) == BLUETOOTH_BASE_UUID
}

/// Render a UUID in its short form ("ffe1") when it sits on the SIG
/// base, full form otherwise. Used for log readability.
pub fn short_uuid(uuid: &Uuid) -> String {
    if is_sig_uuid(uuid) {
        format!("{:04x}", (uuid.as_u128() >> 96) as u16)
    } else {
        uuid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        let service = SIMPLE_KEY_SERVICE_UUID.to_string();
        assert!(service.contains("ffe0"));

        let key_state = KEY_STATE_CHARACTERISTIC_UUID.to_string();
        assert!(key_state.contains("ffe1"));
    }

    #[test]
    fn test_sig_uuid_from_u16() {
        assert_eq!(sig_uuid_from_u16(0xffe0), SIMPLE_KEY_SERVICE_UUID);
        assert_eq!(sig_uuid_from_u16(0xffe1), KEY_STATE_CHARACTERISTIC_UUID);
        assert_eq!(sig_uuid_from_u16(0x721b), COMBINED_SERVICE_UUID);
        assert_eq!(sig_uuid_from_u16(0xaa80), SENSOR_TAG_SERVICE_UUID);
    }

    #[test]
    fn test_is_sig_uuid() {
        assert!(is_sig_uuid(&SIMPLE_KEY_SERVICE_UUID));
        assert!(!is_sig_uuid(&Uuid::from_u128(
            0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e
        )));
    }

    #[test]
    fn test_short_uuid() {
        assert_eq!(short_uuid(&KEY_STATE_CHARACTERISTIC_UUID), "ffe1");

        let vendor = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        assert_eq!(short_uuid(&vendor), vendor.to_string());
    }
}
