//! Key state data types.
//!
//! A Simple Key peripheral reports its buttons and reed switch as a
//! one-byte bitmask. The bit-to-flag mapping lives in a declared table
//! so the decoder stays data-driven.

/// A single input on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum KeyFlag {
    /// Left push button.
    LeftButton,
    /// Right push button.
    RightButton,
    /// Magnetic reed switch.
    ReedSwitch,
}

impl KeyFlag {
    /// Get the bit this flag occupies in the status byte.
    pub const fn bit(&self) -> u8 {
        match self {
            Self::LeftButton => 0x01,
            Self::RightButton => 0x02,
            Self::ReedSwitch => 0x04,
        }
    }

    /// Get the flag name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LeftButton => "Left Button",
            Self::RightButton => "Right Button",
            Self::ReedSwitch => "Reed Switch",
        }
    }

    /// Human-readable message for the active state of this input.
    pub fn press_message(&self) -> &'static str {
        match self {
            Self::LeftButton => "Left button is pressed.",
            Self::RightButton => "Right button is pressed.",
            Self::ReedSwitch => "Reed switch is activated.",
        }
    }
}

impl std::fmt::Display for KeyFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Bit-to-flag mapping for the key state byte.
///
/// Bits 3-7 are reserved by the peripheral and ignored.
pub const KEY_BIT_TABLE: [(u8, KeyFlag); 3] = [
    (0x01, KeyFlag::LeftButton),
    (0x02, KeyFlag::RightButton),
    (0x04, KeyFlag::ReedSwitch),
];

/// The set of currently active inputs, decoded from one status byte.
///
/// An empty set means "everything released", which is distinct from
/// "no notification received yet" — callers model the latter as
/// `Option<KeyState>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyState(u8);

impl KeyState {
    /// The empty set: no buttons pressed, reed switch open.
    pub const EMPTY: KeyState = KeyState(0);

    /// Decode a status byte into the set of active flags.
    ///
    /// Every byte value is valid input; reserved bits are masked off.
    pub fn from_byte(byte: u8) -> Self {
        let mut bits = 0;
        for (bit, _) in KEY_BIT_TABLE {
            bits |= byte & bit;
        }
        Self(bits)
    }

    /// Get the raw (masked) bits.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Check whether a flag is active.
    pub fn contains(&self, flag: KeyFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Check whether no input is active.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of active flags.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over the active flags in table order.
    pub fn flags(&self) -> impl Iterator<Item = KeyFlag> + '_ {
        KEY_BIT_TABLE
            .iter()
            .filter(move |(bit, _)| self.0 & bit != 0)
            .map(|(_, flag)| *flag)
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "released");
        }
        let mut first = true;
        for flag in self.flags() {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{}", flag.name())?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_decode_single_flags() {
        assert!(KeyState::from_byte(0x01).contains(KeyFlag::LeftButton));
        assert!(KeyState::from_byte(0x02).contains(KeyFlag::RightButton));
        assert!(KeyState::from_byte(0x04).contains(KeyFlag::ReedSwitch));
    }

    #[test]
    fn test_decode_zero_is_empty_set() {
        let state = KeyState::from_byte(0x00);
        assert!(state.is_empty());
        assert_eq!(state, KeyState::EMPTY);
        assert_eq!(state.len(), 0);
        // Empty set is still a value - "no data yet" is Option::None.
        assert_eq!(Some(state), Some(KeyState::EMPTY));
    }

    #[test]
    fn test_decode_combined() {
        let state = KeyState::from_byte(0x03);
        assert!(state.contains(KeyFlag::LeftButton));
        assert!(state.contains(KeyFlag::RightButton));
        assert!(!state.contains(KeyFlag::ReedSwitch));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_decode_all_bits_set() {
        let state = KeyState::from_byte(0xFF);
        assert!(state.contains(KeyFlag::LeftButton));
        assert!(state.contains(KeyFlag::RightButton));
        assert!(state.contains(KeyFlag::ReedSwitch));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_reserved_bits_ignored() {
        let state = KeyState::from_byte(0xF8);
        assert!(state.is_empty());
        assert_eq!(state.bits(), 0);
    }

    #[test]
    fn test_flags_iteration_order() {
        let flags: Vec<_> = KeyState::from_byte(0x07).flags().collect();
        assert_eq!(
            flags,
            vec![KeyFlag::LeftButton, KeyFlag::RightButton, KeyFlag::ReedSwitch]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyState::from_byte(0x00).to_string(), "released");
        assert_eq!(KeyState::from_byte(0x01).to_string(), "Left Button");
        assert_eq!(
            KeyState::from_byte(0x05).to_string(),
            "Left Button+Reed Switch"
        );
    }

    proptest! {
        #[test]
        fn decode_matches_set_bits(byte in any::<u8>()) {
            let state = KeyState::from_byte(byte);
            for (bit, flag) in KEY_BIT_TABLE {
                prop_assert_eq!(state.contains(flag), byte & bit != 0);
            }
            // Nothing outside the table ever shows up.
            prop_assert_eq!(state.bits() & !0x07, 0);
        }
    }
}
