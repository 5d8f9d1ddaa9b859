use std::fmt;

/// Identifies one entry inside a round. Not an address.
///
/// The top 256 values are reserved for slots the crate itself uses when it
/// shares a round with caller entries; [`RoundKey::new`] refuses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundKey(u32);

impl RoundKey {
    /// First reserved value
    pub const RESERVED_START: u32 = 0xFFFF_FF00;

    /// # Panics
    ///
    /// Panics if `value` falls in the reserved range.
    pub const fn new(value: u32) -> Self {
        assert!(
            value < Self::RESERVED_START,
            "round key falls in the reserved range"
        );
        Self(value)
    }

    /// Key for a position in a caller-side list
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit below the reserved range.
    pub fn index(index: usize) -> Self {
        match u32::try_from(index) {
            Ok(value) => Self::new(value),
            Err(_) => panic!("round key index {} out of range", index),
        }
    }

    /// Reserved slot `slot` (0..=255)
    pub const fn reserved(slot: u8) -> Self {
        Self(Self::RESERVED_START + slot as u32)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_reserved(self) -> bool {
        self.0 >= Self::RESERVED_START
    }
}

impl From<u32> for RoundKey {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for RoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_reserved() {
            write!(f, "reserved#{}", self.0 - Self::RESERVED_START)
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_range() {
        assert!(!RoundKey::new(0).is_reserved());
        assert!(!RoundKey::new(RoundKey::RESERVED_START - 1).is_reserved());
        assert!(RoundKey::reserved(0).is_reserved());
        assert_eq!(RoundKey::reserved(255).get(), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "reserved range")]
    fn test_new_rejects_reserved() {
        let _ = RoundKey::new(RoundKey::RESERVED_START);
    }

    #[test]
    fn test_index_and_display() {
        assert_eq!(RoundKey::index(42), RoundKey::new(42));
        assert_eq!(format!("{}", RoundKey::new(7)), "#7");
        assert_eq!(format!("{}", RoundKey::reserved(3)), "reserved#3");
    }
}
