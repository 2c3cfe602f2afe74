//! Flat 16-bit addressing over the arbiter's 4-byte base-address plus
//! 1-byte-prefix pipe scheme.
//!
//! Trades away the underlying radio's pipe/base flexibility for a single
//! namespace: every address is `{0xE7, 0xE7, hi, lo}` with prefix `0xE7`.

use crate::constants::ADDRESS_PREFIX;

/// A 16-bit flat radio address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RadioAddress(pub u16);

/// The raw base-address bytes and prefix byte the underlying radio wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAddress {
    pub base: [u8; 4],
    pub prefix: u8,
}

impl RadioAddress {
    pub fn to_raw(self) -> RawAddress {
        let [hi, lo] = self.0.to_be_bytes();
        RawAddress {
            base: [ADDRESS_PREFIX, ADDRESS_PREFIX, hi, lo],
            prefix: ADDRESS_PREFIX,
        }
    }

    pub fn from_raw(raw: RawAddress) -> Option<Self> {
        if raw.base[0] != ADDRESS_PREFIX || raw.base[1] != ADDRESS_PREFIX || raw.prefix != ADDRESS_PREFIX {
            return None;
        }
        Some(RadioAddress(u16::from_be_bytes([raw.base[2], raw.base[3]])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_address_into_fixed_prefix_layout() {
        let addr = RadioAddress(0xBEEF);
        let raw = addr.to_raw();
        assert_eq!(raw.base, [0xE7, 0xE7, 0xBE, 0xEF]);
        assert_eq!(raw.prefix, 0xE7);
    }

    #[test]
    fn round_trips_through_raw_representation() {
        let addr = RadioAddress(0x1234);
        assert_eq!(RadioAddress::from_raw(addr.to_raw()), Some(addr));
    }

    #[test]
    fn rejects_raw_address_with_wrong_prefix() {
        let raw = RawAddress {
            base: [0x00, 0xE7, 0x12, 0x34],
            prefix: 0xE7,
        };
        assert_eq!(RadioAddress::from_raw(raw), None);
    }
}
