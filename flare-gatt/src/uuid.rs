//! 16-bit and 128-bit attribute UUIDs, with the byte-reversal the wire format
//! requires.
//!
//! The link-layer stack stores UUIDs little-endian-first (reversed relative
//! to the big-endian order everyone writes UUIDs in), so every row in the
//! compiled database carries its UUID byte-reversed. Rather than tracking a
//! mutable "currently reversed" flag, [`Uuid::reversed_bytes`] derives the
//! wire form on demand from the canonical big-endian representation.

use heapless::Vec;

/// An attribute UUID, either the 16-bit short form used by standard GATT
/// profiles or a full 128-bit vendor UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    Bit16(u16),
    Bit128([u8; 16]),
}

impl Uuid {
    pub const fn from_u16(value: u16) -> Self {
        Uuid::Bit16(value)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Uuid::Bit128(bytes)
    }

    pub fn bit_count(&self) -> u16 {
        match self {
            Uuid::Bit16(_) => 16,
            Uuid::Bit128(_) => 128,
        }
    }

    /// The canonical big-endian byte representation (2 or 16 bytes).
    pub fn bytes(&self) -> Vec<u8, 16> {
        let mut out = Vec::new();
        match self {
            Uuid::Bit16(value) => {
                let _ = out.extend_from_slice(&value.to_be_bytes());
            }
            Uuid::Bit128(bytes) => {
                let _ = out.extend_from_slice(bytes);
            }
        }
        out
    }

    /// The byte-reversed form the wire format stores.
    pub fn reversed_bytes(&self) -> Vec<u8, 16> {
        let mut out = self.bytes();
        out.reverse();
        out
    }
}

impl From<u16> for Uuid {
    fn from(value: u16) -> Self {
        Uuid::Bit16(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bit_uuid_reverses_its_two_bytes() {
        let uuid = Uuid::from_u16(0x2800);
        assert_eq!(uuid.bytes().as_slice(), &[0x28, 0x00]);
        assert_eq!(uuid.reversed_bytes().as_slice(), &[0x00, 0x28]);
    }

    #[test]
    fn hundred_twenty_eight_bit_uuid_reverses_all_sixteen_bytes() {
        let bytes: [u8; 16] = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ];
        let uuid = Uuid::from_bytes(bytes);
        let reversed = uuid.reversed_bytes();
        assert_eq!(reversed[0], 0x10);
        assert_eq!(reversed[15], 0x01);
        assert_eq!(uuid.bit_count(), 128);
    }
}
