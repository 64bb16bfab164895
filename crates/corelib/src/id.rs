//! Identifiers on the circular identifier space.
//!
//! An [`Id`] is a fixed-length byte string read as an unsigned big-endian
//! integer modulo `2^(8 * len)`. Nodes and keys are placed on the ring by
//! their identifier; every routing decision is made with the comparison and
//! interval operations defined here.
//!
//! # Invariants
//!
//! - Identifiers are immutable; arithmetic returns new instances.
//! - Only identifiers of equal bit length can be compared or combined.
//!   Mixing lengths is a programming error and is reported as
//!   [`Error::LengthMismatch`]. `PartialOrd` returns `None` in that case,
//!   which is why `Id` deliberately does not implement `Ord`.

use std::cmp::Ordering;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed-length identifier on the ring.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id {
    bytes: Vec<u8>,
}

impl Id {
    /// Creates an identifier from raw big-endian bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Derives an identifier of `len` bytes from arbitrary key material.
    ///
    /// Uses the blake3 extendable output so any length can be produced from
    /// the same key.
    pub fn from_key(key: &[u8], len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        let mut hasher = blake3::Hasher::new();
        hasher.update(key);
        hasher.finalize_xof().fill(&mut bytes);
        Self { bytes }
    }

    /// The all-zero identifier of `len` bytes (start of the ring).
    pub fn min(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    /// The all-one identifier of `len` bytes (end of the ring).
    pub fn max(len: usize) -> Self {
        Self {
            bytes: vec![u8::MAX; len],
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn bit_length(&self) -> usize {
        self.bytes.len() * 8
    }

    fn check_length(&self, other: &Id) -> Result<()> {
        if self.bit_length() != other.bit_length() {
            return Err(Error::LengthMismatch {
                left: self.bit_length(),
                right: other.bit_length(),
            });
        }
        Ok(())
    }

    /// Compares two identifiers as unsigned integers.
    ///
    /// Fails with [`Error::LengthMismatch`] if the bit lengths differ.
    pub fn compare(&self, other: &Id) -> Result<Ordering> {
        self.check_length(other)?;
        // u8 slices compare lexicographically and unsigned, which is exactly
        // big-endian integer order for equal lengths.
        Ok(self.bytes.as_slice().cmp(other.bytes.as_slice()))
    }

    /// Returns `(self + 2^power) mod 2^bit_length`.
    ///
    /// The addition starts at the byte holding bit `power` and ripples the
    /// carry towards the most significant byte. A carry out of the most
    /// significant byte is the modulus wraparound and is dropped.
    pub fn add_power_of_two(&self, power: usize) -> Result<Id> {
        let bits = self.bit_length();
        if power >= bits {
            return Err(Error::PowerOutOfRange { power, bits });
        }

        let mut bytes = self.bytes.clone();
        let mut index = bytes.len() - 1 - power / 8;
        let (sum, mut carry) = bytes[index].overflowing_add(1u8 << (power % 8));
        bytes[index] = sum;

        while carry && index > 0 {
            index -= 1;
            let (sum, overflow) = bytes[index].overflowing_add(1);
            bytes[index] = sum;
            carry = overflow;
        }

        Ok(Id { bytes })
    }

    /// Tests membership in the open ring interval `(from, to)`.
    ///
    /// - `from == to`: the whole ring except `from` itself.
    /// - `from < to`: plain `from < self < to`.
    /// - `from > to`: the interval wraps through zero and is split into
    ///   `(from, max]` and `[min, to)`.
    pub fn is_in_interval(&self, from: &Id, to: &Id) -> Result<bool> {
        self.check_length(from)?;
        self.check_length(to)?;

        if from == to {
            return Ok(self != from);
        }

        if from.compare(to)? == Ordering::Less {
            return Ok(self > from && self < to);
        }

        let min = Id::min(self.len());
        let max = Id::max(self.len());

        let in_upper = *from != min && self > from && *self <= max;
        let in_lower = *to != min && *self >= min && self < to;
        Ok(in_upper || in_lower)
    }

    /// Hexadecimal rendering of the first `prefix` bytes, e.g. `"0A FF 03"`.
    pub fn to_hex_string(&self, prefix: usize) -> String {
        self.render(prefix, |out, b| write!(out, "{:02X}", b))
    }

    /// Decimal rendering of the first `prefix` bytes, e.g. `"10 255 3"`.
    pub fn to_decimal_string(&self, prefix: usize) -> String {
        self.render(prefix, |out, b| write!(out, "{}", b))
    }

    /// Binary rendering of the first `prefix` bytes, 8 digits per byte.
    pub fn to_binary_string(&self, prefix: usize) -> String {
        self.render(prefix, |out, b| write!(out, "{:08b}", b))
    }

    // Prefix lengths beyond the identifier clamp to the full length.
    fn render(
        &self,
        prefix: usize,
        mut block: impl FnMut(&mut String, u8) -> fmt::Result,
    ) -> String {
        let take = prefix.min(self.bytes.len());
        let mut out = String::with_capacity(take * 9);
        for (i, b) in self.bytes[..take].iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            // Writing into a String cannot fail.
            let _ = block(&mut out, *b);
        }
        out
    }
}

impl PartialOrd for Id {
    /// `None` when the bit lengths differ.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string(self.len()))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex_string(self.len()))
    }
}

impl From<Vec<u8>> for Id {
    fn from(bytes: Vec<u8>) -> Self {
        Id::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id1(v: u8) -> Id {
        Id::new(vec![v])
    }

    #[test]
    fn test_compare_is_unsigned() {
        // 0x80 would be negative as a signed byte.
        assert_eq!(id1(0x80).compare(&id1(0x7F)).unwrap(), Ordering::Greater);
        assert_eq!(id1(0).compare(&id1(255)).unwrap(), Ordering::Less);
        assert_eq!(id1(9).compare(&id1(9)).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_compare_length_mismatch() {
        let err = id1(1).compare(&Id::new(vec![0, 1])).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { left: 8, right: 16 }));
        assert_eq!(id1(1).partial_cmp(&Id::new(vec![0, 1])), None);
    }

    #[test]
    fn test_add_power_of_two_carry() {
        let id = Id::new(vec![0x00, 0xFF]);
        assert_eq!(id.add_power_of_two(0).unwrap(), Id::new(vec![0x01, 0x00]));
        assert_eq!(id.add_power_of_two(8).unwrap(), Id::new(vec![0x01, 0xFF]));
        assert_eq!(
            Id::new(vec![0x00, 0x80]).add_power_of_two(7).unwrap(),
            Id::new(vec![0x01, 0x00])
        );
    }

    #[test]
    fn test_add_power_of_two_wraps() {
        assert_eq!(Id::max(1).add_power_of_two(0).unwrap(), Id::min(1));
        assert_eq!(Id::max(3).add_power_of_two(0).unwrap(), Id::min(3));
        assert_eq!(
            Id::new(vec![0x80, 0x00]).add_power_of_two(15).unwrap(),
            Id::min(2)
        );
    }

    #[test]
    fn test_add_power_of_two_range() {
        assert!(matches!(
            id1(0).add_power_of_two(8),
            Err(Error::PowerOutOfRange { power: 8, bits: 8 })
        ));
        assert!(Id::new(Vec::new()).add_power_of_two(0).is_err());
    }

    #[test]
    fn test_interval_wrapping() {
        let (from, to) = (id1(250), id1(5));
        assert!(id1(255).is_in_interval(&from, &to).unwrap());
        assert!(id1(3).is_in_interval(&from, &to).unwrap());
        assert!(id1(0).is_in_interval(&from, &to).unwrap());
        assert!(!id1(250).is_in_interval(&from, &to).unwrap());
        assert!(!id1(5).is_in_interval(&from, &to).unwrap());
        assert!(!id1(100).is_in_interval(&from, &to).unwrap());
    }

    #[test]
    fn test_interval_wrapping_to_min() {
        // (250, 0) must not contain 0 itself.
        let (from, to) = (id1(250), id1(0));
        assert!(id1(255).is_in_interval(&from, &to).unwrap());
        assert!(!id1(0).is_in_interval(&from, &to).unwrap());
    }

    #[test]
    fn test_interval_plain() {
        let (from, to) = (id1(10), id1(20));
        assert!(id1(15).is_in_interval(&from, &to).unwrap());
        assert!(!id1(10).is_in_interval(&from, &to).unwrap());
        assert!(!id1(20).is_in_interval(&from, &to).unwrap());
        assert!(!id1(25).is_in_interval(&from, &to).unwrap());
    }

    #[test]
    fn test_interval_equal_bounds() {
        let a = id1(42);
        assert!(!a.is_in_interval(&a, &a).unwrap());
        assert!(id1(41).is_in_interval(&a, &a).unwrap());
    }

    #[test]
    fn test_formatting() {
        let id = Id::new(vec![0x0A, 0xFF, 0x03]);
        assert_eq!(id.to_hex_string(3), "0A FF 03");
        assert_eq!(id.to_hex_string(1), "0A");
        assert_eq!(id.to_decimal_string(3), "10 255 3");
        assert_eq!(id.to_binary_string(2), "00001010 11111111");
        assert_eq!(id.to_hex_string(10), "0A FF 03");
        assert_eq!(id.to_string(), "0A FF 03");
    }

    #[test]
    fn test_from_key_length() {
        let id = Id::from_key(b"some key", 20);
        assert_eq!(id.len(), 20);
        assert_eq!(id, Id::from_key(b"some key", 20));
        assert_ne!(id, Id::from_key(b"other key", 20));
    }
}
