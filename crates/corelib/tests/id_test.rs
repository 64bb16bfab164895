//! Property tests for identifier arithmetic and address parsing.
//!
//! # Test Strategy
//!
//! 1. **Bounds**: min/max identifiers enclose every identifier
//! 2. **Ordering**: `compare` is a total order on equal lengths
//! 3. **Arithmetic**: power-of-two offsets wrap modulo the ring size
//! 4. **Intervals**: degenerate and wrapping intervals
//! 5. **Addresses**: canonical rendering and equality

use std::cmp::Ordering;

use corelib::{Error, Id, Url};
use proptest::prelude::*;

fn id_of_len(len: usize) -> impl Strategy<Value = Id> {
    prop::collection::vec(any::<u8>(), len).prop_map(Id::new)
}

fn as_u32(id: &Id) -> u32 {
    id.as_bytes().iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

// ============================================================================
// Bounds & Ordering
// ============================================================================

proptest! {
    #[test]
    fn test_min_max_enclose_every_id(len in 1usize..24, seed in any::<u64>()) {
        let bytes: Vec<u8> = (0..len)
            .map(|i| (seed.rotate_left(i as u32 * 7) & 0xFF) as u8)
            .collect();
        let x = Id::new(bytes);
        prop_assert_ne!(Id::min(len).compare(&x).unwrap(), Ordering::Greater);
        prop_assert_ne!(x.compare(&Id::max(len)).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_compare_is_antisymmetric(a in id_of_len(4), b in id_of_len(4)) {
        prop_assert_eq!(a.compare(&b).unwrap(), b.compare(&a).unwrap().reverse());
        prop_assert_eq!(a.compare(&b).unwrap() == Ordering::Equal, a == b);
    }

    #[test]
    fn test_compare_is_transitive(a in id_of_len(2), b in id_of_len(2), c in id_of_len(2)) {
        if a.compare(&b).unwrap().is_le() && b.compare(&c).unwrap().is_le() {
            prop_assert!(a.compare(&c).unwrap().is_le());
        }
    }

    #[test]
    fn test_compare_matches_integer_order(a in id_of_len(3), b in id_of_len(3)) {
        prop_assert_eq!(a.compare(&b).unwrap(), as_u32(&a).cmp(&as_u32(&b)));
    }

    #[test]
    fn test_add_power_of_two_is_modular(a in id_of_len(3), k in 0usize..24) {
        let expected = (as_u32(&a) + (1u32 << k)) % (1u32 << 24);
        prop_assert_eq!(as_u32(&a.add_power_of_two(k).unwrap()), expected);
    }

    #[test]
    fn test_equal_bounds_cover_all_but_one(x in id_of_len(2), a in id_of_len(2)) {
        prop_assert_eq!(x.is_in_interval(&a, &a).unwrap(), x != a);
    }

    #[test]
    fn test_interval_matches_ring_distance(
        x in id_of_len(1),
        from in id_of_len(1),
        to in id_of_len(1)
    ) {
        prop_assume!(from != to);
        // x is strictly inside (from, to) iff walking clockwise from `from`
        // reaches x before `to`.
        let dist = |a: &Id, b: &Id| (as_u32(b) + 256 - as_u32(a)) % 256;
        let expected = x != from && dist(&from, &x) < dist(&from, &to);
        prop_assert_eq!(x.is_in_interval(&from, &to).unwrap(), expected);
    }
}

#[test]
fn test_length_mismatch_is_rejected() {
    let a = Id::min(2);
    let b = Id::min(3);
    assert!(matches!(a.compare(&b), Err(Error::LengthMismatch { .. })));
    assert!(matches!(a.is_in_interval(&b, &b), Err(Error::LengthMismatch { .. })));
}

// ============================================================================
// Wraparound
// ============================================================================

#[test]
fn test_one_byte_wraparound() {
    assert_eq!(Id::max(1).add_power_of_two(0).unwrap(), Id::min(1));

    let id = |v: u8| Id::new(vec![v]);
    assert!(id(255).is_in_interval(&id(250), &id(5)).unwrap());
    assert!(id(3).is_in_interval(&id(250), &id(5)).unwrap());
    assert!(!id(250).is_in_interval(&id(250), &id(5)).unwrap());
    assert!(!id(5).is_in_interval(&id(250), &id(5)).unwrap());
}

// ============================================================================
// Addresses
// ============================================================================

#[test]
fn test_url_round_trip_is_canonical() {
    let url: Url = "ocsocket://Host:1234/Path".parse().unwrap();
    assert_eq!(url.to_string(), "ocsocket://host:1234/path");
    assert_eq!(url.as_str(), "ocsocket://host:1234/path");
}

#[test]
fn test_url_case_insensitive_on_protocol_and_host() {
    let a: Url = "OCSocket://HOST:1234/Path".parse().unwrap();
    let b: Url = "ocsocket://host:1234/Path".parse().unwrap();
    let c: Url = "ocsocket://host:1234/path".parse().unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);

    let mut set = std::collections::HashSet::new();
    set.insert(a);
    assert!(set.contains(&b));
}
