use super::*;
use std::cmp::Ordering;

fn key_with_last(byte: u8) -> Key {
    let mut bytes = [0u8; KEY_LENGTH];
    bytes[KEY_LENGTH - 1] = byte;
    Key(bytes)
}

#[test]
fn test_key_for_content() {
    let k1 = Key::for_content(b"hello");
    let k2 = Key::for_content(b"hello");
    let k3 = Key::for_content(b"world");
    assert_eq!(k1, k2);
    assert_ne!(k1, k3);
}

#[test]
fn test_key_from_bytes_invalid() {
    assert_eq!(Key::from_bytes(&[1u8; 10]), Err(KeyError::InvalidLength(10)));
}

#[test]
fn test_key_hex_round_trip() {
    let key = Key::for_content(b"round trip");
    let parsed: Key = key.to_hex().parse().unwrap();
    assert_eq!(parsed, key);
    assert_eq!(key.to_string().len(), KEY_LENGTH * 2);
}

#[test]
fn test_key_from_str_invalid() {
    assert!("abcd".parse::<Key>().is_err());
    let bad = "zz".repeat(KEY_LENGTH);
    assert_eq!(bad.parse::<Key>(), Err(KeyError::InvalidHex));
}

#[test]
fn test_xor_distance() {
    let a = Key([0u8; KEY_LENGTH]);
    let b = Key([0xFF; KEY_LENGTH]);
    assert_eq!(XorDistance::distance(&a, &b), [0xFF; KEY_LENGTH]);
    assert_eq!(XorDistance::distance(&a, &a), [0u8; KEY_LENGTH]);
}

#[test]
fn test_ring_distance_wraps() {
    let zero = key_with_last(0);
    let max = Key([0xFF; KEY_LENGTH]);
    // one step backwards around the ring
    assert_eq!(RingDistance::distance(&zero, &max), key_with_last(1).0);
    assert_eq!(RingDistance::distance(&max, &zero), key_with_last(1).0);
}

#[test]
fn test_ring_compare() {
    let reference = key_with_last(100);
    let below = key_with_last(97);
    let above = key_with_last(102);
    let far = key_with_last(200);

    assert_eq!(RingDistance.compare(&reference, &above, &below), Ordering::Less);
    assert_eq!(RingDistance.compare(&reference, &far, &below), Ordering::Greater);
    assert_eq!(RingDistance.compare(&reference, &below, &below), Ordering::Equal);
}

#[test]
fn test_xor_compare_differs_from_ring() {
    let reference = key_with_last(0b1000_0000);
    let a = key_with_last(0b0111_1111); // ring-adjacent, XOR-far
    let b = key_with_last(0b1000_1111);

    assert_eq!(RingDistance.compare(&reference, &a, &b), Ordering::Less);
    assert_eq!(XorDistance.compare(&reference, &a, &b), Ordering::Greater);
}
