use std::cmp::Ordering;

use super::Key;
use crate::constants::KEY_LENGTH;

/// Three-way "which key is closer" comparator.
///
/// `compare(reference, a, b)` returns `Less` when `a` is closer to
/// `reference` than `b`, `Greater` when `b` is closer and `Equal` when they
/// are equally close.
pub trait Closeness: Send + Sync {
    fn compare(&self, reference: &Key, a: &Key, b: &Key) -> Ordering;
}

/// Keys as 256-bit unsigned integers on a ring; distance is the shorter arc.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingDistance;

impl RingDistance {
    pub fn distance(a: &Key, b: &Key) -> [u8; KEY_LENGTH] {
        let up = wrapping_sub(&a.0, &b.0);
        let down = wrapping_sub(&b.0, &a.0);
        if up <= down {
            up
        } else {
            down
        }
    }
}

impl Closeness for RingDistance {
    fn compare(&self, reference: &Key, a: &Key, b: &Key) -> Ordering {
        Self::distance(reference, a).cmp(&Self::distance(reference, b))
    }
}

/// Kademlia XOR distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorDistance;

impl XorDistance {
    pub fn distance(a: &Key, b: &Key) -> [u8; KEY_LENGTH] {
        let mut dist = [0u8; KEY_LENGTH];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = a.0[i] ^ b.0[i];
        }
        dist
    }
}

impl Closeness for XorDistance {
    fn compare(&self, reference: &Key, a: &Key, b: &Key) -> Ordering {
        Self::distance(reference, a).cmp(&Self::distance(reference, b))
    }
}

/// Big-endian `a - b` modulo 2^256.
fn wrapping_sub(a: &[u8; KEY_LENGTH], b: &[u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
    let mut out = [0u8; KEY_LENGTH];
    let mut borrow = 0i16;
    for i in (0..KEY_LENGTH).rev() {
        let mut d = a[i] as i16 - b[i] as i16 - borrow;
        if d < 0 {
            d += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = d as u8;
    }
    out
}
