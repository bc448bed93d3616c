//! Keys and the closeness metrics used to order them.
//!
//! A [`Key`] is a fixed-length identifier for a stored blob. The store keeps
//! its index in raw byte order, but "nearest key" queries are answered with a
//! pluggable [`Closeness`] comparator:
//!
//! - [`RingDistance`] - keys as points on a circle, distance is the shorter arc
//! - [`XorDistance`] - Kademlia XOR distance
//!
//! # Examples
//!
//! ```
//! use peerstore::key::{Closeness, Key, RingDistance};
//! use std::cmp::Ordering;
//!
//! let target = Key::from_bytes(&[0x80; 32]).unwrap();
//! let near = Key::from_bytes(&[0x81; 32]).unwrap();
//! let far = Key::from_bytes(&[0x10; 32]).unwrap();
//!
//! assert_eq!(RingDistance.compare(&target, &near, &far), Ordering::Less);
//! ```

mod closeness;
mod error;

pub use closeness::{Closeness, RingDistance, XorDistance};
pub use error::KeyError;

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::constants::KEY_LENGTH;

/// A fixed-length blob identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub [u8; KEY_LENGTH]);

impl Key {
    /// The lowest key.
    pub const MIN: Key = Key([0u8; KEY_LENGTH]);
    /// The highest key.
    pub const MAX: Key = Key([0xffu8; KEY_LENGTH]);

    /// Derives the content key of `data`.
    pub fn for_content(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&digest);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_LENGTH {
            return Err(KeyError::InvalidLength(bytes.len()));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().fold(String::with_capacity(KEY_LENGTH * 2), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != KEY_LENGTH * 2 {
            return Err(KeyError::InvalidLength(s.len() / 2));
        }
        let mut key = [0u8; KEY_LENGTH];
        for (i, byte) in key.iter_mut().enumerate() {
            let pair = s.get(i * 2..i * 2 + 2).ok_or(KeyError::InvalidHex)?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| KeyError::InvalidHex)?;
        }
        Ok(Self(key))
    }
}

#[cfg(test)]
mod tests;
