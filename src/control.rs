//! Control codes and part framing.
//!
//! Every transfer and every store write ends with exactly one [`ControlCode`].
//! The same codes travel in-band: blob bytes are split into parts of
//! `part_size` payload bytes, each followed by one control byte. A sender
//! that has to give up mid-transfer pads the current part and ends it with
//! the control byte describing why, so the receiver learns of the truncation
//! without the sender revealing how much real data there was.
//!
//! # Examples
//!
//! ```
//! use peerstore::control::{frame, framed_length, ControlCode};
//!
//! let framed = frame(&[7u8; 10], 4);
//! assert_eq!(framed.len() as u64, framed_length(10, 4));
//! assert_eq!(framed[4], ControlCode::Ok.as_byte());
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::CONTROL_LENGTH;

/// Terminal outcome of a transfer or store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCode {
    /// Completed successfully.
    Ok = 0x00,
    /// The upstream source died; the receiver should expect a restart.
    Restarted = 0x01,
    /// Aborted by local policy.
    Aborted = 0x02,
    /// Data failed verification.
    BadData = 0x03,
    /// The outbound connection died.
    SendConnDied = 0x04,
    /// The inbound connection died.
    RecvConnDied = 0x05,
    /// The key did not match the data.
    BadKey = 0x06,
    /// The local store failed.
    CacheFailed = 0x07,
    /// Cancelled by the owner of the transfer.
    Cancelled = 0x08,
    /// The receiving side terminated the transfer.
    ReceiverKilled = 0x09,
    /// The receiving side stopped reading in time.
    SendTimeout = 0x0a,
}

impl ControlCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ControlCode::Ok),
            0x01 => Some(ControlCode::Restarted),
            0x02 => Some(ControlCode::Aborted),
            0x03 => Some(ControlCode::BadData),
            0x04 => Some(ControlCode::SendConnDied),
            0x05 => Some(ControlCode::RecvConnDied),
            0x06 => Some(ControlCode::BadKey),
            0x07 => Some(ControlCode::CacheFailed),
            0x08 => Some(ControlCode::Cancelled),
            0x09 => Some(ControlCode::ReceiverKilled),
            0x0a => Some(ControlCode::SendTimeout),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == ControlCode::Ok
    }

    /// Whether a sender failing with this code pads out the current part
    /// instead of closing the connection.
    pub fn is_padded(self) -> bool {
        matches!(self, ControlCode::Aborted | ControlCode::Restarted)
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlCode::Ok => "OK",
            ControlCode::Restarted => "RESTARTED",
            ControlCode::Aborted => "ABORTED",
            ControlCode::BadData => "BAD_DATA",
            ControlCode::SendConnDied => "SEND_CONN_DIED",
            ControlCode::RecvConnDied => "RECV_CONN_DIED",
            ControlCode::BadKey => "BAD_KEY",
            ControlCode::CacheFailed => "CACHE_FAILED",
            ControlCode::Cancelled => "CANCELLED",
            ControlCode::ReceiverKilled => "RECEIVER_KILLED",
            ControlCode::SendTimeout => "SEND_TIMEOUT",
        }
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Length of a part including its control byte.
pub fn part_length(part_size: u64) -> u64 {
    part_size + CONTROL_LENGTH
}

/// Number of bytes `data_len` payload bytes occupy once framed.
///
/// A `part_size` of zero means the data is not framed.
pub fn framed_length(data_len: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return data_len;
    }
    data_len + data_len.div_ceil(part_size) * CONTROL_LENGTH
}

/// Whether framed offset `offset` of a stream `total` bytes long holds a
/// control byte.
pub fn is_control_offset(offset: u64, total: u64, part_size: u64) -> bool {
    if part_size == 0 {
        return false;
    }
    offset + 1 == total || (offset + 1) % part_length(part_size) == 0
}

/// Frames `data` into parts of `part_size` bytes, each ended by an OK byte.
pub fn frame(data: &[u8], part_size: u64) -> Bytes {
    if part_size == 0 {
        return Bytes::copy_from_slice(data);
    }
    let mut out = BytesMut::with_capacity(framed_length(data.len() as u64, part_size) as usize);
    for part in data.chunks(part_size as usize) {
        out.put_slice(part);
        out.put_u8(ControlCode::Ok.as_byte());
    }
    out.freeze()
}

/// Removes control bytes from a framed stream, failing on the first control
/// byte that is not OK.
pub fn unframe(framed: &[u8], part_size: u64) -> Result<Bytes, ControlCode> {
    if part_size == 0 {
        return Ok(Bytes::copy_from_slice(framed));
    }
    let mut out = BytesMut::with_capacity(framed.len());
    for part in framed.chunks(part_length(part_size) as usize) {
        let (payload, control) = part.split_at(part.len() - 1);
        match ControlCode::from_byte(control[0]) {
            Some(ControlCode::Ok) => out.put_slice(payload),
            Some(code) => return Err(code),
            None => return Err(ControlCode::BadData),
        }
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_code_bytes() {
        for byte in 0u8..=0x0a {
            let code = ControlCode::from_byte(byte).unwrap();
            assert_eq!(code.as_byte(), byte);
        }
        assert!(ControlCode::from_byte(0x0b).is_none());
        assert!(ControlCode::from_byte(0xff).is_none());
    }

    #[test]
    fn test_padded_codes() {
        assert!(ControlCode::Aborted.is_padded());
        assert!(ControlCode::Restarted.is_padded());
        assert!(!ControlCode::SendConnDied.is_padded());
        assert!(!ControlCode::Ok.is_padded());
    }

    #[test]
    fn test_framed_length() {
        assert_eq!(framed_length(10, 4), 13);
        assert_eq!(framed_length(8, 4), 10);
        assert_eq!(framed_length(0, 4), 0);
        assert_eq!(framed_length(10, 0), 10);
    }

    #[test]
    fn test_control_offsets() {
        // parts: [0..4) payload, 4 control, [5..9) payload, 9 control, 10..12 payload, 12 control
        let total = framed_length(10, 4);
        let controls: Vec<u64> = (0..total)
            .filter(|&o| is_control_offset(o, total, 4))
            .collect();
        assert_eq!(controls, vec![4, 9, 12]);
    }

    #[test]
    fn test_unframe_rejects_bad_control() {
        let mut framed = frame(b"abcdefgh", 4).to_vec();
        assert_eq!(unframe(&framed, 4).unwrap().as_ref(), b"abcdefgh");

        framed[9] = ControlCode::Restarted.as_byte();
        assert_eq!(unframe(&framed, 4), Err(ControlCode::Restarted));
    }
}
