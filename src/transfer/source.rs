use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::config::TransferConfig;
use super::error::SourceError;
use crate::control::{part_length, ControlCode};

/// Network byte source that checks the control byte closing every part.
///
/// Knows the framed length of the blob it is reading and never reads past
/// it. A control byte that is not OK raises [`SourceError::DataNotValid`]
/// with the code the sender padded with.
pub struct VerifyingReader<R> {
    inner: R,
    length: u64,
    part_size: u64,
    offset: u64,
    read_timeout: Duration,
    failed: bool,
    discontinued: bool,
}

impl<R: AsyncRead + Unpin + Send> VerifyingReader<R> {
    /// Wraps `inner`, which will deliver `length` framed bytes.
    pub fn new(inner: R, length: u64, part_size: u64, read_timeout: Duration) -> Self {
        Self {
            inner,
            length,
            part_size,
            offset: 0,
            read_timeout,
            failed: false,
            discontinued: false,
        }
    }

    /// Wraps `inner` with the read timeout of `config`.
    pub fn with_config(inner: R, length: u64, part_size: u64, config: &TransferConfig) -> Self {
        Self::new(inner, length, part_size, config.read_timeout)
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.offset
    }

    pub fn remaining(&self) -> u64 {
        self.length - self.offset
    }

    /// Whether the stream can still be read or drained.
    pub fn is_healthy(&self) -> bool {
        !self.failed && !self.discontinued
    }

    /// Reads up to `buf.len()` bytes; `Ok(0)` once `length` bytes were read.
    ///
    /// Cancel safe: bytes are only accounted once the inner read completes.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if self.failed || self.discontinued {
            return Err(SourceError::Eof);
        }
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = (buf.len() as u64).min(remaining) as usize;

        let n = match timeout(self.read_timeout, self.inner.read(&mut buf[..limit])).await {
            Err(_) => return Err(self.fail(SourceError::Timeout)),
            Ok(Err(e)) => return Err(self.fail(SourceError::Io(e))),
            Ok(Ok(0)) => return Err(self.fail(SourceError::Eof)),
            Ok(Ok(n)) => n,
        };

        let start = self.offset;
        self.offset += n as u64;
        if let Err(code) = self.verify(start, &buf[..n]) {
            debug!("Control byte {} at part ending before {}", code, self.offset);
            return Err(self.fail(SourceError::DataNotValid(code)));
        }
        trace!("Read {} bytes ({} of {})", n, self.offset, self.length);
        Ok(n)
    }

    /// Checks every control byte in `chunk`, which starts at `start`.
    fn verify(&self, start: u64, chunk: &[u8]) -> Result<(), ControlCode> {
        if self.part_size == 0 {
            return Ok(());
        }
        let part_len = part_length(self.part_size);
        let end = start + chunk.len() as u64;
        let mut control = (start / part_len + 1) * part_len - 1;
        loop {
            let at = control.min(self.length - 1);
            if at >= end {
                return Ok(());
            }
            if at >= start {
                let byte = chunk[(at - start) as usize];
                match ControlCode::from_byte(byte) {
                    Some(ControlCode::Ok) => {}
                    Some(code) => return Err(code),
                    None => return Err(ControlCode::BadData),
                }
            }
            if at == self.length - 1 {
                return Ok(());
            }
            control += part_len;
        }
    }

    fn fail(&mut self, err: SourceError) -> SourceError {
        self.failed = true;
        err
    }

    /// Marks the stream as unusable; the connection must not be reused.
    pub fn discontinue(&mut self) {
        if !self.discontinued {
            debug!(
                "Discontinuing source at {} of {} bytes",
                self.offset, self.length
            );
            self.discontinued = true;
        }
    }

    /// Ends reading. Returns the stream when it was read completely and can
    /// carry further messages.
    pub fn close(self) -> Option<R> {
        if self.is_healthy() && self.offset == self.length {
            Some(self.inner)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::frame;
    use std::io::Cursor;

    fn reader(data: Vec<u8>, length: u64, part_size: u64) -> VerifyingReader<Cursor<Vec<u8>>> {
        VerifyingReader::new(Cursor::new(data), length, part_size, Duration::from_secs(1))
    }

    async fn read_to_end<R: AsyncRead + Unpin + Send>(
        source: &mut VerifyingReader<R>,
        chunk: usize,
    ) -> Result<Vec<u8>, SourceError> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_reads_framed_stream() {
        let framed = frame(&[5u8; 100], 8).to_vec();
        let length = framed.len() as u64;
        let mut source = reader(framed.clone(), length, 8);

        let out = read_to_end(&mut source, 7).await.unwrap();
        assert_eq!(out, framed);
        assert_eq!(source.remaining(), 0);
        assert!(source.close().is_some());
    }

    #[tokio::test]
    async fn test_stops_at_length() {
        let mut data = frame(&[1u8; 16], 8).to_vec();
        data.extend_from_slice(b"next message");
        let mut source = reader(data, 18, 8);

        let out = read_to_end(&mut source, 64).await.unwrap();
        assert_eq!(out.len(), 18);
    }

    #[tokio::test]
    async fn test_bad_control_byte() {
        let mut framed = frame(&[9u8; 20], 8).to_vec();
        framed[17] = ControlCode::Restarted.as_byte();
        let length = framed.len() as u64;
        let mut source = reader(framed, length, 8);

        let err = read_to_end(&mut source, 4).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::DataNotValid(ControlCode::Restarted)
        ));
        assert!(!source.is_healthy());
        assert!(source.close().is_none());
    }

    #[tokio::test]
    async fn test_final_short_part() {
        let mut framed = frame(&[9u8; 20], 8).to_vec();
        let last = framed.len() - 1;
        framed[last] = 0xee;
        let length = framed.len() as u64;
        let mut source = reader(framed, length, 8);

        let err = read_to_end(&mut source, 64).await.unwrap_err();
        assert!(matches!(err, SourceError::DataNotValid(ControlCode::BadData)));
    }

    #[tokio::test]
    async fn test_unframed_passthrough() {
        let mut source = reader(vec![0xff; 10], 10, 0);
        assert_eq!(read_to_end(&mut source, 3).await.unwrap(), vec![0xff; 10]);
    }

    #[tokio::test]
    async fn test_early_eof() {
        let mut source = reader(vec![0u8; 5], 10, 0);
        let err = read_to_end(&mut source, 16).await.unwrap_err();
        assert!(matches!(err, SourceError::Eof));
        assert_eq!(source.consumed(), 5);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (_tx, rx) = tokio::io::duplex(64);
        let config = TransferConfig::default().with_read_timeout(Duration::from_millis(20));
        let mut source = VerifyingReader::with_config(rx, 10, 0, &config);
        let mut buf = [0u8; 4];
        assert!(matches!(
            source.read(&mut buf).await,
            Err(SourceError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_discontinue() {
        let mut source = reader(vec![0u8; 10], 10, 0);
        source.discontinue();
        assert!(!source.is_healthy());
        let mut buf = [0u8; 4];
        assert!(source.read(&mut buf).await.is_err());
    }
}
