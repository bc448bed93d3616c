use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use super::config::TransferConfig;
use super::error::SinkError;

/// Chunked output of a sending transfer.
///
/// Each [`write_trailing`](Self::write_trailing) call reports the outcome of
/// exactly that chunk.
#[async_trait]
pub trait TrailerSink: Send {
    async fn write_trailing(&mut self, data: Bytes) -> Result<(), SinkError>;

    /// Whether the receiving side terminated the stream.
    fn was_terminated(&self) -> bool;

    /// Whether the receiving side stopped accepting data in time.
    fn was_client_timeout(&self) -> bool;

    async fn close(&mut self) -> Result<(), SinkError>;
}

/// [`TrailerSink`] over any async byte stream, with a per-chunk write
/// timeout.
pub struct StreamSink<W> {
    inner: Option<W>,
    write_timeout: Duration,
    terminated: bool,
    client_timeout: bool,
}

impl<W: AsyncWrite + Unpin + Send> StreamSink<W> {
    pub fn new(inner: W, write_timeout: Duration) -> Self {
        Self {
            inner: Some(inner),
            write_timeout,
            terminated: false,
            client_timeout: false,
        }
    }

    /// Wraps `inner` with the write timeout of `config`.
    pub fn with_config(inner: W, config: &TransferConfig) -> Self {
        Self::new(inner, config.write_timeout)
    }

    /// Returns the stream if the sink was not closed.
    pub fn into_inner(mut self) -> Option<W> {
        self.inner.take()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TrailerSink for StreamSink<W> {
    async fn write_trailing(&mut self, data: Bytes) -> Result<(), SinkError> {
        let inner = self.inner.as_mut().ok_or(SinkError::Closed)?;
        match timeout(self.write_timeout, inner.write_all(&data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if is_termination(&e) => {
                debug!("Receiver terminated stream: {}", e);
                self.terminated = true;
                Err(SinkError::Terminated)
            }
            Ok(Err(e)) => Err(SinkError::Io(e)),
            Err(_) => {
                self.client_timeout = true;
                Err(SinkError::Timeout)
            }
        }
    }

    fn was_terminated(&self) -> bool {
        self.terminated
    }

    fn was_client_timeout(&self) -> bool {
        self.client_timeout
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        match timeout(self.write_timeout, inner.shutdown()).await {
            Ok(result) => result.map_err(SinkError::Io),
            Err(_) => Err(SinkError::Timeout),
        }
    }
}

fn is_termination(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_writes_chunks() {
        let (tx, mut rx) = tokio::io::duplex(1024);
        let mut sink = StreamSink::new(tx, Duration::from_secs(1));

        sink.write_trailing(Bytes::from_static(b"abc")).await.unwrap();
        sink.write_trailing(Bytes::from_static(b"def")).await.unwrap();
        sink.close().await.unwrap();

        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abcdef");
        assert!(matches!(
            sink.write_trailing(Bytes::from_static(b"x")).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_receiver_gone() {
        let (tx, rx) = tokio::io::duplex(16);
        drop(rx);
        let mut sink = StreamSink::new(tx, Duration::from_secs(1));

        assert!(matches!(
            sink.write_trailing(Bytes::from_static(b"lost")).await,
            Err(SinkError::Terminated)
        ));
        assert!(sink.was_terminated());
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let (tx, _rx) = tokio::io::duplex(4);
        let config = TransferConfig::default().with_write_timeout(Duration::from_millis(20));
        let mut sink = StreamSink::with_config(tx, &config);

        assert!(matches!(
            sink.write_trailing(Bytes::from_static(b"too much data")).await,
            Err(SinkError::Timeout)
        ));
        assert!(sink.was_client_timeout());
        assert!(!sink.was_terminated());
    }
}
