use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::chain::{send_reply, AbortSignal, ChainId, ChainReply, TransferHandle, TransferReport};
use super::config::TransferConfig;
use super::error::TransferError;
use super::observer::{TracingObserver, TransferKind, TransferObserver, TransferStats};
use super::run_blocking;
use super::sink::TrailerSink;
use crate::control::{part_length, ControlCode};
use crate::store::{ReadHandle, StoreError};

/// Phase of a sending transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Init,
    AwaitingIo,
    Padding,
    Done,
}

/// Streams a store entry to a trailer sink.
///
/// Each cycle reads at most one packet from the store and writes it to the
/// sink. When the transfer fails partway with [`ControlCode::Aborted`] or
/// [`ControlCode::Restarted`] it pads out the current part with random bytes
/// and ends it with the failure code, so the receiver's verifying reader
/// sees why the data stopped. Any other failure closes the sink.
///
/// Parts are `part_size + CONTROL_LENGTH` bytes long, counted from the start
/// of the transfer; the part size comes from the entry's metadata.
pub struct SendData<S> {
    chain: ChainId,
    reader: Option<ReadHandle>,
    sink: S,
    state: TransferState,
    length: u64,
    part_size: u64,
    moved: u64,
    padded: u64,
    code: ControlCode,
    /// A sink write was abandoned partway, so the part boundary is lost.
    interrupted: bool,
    config: TransferConfig,
    observer: Arc<dyn TransferObserver>,
    reply: Option<mpsc::Sender<ChainReply>>,
    silent: bool,
}

impl<S: TrailerSink + 'static> SendData<S> {
    pub fn new(chain: ChainId, reader: ReadHandle, sink: S) -> Self {
        Self {
            chain,
            length: reader.length(),
            reader: Some(reader),
            sink,
            state: TransferState::Init,
            part_size: 0,
            moved: 0,
            padded: 0,
            code: ControlCode::Ok,
            interrupted: false,
            config: TransferConfig::default(),
            observer: Arc::new(TracingObserver),
            reply: None,
            silent: false,
        }
    }

    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_reply(mut self, reply: mpsc::Sender<ChainReply>) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Suppresses the reply to the parent.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn spawn(self) -> TransferHandle {
        let chain = self.chain;
        let signal = AbortSignal::new(chain, Arc::clone(&self.observer));
        let task = tokio::spawn(self.execute(Arc::clone(&signal)));
        TransferHandle::new(chain, signal, task)
    }

    pub async fn run(self) -> TransferReport {
        let signal = AbortSignal::new(self.chain, Arc::clone(&self.observer));
        self.execute(signal).await
    }

    async fn execute(mut self, signal: Arc<AbortSignal>) -> TransferReport {
        let started = Instant::now();

        loop {
            trace!("{} send state {:?}", self.chain, self.state);
            match self.state {
                TransferState::Init => match self.init().await {
                    Ok(()) => self.state = TransferState::AwaitingIo,
                    Err(e) => self.failed(e).await,
                },
                TransferState::AwaitingIo => {
                    if self.moved == self.length {
                        self.state = TransferState::Done;
                        continue;
                    }
                    if let Some((code, silent)) = signal.requested() {
                        self.silent |= silent;
                        self.failed(TransferError::Aborted(code)).await;
                        continue;
                    }
                    if let Err(e) = self.cycle(&signal).await {
                        self.failed(e).await;
                    }
                }
                TransferState::Padding => {
                    self.pad().await;
                    self.state = TransferState::Done;
                }
                TransferState::Done => break,
            }
        }
        if let Some((_, silent)) = signal.requested() {
            self.silent |= silent;
        }
        drop(self.reader.take());

        self.observer.transfer_finished(&TransferStats {
            kind: TransferKind::Send,
            chain: self.chain,
            length: self.length,
            moved: self.moved,
            padded: self.padded,
            code: self.code,
            elapsed: started.elapsed(),
        });

        if !self.silent {
            let reply = self.reply.take();
            send_reply(
                reply,
                ChainReply::DataSent {
                    chain: self.chain,
                    code: self.code,
                },
            )
            .await;
        }
        TransferReport {
            code: self.code,
            moved: self.moved,
        }
    }

    /// Parses the entry's metadata to learn the part size.
    async fn init(&mut self) -> Result<(), TransferError> {
        let mut reader = self
            .reader
            .take()
            .ok_or(TransferError::Store(StoreError::Closed))?;
        let (reader, result) = run_blocking(move || {
            let result = reader.storables().map(|s| s.part_size());
            (reader, result)
        })
        .await?;
        self.length = reader.length();
        self.reader = Some(reader);
        self.part_size = result?;
        debug!(
            "{} sending {} bytes in parts of {}",
            self.chain, self.length, self.part_size
        );
        Ok(())
    }

    /// Moves one packet from the store to the sink. An abort raised while
    /// either side is blocked ends the cycle at once.
    async fn cycle(&mut self, signal: &AbortSignal) -> Result<(), TransferError> {
        let want = (self.length - self.moved).min(self.config.packet_size.max(1) as u64) as usize;
        let mut reader = self
            .reader
            .take()
            .ok_or(TransferError::Store(StoreError::Closed))?;
        let block = self.config.pool.get(want);

        let mut read = tokio::task::spawn_blocking(move || {
            let mut block = block;
            let result = reader.read(&mut block);
            (reader, block, result)
        });
        let joined = tokio::select! {
            biased;
            _ = signal.raised() => None,
            r = &mut read => Some(r),
        };
        let Some(joined) = joined else {
            // The store call still owns the handle; it is released and the
            // block returned once that call comes back.
            let pool = Arc::clone(&self.config.pool);
            tokio::spawn(async move {
                if let Ok((_reader, block, _)) = read.await {
                    pool.put(block);
                }
            });
            return Err(abort_error(signal));
        };
        let (reader, block, result) = joined.map_err(|e| TransferError::Join(e.to_string()))?;
        self.reader = Some(reader);

        let n = match result {
            Ok(0) => Err(StoreError::Failed(ControlCode::CacheFailed)),
            other => other,
        };
        let n = match n {
            Ok(n) => n,
            Err(e) => {
                self.config.pool.put(block);
                warn!("{} store read failed at {}: {}", self.chain, self.moved, e);
                return Err(e.into());
            }
        };

        let chunk = Bytes::copy_from_slice(&block[..n]);
        self.config.pool.put(block);
        self.config.acquire_outbound(n).await;
        if signal.requested().is_some() {
            return Err(abort_error(signal));
        }
        let written = tokio::select! {
            biased;
            _ = signal.raised() => None,
            r = self.sink.write_trailing(chunk) => Some(r),
        };
        match written {
            Some(r) => r?,
            None => {
                self.interrupted = true;
                return Err(abort_error(signal));
            }
        }
        self.moved += n as u64;
        Ok(())
    }

    async fn failed(&mut self, err: TransferError) {
        let code = err.send_code();
        debug!("{} send failed at {}: {} ({})", self.chain, self.moved, err, code);
        self.code = code;

        let can_pad = code.is_padded()
            && self.part_size > 0
            && self.moved < self.length
            && !self.interrupted
            && !self.sink.was_terminated();
        if can_pad {
            self.state = TransferState::Padding;
            return;
        }
        if let Err(e) = self.sink.close().await {
            debug!("{} closing sink: {}", self.chain, e);
        }
        self.state = TransferState::Done;
    }

    /// Number of bytes that complete the current part, capped at the end of
    /// the blob.
    fn padding_length(&self) -> u64 {
        let part_len = part_length(self.part_size);
        (part_len - self.moved % part_len).min(self.length - self.moved)
    }

    async fn pad(&mut self) {
        let mut remaining = self.padding_length();
        debug!(
            "{} padding {} bytes with {} after {} bytes",
            self.chain, remaining, self.code, self.moved
        );
        let packet = self.config.packet_size.max(1) as u64;

        while remaining > 0 {
            let n = remaining.min(packet) as usize;
            let mut chunk = BytesMut::zeroed(n);
            rand::rng().fill(&mut chunk[..]);
            if remaining == n as u64 {
                chunk[n - 1] = self.code.as_byte();
            }
            if let Err(e) = self.sink.write_trailing(chunk.freeze()).await {
                debug!("{} padding write failed: {}", self.chain, e);
                return;
            }
            self.padded += n as u64;
            remaining -= n as u64;
        }
    }
}

fn abort_error(signal: &AbortSignal) -> TransferError {
    let code = signal
        .requested()
        .map_or(ControlCode::Cancelled, |(code, _)| code);
    TransferError::Aborted(code)
}
