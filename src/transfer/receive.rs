use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::chain::{send_reply, AbortSignal, ChainId, ChainReply, TransferHandle, TransferReport};
use super::config::TransferConfig;
use super::eat::EatData;
use super::error::TransferError;
use super::observer::{TracingObserver, TransferKind, TransferObserver, TransferStats};
use super::run_blocking;
use super::source::VerifyingReader;
use crate::control::ControlCode;
use crate::store::{StoreError, WriteHandle};

/// Copies an incoming blob from the network into a store entry.
///
/// Moves the source's framed bytes into the write handle block by block.
/// A failure on the network side ends the transfer with
/// [`ControlCode::RecvConnDied`] (or the code a sender padded with); a
/// failure on the store side ends it with [`ControlCode::CacheFailed`] and
/// hands the rest of the stream to [`EatData`] so the connection stays in
/// sync. Either way the write handle is failed with the same code.
///
/// On success the closed handle goes to the parent in
/// [`ChainReply::DataReceived`]. A silent transfer, or one without a reply
/// channel, commits the handle itself.
pub struct ReceiveData<R> {
    chain: ChainId,
    source: Option<VerifyingReader<R>>,
    length: u64,
    writer: Option<WriteHandle>,
    moved: u64,
    config: TransferConfig,
    observer: Arc<dyn TransferObserver>,
    reply: Option<mpsc::Sender<ChainReply>>,
    silent: bool,
}

impl<R: AsyncRead + Unpin + Send + 'static> ReceiveData<R> {
    pub fn new(chain: ChainId, source: VerifyingReader<R>, writer: WriteHandle) -> Self {
        Self {
            chain,
            length: source.length(),
            source: Some(source),
            writer: Some(writer),
            moved: 0,
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

        let result = self.pump(&signal).await;
        if let Some((_, silent)) = signal.requested() {
            self.silent |= silent;
        }

        let (code, handle) = match result {
            Ok(()) => self.complete(),
            Err(e) => (self.fail(e), None),
        };

        self.observer.transfer_finished(&TransferStats {
            kind: TransferKind::Receive,
            chain: self.chain,
            length: self.length,
            moved: self.moved,
            padded: 0,
            code,
            elapsed: started.elapsed(),
        });

        if !self.silent {
            let reply = self.reply.take();
            send_reply(
                reply,
                ChainReply::DataReceived {
                    chain: self.chain,
                    code,
                    handle,
                },
            )
            .await;
        }
        TransferReport {
            code,
            moved: self.moved,
        }
    }

    async fn pump(&mut self, signal: &AbortSignal) -> Result<(), TransferError> {
        let pool = Arc::clone(&self.config.pool);
        let block_size = self.config.block_size.max(1);
        let source = self
            .source
            .as_mut()
            .ok_or(TransferError::Store(StoreError::Closed))?;

        while source.remaining() > 0 {
            if let Some((code, _)) = signal.requested() {
                return Err(TransferError::Aborted(code));
            }
            let want = source.remaining().min(block_size as u64) as usize;
            let mut block = pool.get(want);
            self.config.acquire_inbound(want).await;

            let read = tokio::select! {
                biased;
                _ = signal.raised() => None,
                r = source.read(&mut block) => Some(r),
            };
            let n = match read {
                None => {
                    pool.put(block);
                    continue;
                }
                Some(Ok(n)) => n,
                Some(Err(e)) => {
                    pool.put(block);
                    return Err(e.into());
                }
            };

            let mut writer = self
                .writer
                .take()
                .ok_or(TransferError::Store(StoreError::Closed))?;
            let (writer, block, result) = run_blocking(move || {
                let result = writer.write(&block[..n]);
                (writer, block, result)
            })
            .await?;
            self.writer = Some(writer);
            pool.put(block);
            result?;

            self.moved += n as u64;
            trace!("{} stored {} of {} bytes", self.chain, self.moved, self.length);
        }
        Ok(())
    }

    /// Closes the handle after every byte arrived. Commits it here unless
    /// the parent will.
    fn complete(&mut self) -> (ControlCode, Option<WriteHandle>) {
        let Some(mut writer) = self.writer.take() else {
            return (ControlCode::CacheFailed, None);
        };
        if let Err(e) = writer.close() {
            warn!("{} could not close {}: {}", self.chain, writer.key(), e);
            return (ControlCode::CacheFailed, None);
        }

        if !self.silent && self.reply.is_some() {
            return (ControlCode::Ok, Some(writer));
        }
        match writer.commit() {
            Ok(()) => debug!("{} committed {}", self.chain, writer.key()),
            Err(StoreError::Collision(key)) => {
                info!("{} received {} but it is already stored", self.chain, key)
            }
            Err(e) => warn!("{} commit of {} failed: {}", self.chain, writer.key(), e),
        }
        (ControlCode::Ok, None)
    }

    fn fail(&mut self, err: TransferError) -> ControlCode {
        let code = err.receive_code();
        debug!("{} receive failed: {}", self.chain, err);

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.fail(code) {
                warn!("{} could not fail {}: {}", self.chain, writer.key(), e);
            }
        }

        let Some(mut source) = self.source.take() else {
            return code;
        };
        if !err.source_healthy() {
            source.discontinue();
        } else if source.remaining() > 0 {
            self.drain(source);
        }
        code
    }

    fn drain(&self, source: VerifyingReader<R>) {
        debug!(
            "{} draining {} remaining bytes",
            self.chain,
            source.remaining()
        );
        EatData::new(self.chain, source)
            .with_config(self.config.clone())
            .with_observer(Arc::clone(&self.observer))
            .spawn();
    }
}
