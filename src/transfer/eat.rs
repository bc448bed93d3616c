use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncRead;
use tracing::trace;

use super::chain::{AbortSignal, ChainId, TransferHandle, TransferReport};
use super::config::TransferConfig;
use super::error::TransferError;
use super::observer::{TracingObserver, TransferKind, TransferObserver, TransferStats};
use super::source::VerifyingReader;
use crate::control::ControlCode;

/// Reads and discards the rest of an incoming blob.
///
/// Keeps the connection in sync after the local side gave up on storing the
/// data. Produces no reply; its statistics go to the observer.
pub struct EatData<R> {
    chain: ChainId,
    source: VerifyingReader<R>,
    config: TransferConfig,
    observer: Arc<dyn TransferObserver>,
}

impl<R: AsyncRead + Unpin + Send + 'static> EatData<R> {
    pub fn new(chain: ChainId, source: VerifyingReader<R>) -> Self {
        Self {
            chain,
            source,
            config: TransferConfig::default(),
            observer: Arc::new(TracingObserver),
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
        let length = self.source.remaining();
        let mut moved = 0u64;

        let code = match self.drain(&signal, &mut moved).await {
            Ok(()) => ControlCode::Ok,
            Err(e) => e.receive_code(),
        };
        drop(self.source);

        self.observer.transfer_finished(&TransferStats {
            kind: TransferKind::Eat,
            chain: self.chain,
            length,
            moved,
            padded: 0,
            code,
            elapsed: started.elapsed(),
        });
        TransferReport { code, moved }
    }

    async fn drain(&mut self, signal: &AbortSignal, moved: &mut u64) -> Result<(), TransferError> {
        let pool = Arc::clone(&self.config.pool);
        let mut block = pool.get(self.config.block_size.max(1));
        let result = loop {
            if let Some((code, _)) = signal.requested() {
                break Err(TransferError::Aborted(code));
            }
            if self.source.remaining() == 0 {
                break Ok(());
            }
            let want = (self.source.remaining() as usize).min(block.len());
            self.config.acquire_inbound(want).await;

            let read = tokio::select! {
                biased;
                _ = signal.raised() => None,
                r = self.source.read(&mut block[..want]) => Some(r),
            };
            match read {
                None => continue,
                Some(Ok(n)) => {
                    *moved += n as u64;
                    trace!("{} discarded {} bytes", self.chain, n);
                }
                Some(Err(e)) => break Err(e.into()),
            }
        };
        pool.put(block);
        result
    }
}
