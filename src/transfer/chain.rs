use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::observer::TransferObserver;
use crate::constants::REPLY_CHANNEL_CAPACITY;
use crate::control::ControlCode;
use crate::store::WriteHandle;

static NEXT_CHAIN: AtomicU64 = AtomicU64::new(1);

/// Identifier of the request chain a transfer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl ChainId {
    pub fn next() -> Self {
        ChainId(NEXT_CHAIN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain {}", self.0)
    }
}

/// The single reply a transfer sends to its parent chain.
pub enum ChainReply {
    /// A receive finished. On success the closed write handle is handed to
    /// the parent, which decides whether to commit it.
    DataReceived {
        chain: ChainId,
        code: ControlCode,
        handle: Option<WriteHandle>,
    },
    /// A send finished.
    DataSent { chain: ChainId, code: ControlCode },
}

impl ChainReply {
    pub fn chain(&self) -> ChainId {
        match self {
            ChainReply::DataReceived { chain, .. } | ChainReply::DataSent { chain, .. } => *chain,
        }
    }

    pub fn code(&self) -> ControlCode {
        match self {
            ChainReply::DataReceived { code, .. } | ChainReply::DataSent { code, .. } => *code,
        }
    }
}

impl fmt::Debug for ChainReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainReply::DataReceived {
                chain,
                code,
                handle,
            } => f
                .debug_struct("DataReceived")
                .field("chain", chain)
                .field("code", code)
                .field("handle", &handle.as_ref().map(|h| *h.key()))
                .finish(),
            ChainReply::DataSent { chain, code } => f
                .debug_struct("DataSent")
                .field("chain", chain)
                .field("code", code)
                .finish(),
        }
    }
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub code: ControlCode,
    /// Blob bytes moved, padding excluded.
    pub moved: u64,
}

/// Creates the channel a parent chain receives transfer replies on.
pub fn reply_channel() -> (mpsc::Sender<ChainReply>, mpsc::Receiver<ChainReply>) {
    mpsc::channel(REPLY_CHANNEL_CAPACITY)
}

pub(crate) async fn send_reply(reply: Option<mpsc::Sender<ChainReply>>, message: ChainReply) {
    let Some(reply) = reply else {
        return;
    };
    let chain = message.chain();
    if reply.send(message).await.is_err() {
        debug!("{} parent is gone, reply dropped", chain);
    }
}

/// Abort request shared between a running transfer and its handle.
pub(crate) struct AbortSignal {
    chain: ChainId,
    request: Mutex<Option<(ControlCode, bool)>>,
    notify: Notify,
    observer: Arc<dyn TransferObserver>,
}

impl AbortSignal {
    pub(crate) fn new(chain: ChainId, observer: Arc<dyn TransferObserver>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            request: Mutex::new(None),
            notify: Notify::new(),
            observer,
        })
    }

    /// Records an abort; the first code sticks.
    pub(crate) fn raise(&self, code: ControlCode, silent: bool) -> bool {
        let mut request = self.request.lock();
        match *request {
            None => {
                *request = Some((code, silent));
                drop(request);
                self.notify.notify_one();
                true
            }
            Some((kept, _)) => {
                if kept != code {
                    self.observer.code_conflict(self.chain, kept, code);
                }
                false
            }
        }
    }

    pub(crate) fn requested(&self) -> Option<(ControlCode, bool)> {
        *self.request.lock()
    }

    pub(crate) async fn raised(&self) {
        self.notify.notified().await;
    }
}

/// Handle to a spawned transfer.
pub struct TransferHandle {
    chain: ChainId,
    signal: Arc<AbortSignal>,
    task: JoinHandle<TransferReport>,
}

impl TransferHandle {
    pub(crate) fn new(
        chain: ChainId,
        signal: Arc<AbortSignal>,
        task: JoinHandle<TransferReport>,
    ) -> Self {
        Self {
            chain,
            signal,
            task,
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Asks the transfer to stop with `code`. Only the first request counts;
    /// `silent` suppresses the reply to the parent.
    pub fn abort(&self, code: ControlCode, silent: bool) -> bool {
        self.signal.raise(code, silent)
    }

    /// Aborts with [`ControlCode::Cancelled`].
    pub fn cancel(&self) -> bool {
        self.abort(ControlCode::Cancelled, false)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Drops the transfer without waiting for it. Its store handle and
    /// network stream are released as it unwinds; an unfinished write is
    /// failed with [`ControlCode::Cancelled`]. No reply is sent.
    pub fn lost(self) {
        debug!("{} lost", self.chain);
        self.task.abort();
    }

    /// Waits for the transfer to finish.
    pub async fn join(self) -> TransferReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!("{} task ended abnormally: {}", self.chain, e);
                TransferReport {
                    code: ControlCode::Cancelled,
                    moved: 0,
                }
            }
        }
    }
}
