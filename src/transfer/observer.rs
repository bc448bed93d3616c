use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::chain::ChainId;
use crate::control::ControlCode;

/// Which state machine a statistics record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Receive,
    Send,
    Eat,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferKind::Receive => "receive",
            TransferKind::Send => "send",
            TransferKind::Eat => "eat",
        })
    }
}

/// Statistics of one finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStats {
    pub kind: TransferKind,
    pub chain: ChainId,
    /// Bytes the transfer was asked to move.
    pub length: u64,
    /// Blob bytes actually moved, padding excluded.
    pub moved: u64,
    /// Padding bytes written after a failure.
    pub padded: u64,
    pub code: ControlCode,
    pub elapsed: Duration,
}

/// Receives transfer diagnostics.
///
/// Every transfer calls [`transfer_finished`](Self::transfer_finished)
/// exactly once.
pub trait TransferObserver: Send + Sync {
    fn transfer_finished(&self, stats: &TransferStats);

    /// A transfer attempted to set a second, different failure code.
    fn code_conflict(&self, chain: ChainId, kept: ControlCode, ignored: ControlCode) {
        let _ = (chain, kept, ignored);
    }
}

/// Logs transfer diagnostics through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn transfer_finished(&self, stats: &TransferStats) {
        if stats.code.is_ok() {
            debug!(
                "{} {} moved {} bytes in {:?}",
                stats.kind, stats.chain, stats.moved, stats.elapsed
            );
        } else {
            info!(
                "{} {} failed with {} after {} of {} bytes ({} padded) in {:?}",
                stats.kind,
                stats.chain,
                stats.code,
                stats.moved,
                stats.length,
                stats.padded,
                stats.elapsed
            );
        }
    }

    fn code_conflict(&self, chain: ChainId, kept: ControlCode, ignored: ControlCode) {
        warn!("{} already failed with {}, ignoring {}", chain, kept, ignored);
    }
}

/// Discards transfer diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TransferObserver for NullObserver {
    fn transfer_finished(&self, _stats: &TransferStats) {}
}
