use thiserror::Error;

use super::allocator::BufferId;
use crate::control::ControlCode;
use crate::key::Key;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key already stored: {0}")]
    Collision(Key),

    #[error("no space for {0} bytes")]
    NoSpace(u64),

    #[error("request of {requested} bytes exceeds store capacity of {capacity}")]
    TooLarge { requested: u64, capacity: u64 },

    #[error("write already committed")]
    AlreadyCommitted,

    #[error("write already rolled back")]
    AlreadyRolledBack,

    #[error("write not closed")]
    NotClosed,

    #[error("write closed")]
    Closed,

    #[error("length mismatch: declared {declared}, written {written}")]
    LengthMismatch { declared: u64, written: u64 },

    #[error("circular buffer lap overwritten")]
    Overwritten,

    #[error("writer stalled behind a slow reader")]
    Stalled,

    #[error("write failed: {0}")]
    Failed(ControlCode),

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),
}

impl StoreError {
    /// The control code a transfer reports for this error.
    pub fn control_code(&self) -> ControlCode {
        match self {
            StoreError::Failed(code) => *code,
            _ => ControlCode::CacheFailed,
        }
    }
}
