use thiserror::Error;

use crate::control::ControlCode;
use crate::store::StoreError;

/// Errors raised by a verifying byte source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A control byte in the stream was not OK.
    #[error("data not valid: {0}")]
    DataNotValid(ControlCode),

    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before the declared length.
    #[error("unexpected end of stream")]
    Eof,

    /// No bytes arrived within the read timeout.
    #[error("read timeout")]
    Timeout,
}

/// Errors raised by a trailer sink for one chunk.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The chunk was refused; the connection itself is still usable.
    #[error("chunk rejected")]
    Rejected,

    /// The receiving side terminated the stream.
    #[error("receiver terminated the stream")]
    Terminated,

    /// The receiving side did not accept the chunk in time.
    #[error("write timeout")]
    Timeout,

    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink was already closed.
    #[error("sink closed")]
    Closed,
}

/// Errors that end a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("source: {0}")]
    Source(#[from] SourceError),

    #[error("sink: {0}")]
    Sink(#[from] SinkError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// The transfer was aborted with a control code.
    #[error("aborted: {0}")]
    Aborted(ControlCode),

    /// A blocking store call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

impl TransferError {
    /// Control code a receiving transfer reports for this error.
    pub fn receive_code(&self) -> ControlCode {
        match self {
            TransferError::Source(SourceError::DataNotValid(code)) => *code,
            TransferError::Source(_) => ControlCode::RecvConnDied,
            TransferError::Aborted(code) => *code,
            TransferError::Sink(_) | TransferError::Store(_) | TransferError::Join(_) => {
                ControlCode::CacheFailed
            }
        }
    }

    /// Control code a sending transfer reports for this error.
    pub fn send_code(&self) -> ControlCode {
        match self {
            TransferError::Sink(SinkError::Rejected) => ControlCode::Aborted,
            TransferError::Sink(SinkError::Timeout) => ControlCode::SendTimeout,
            TransferError::Sink(SinkError::Terminated) => ControlCode::ReceiverKilled,
            TransferError::Sink(SinkError::Io(_) | SinkError::Closed) => ControlCode::SendConnDied,
            TransferError::Store(StoreError::Failed(code)) => restart_or_abort(*code),
            TransferError::Store(_) | TransferError::Join(_) => ControlCode::Aborted,
            TransferError::Aborted(code) => *code,
            TransferError::Source(SourceError::DataNotValid(code)) => restart_or_abort(*code),
            TransferError::Source(_) => ControlCode::Restarted,
        }
    }

    /// Whether the network source can still be drained after this error.
    pub fn source_healthy(&self) -> bool {
        !matches!(self, TransferError::Source(_))
    }
}

/// Maps the failure code of an upstream write to what a sender relays.
///
/// Upstream connection loss means the data will be fetched again, so the
/// receiver is told to expect a restart. Anything else aborts.
pub fn restart_or_abort(code: ControlCode) -> ControlCode {
    match code {
        ControlCode::RecvConnDied | ControlCode::Restarted | ControlCode::SendTimeout => {
            ControlCode::Restarted
        }
        _ => ControlCode::Aborted,
    }
}
