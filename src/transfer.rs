//! Transfer state machines between the network and the data store.
//!
//! # Overview
//!
//! - [`ReceiveData`] - network to store, through a [`VerifyingReader`]
//! - [`SendData`] - store to network, through a [`TrailerSink`]
//! - [`EatData`] - network to nowhere, to drain a stream that is no longer wanted
//!
//! Each transfer runs as one tokio task, reports one [`ControlCode`] and
//! sends at most one [`ChainReply`] to its parent. Store calls that may
//! block run on the blocking pool. [`TransferHandle`] aborts, cancels or
//! drops a running transfer.
//!
//! # Padding
//!
//! Blobs travel in parts of `part_size` payload bytes plus one control
//! byte. A sender that fails with [`ControlCode::Aborted`] or
//! [`ControlCode::Restarted`] completes the current part with random bytes
//! and puts the code in its control byte, so the receiver stops at a part
//! boundary knowing why.
//!
//! # Examples
//!
//! ```
//! use std::io::Cursor;
//! use std::time::Duration;
//!
//! use peerstore::control::{frame, ControlCode};
//! use peerstore::key::Key;
//! use peerstore::store::{DataStore, StoreConfig, Storables};
//! use peerstore::transfer::{ChainId, ReceiveData, VerifyingReader};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() {
//! let store = DataStore::new(StoreConfig::default());
//! let framed = frame(b"hello, peer", 4);
//! let key = Key::for_content(&framed);
//!
//! let writer = store
//!     .put(key, framed.len() as u64, Storables::new().with_part_size(4), false)
//!     .unwrap();
//! let source = VerifyingReader::new(
//!     Cursor::new(framed.to_vec()),
//!     framed.len() as u64,
//!     4,
//!     Duration::from_secs(5),
//! );
//!
//! let report = ReceiveData::new(ChainId::next(), source, writer).run().await;
//! assert_eq!(report.code, ControlCode::Ok);
//! assert!(store.contains(&key));
//! # }
//! ```

mod chain;
mod config;
mod eat;
mod error;
mod observer;
mod pool;
mod receive;
mod send;
mod sink;
mod source;

pub use chain::{reply_channel, ChainId, ChainReply, TransferHandle, TransferReport};
pub use config::TransferConfig;
pub use eat::EatData;
pub use error::{restart_or_abort, SinkError, SourceError, TransferError};
pub use observer::{NullObserver, TracingObserver, TransferKind, TransferObserver, TransferStats};
pub use pool::ChunkPool;
pub use receive::ReceiveData;
pub use send::{SendData, TransferState};
pub use sink::{StreamSink, TrailerSink};
pub use source::VerifyingReader;

/// Runs a store call that may block on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, TransferError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransferError::Join(e.to_string()))
}
