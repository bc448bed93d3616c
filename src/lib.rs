//! peerstore - content-addressed blob cache and transfer engine for P2P nodes
//!
//! A node stores blobs it has fetched or relayed in a bounded local cache and
//! streams them between the network and that cache. Writes are speculative:
//! readers can follow an in-flight write, and the entry only becomes visible
//! under its key once the write commits.
//!
//! # Modules
//!
//! - [`key`] - Keys and closeness metrics
//! - [`control`] - Control codes and part framing
//! - [`store`] - Data store, allocator contract, read and write handles
//! - [`transfer`] - Receive, send and drain state machines
//! - [`bandwidth`] - Transfer rate limiting
//! - [`constants`] - Defaults and tuning values

pub mod bandwidth;
pub mod constants;
pub mod control;
pub mod key;
pub mod store;
pub mod transfer;

pub use bandwidth::{BandwidthLimiter, RateLimiter};
pub use control::ControlCode;
pub use key::{Closeness, Key, KeyError, RingDistance, XorDistance};
pub use store::{
    BufferAllocator, DataStore, MemoryAllocator, ReadHandle, StoreConfig, StoreError, Storables,
    WriteHandle,
};
pub use transfer::{
    ChainId, ChainReply, EatData, ReceiveData, SendData, SinkError, SourceError, StreamSink,
    TrailerSink, TransferConfig, TransferError, TransferHandle, TransferObserver, TransferReport,
    VerifyingReader,
};
