//! Content-addressed blob cache.
//!
//! # Overview
//!
//! - [`DataStore`] - keyed entries with speculative writes and nearest-key queries
//! - [`BufferAllocator`] - the contract a backing allocator fulfils
//! - [`MemoryAllocator`] - in-memory allocator with LRU eviction
//! - [`WriteHandle`] / [`ReadHandle`] - the two ends of a store entry
//! - [`Storables`] - metadata prefix stored in front of each payload
//!
//! A write becomes visible only when its handle commits. Until then readers
//! can attach to the in-flight entry through [`WriteHandle::reader`] and
//! stream it as it arrives; if the write fails they see its failure code.
//!
//! Entries larger than [`StoreConfig::max_buffer_size`] are streamed through
//! a circular buffer. Such an entry can only be committed if no byte was
//! overwritten before it was fully written.
//!
//! # Examples
//!
//! ```
//! use peerstore::key::Key;
//! use peerstore::store::{DataStore, StoreConfig, Storables};
//!
//! let store = DataStore::new(StoreConfig::default());
//! let key = Key::for_content(b"streamed");
//!
//! let mut writer = store
//!     .put(key, 8, Storables::new().with_part_size(4), false)
//!     .unwrap();
//! let mut reader = writer.reader().unwrap();
//!
//! writer.write(b"streamed").unwrap();
//! writer.close().unwrap();
//!
//! let mut buf = [0u8; 8];
//! reader.read_exact(&mut buf).unwrap();
//! assert_eq!(&buf, b"streamed");
//!
//! writer.commit().unwrap();
//! assert!(store.contains(&key));
//! ```

mod allocator;
mod buffer;
mod config;
mod data_store;
mod element;
mod error;
mod memory;
mod storables;

pub use allocator::{AllocatorStats, BufferAllocator, BufferId, BufferKind};
pub use buffer::Buffer;
pub use config::StoreConfig;
pub use data_store::DataStore;
pub use element::{ReadHandle, WriteHandle};
pub use error::StoreError;
pub use memory::MemoryAllocator;
pub use storables::{Storables, STORABLES_HEADER_LEN};

#[cfg(test)]
mod tests;
