use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::buffer::Buffer;
use super::error::StoreError;
use crate::key::Key;

/// Identifier of an allocated buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a buffer lays out its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Contiguous storage for the whole entry.
    Normal,
    /// Fixed-size ring used to stream oversize entries.
    Circular,
}

/// Space and occupancy counters of an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Total bytes of backing storage.
    pub capacity: u64,
    /// Bytes held by live buffers.
    pub used: u64,
    /// Live buffers, indexed or not.
    pub buffers: usize,
    /// Buffers reachable through the index.
    pub indexed: usize,
}

/// Keyed buffer allocator backing a [`DataStore`](super::DataStore).
///
/// The allocator owns every buffer slot and its reference count. A slot is
/// created with one reference held by its writer; [`retain`](Self::retain)
/// and [`fetch`](Self::fetch) add references and [`release`](Self::release)
/// drops one. A slot that is not indexed is freed when its count reaches
/// zero; an indexed slot stays until it is deleted or evicted.
///
/// Index mutations that must be atomic with respect to each other are made
/// while holding [`semaphore`](Self::semaphore).
pub trait BufferAllocator: Send + Sync {
    /// Reserves a normal buffer of `size` bytes, evicting least recently
    /// used entries and waiting (bounded) for space if needed.
    fn reserve(&self, size: u64) -> Result<Arc<Buffer>, StoreError>;

    /// Reserves a circular buffer to stream an oversize entry for `key`.
    fn reserve_overflow(&self, key: &Key, size: u64) -> Result<Arc<Buffer>, StoreError>;

    fn contains(&self, key: &Key) -> bool;

    /// Opens a reference to the buffer indexed under `key` and marks it as
    /// recently used.
    fn fetch(&self, key: &Key) -> Option<Arc<Buffer>>;

    fn retain(&self, id: BufferId) -> Result<(), StoreError>;

    fn release(&self, id: BufferId);

    /// Indexes buffer `id` under `key`.
    fn commit(&self, id: BufferId, key: &Key, overwrite: bool) -> Result<(), StoreError>;

    /// Removes `key` from the index. With `keep_if_used`, an entry that has
    /// open references is left alone and `false` is returned.
    fn delete(&self, key: &Key, keep_if_used: bool) -> bool;

    /// Moves `key` to the eviction end of the LRU order.
    fn demote(&self, key: &Key) -> bool;

    /// Smallest indexed key at or after `from` (strictly after unless
    /// `inclusive`).
    fn next_key(&self, from: &Key, inclusive: bool) -> Option<Key>;

    /// Largest indexed key strictly before `before`.
    fn prev_key(&self, before: &Key) -> Option<Key>;

    /// Coarse store-wide lock.
    fn semaphore(&self) -> &Mutex<()>;

    /// Makes committed state durable.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn stats(&self) -> AllocatorStats;
}
