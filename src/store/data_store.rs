use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::allocator::{AllocatorStats, BufferAllocator};
use super::config::StoreConfig;
use super::element::{ReadHandle, WriteHandle};
use super::error::StoreError;
use super::memory::MemoryAllocator;
use super::storables::Storables;
use crate::key::{Closeness, Key, RingDistance};

/// Content-addressed blob cache.
///
/// Maps keys to stored entries on top of a [`BufferAllocator`]. Writes are
/// speculative: [`put`](Self::put) hands out a [`WriteHandle`] and the entry
/// only becomes visible when that handle commits.
///
/// # Examples
///
/// ```
/// use peerstore::key::Key;
/// use peerstore::store::{DataStore, StoreConfig, Storables};
///
/// let store = DataStore::new(StoreConfig::default());
/// let key = Key::for_content(b"hello");
///
/// let mut writer = store.put(key, 5, Storables::new(), false).unwrap();
/// writer.write(b"hello").unwrap();
/// writer.close().unwrap();
/// assert!(!store.contains(&key));
///
/// writer.commit().unwrap();
/// let mut reader = store.get(&key).unwrap();
/// let mut buf = [0u8; 5];
/// reader.read_exact(&mut buf).unwrap();
/// assert_eq!(&buf, b"hello");
/// ```
pub struct DataStore {
    allocator: Arc<dyn BufferAllocator>,
    closeness: Arc<dyn Closeness>,
    config: StoreConfig,
}

impl DataStore {
    /// Creates a store backed by a [`MemoryAllocator`].
    pub fn new(config: StoreConfig) -> Self {
        let allocator = MemoryAllocator::new(&config);
        Self::with_allocator(allocator, config)
    }

    pub fn with_allocator(allocator: Arc<dyn BufferAllocator>, config: StoreConfig) -> Self {
        Self {
            allocator,
            closeness: Arc::new(RingDistance),
            config,
        }
    }

    /// Replaces the metric used by [`find_closest_keys`](Self::find_closest_keys).
    pub fn with_closeness(mut self, closeness: Arc<dyn Closeness>) -> Self {
        self.closeness = closeness;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }

    /// Reserves space for `declared_size` payload bytes plus the metadata
    /// prefix and returns the write side of the new entry.
    ///
    /// Entries larger than the configured maximum buffer size are streamed
    /// through a circular overflow buffer.
    pub fn put(
        &self,
        key: Key,
        declared_size: u64,
        storables: Storables,
        overwrite: bool,
    ) -> Result<WriteHandle, StoreError> {
        let prefix = storables.encode()?;
        let total = declared_size + prefix.len() as u64;

        if !overwrite {
            let _guard = self.allocator.semaphore().lock();
            if self.allocator.contains(&key) {
                return Err(StoreError::Collision(key));
            }
        }

        let buffer = if total > self.config.max_buffer_size {
            self.allocator.reserve_overflow(&key, total)?
        } else {
            self.allocator.reserve(total)?
        };
        debug!("Put {} ({} bytes) into buffer {}", key, total, buffer.id());

        if let Err(e) = buffer.write(&prefix, self.config.failure_wait) {
            self.allocator.release(buffer.id());
            return Err(e);
        }

        Ok(WriteHandle::new(
            key,
            buffer,
            Arc::clone(&self.allocator),
            storables,
            prefix.len() as u64,
            declared_size,
            overwrite,
            self.config.failure_wait,
        ))
    }

    /// Opens the committed entry for `key`.
    ///
    /// An entry whose metadata prefix cannot be parsed is deleted and `None`
    /// is returned.
    pub fn get(&self, key: &Key) -> Option<ReadHandle> {
        let buffer = {
            let _guard = self.allocator.semaphore().lock();
            self.allocator.fetch(key)?
        };

        let mut handle = ReadHandle::new(
            *key,
            buffer,
            Arc::clone(&self.allocator),
            None,
            self.config.failure_wait,
        );
        match handle.storables() {
            Ok(_) => Some(handle),
            Err(StoreError::CorruptMetadata(reason)) => {
                warn!("Deleting {} with corrupt metadata: {}", key, reason);
                drop(handle);
                self.remove(key, false);
                None
            }
            Err(e) => {
                warn!("Could not open {}: {}", key, e);
                None
            }
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        let _guard = self.allocator.semaphore().lock();
        self.allocator.contains(key)
    }

    /// Removes `key` from the index. Open readers keep reading; the space is
    /// reclaimed once they close.
    pub fn remove(&self, key: &Key, keep_if_used: bool) -> bool {
        let _guard = self.allocator.semaphore().lock();
        self.allocator.delete(key, keep_if_used)
    }

    /// Makes `key` the next entry to be evicted.
    pub fn demote(&self, key: &Key) -> bool {
        let _guard = self.allocator.semaphore().lock();
        self.allocator.demote(key)
    }

    /// Returns up to `limit` indexed keys ordered by closeness to `key`.
    ///
    /// Walks the index downwards from `key` and upwards from `key` at the same
    /// time, always taking whichever candidate is closer. Both walks wrap
    /// around the ends of the key space and stop once they meet. `inclusive`
    /// allows `key` itself in the result.
    pub fn find_closest_keys(&self, key: &Key, inclusive: bool, limit: usize) -> Vec<Key> {
        let _guard = self.allocator.semaphore().lock();
        let allocator = self.allocator.as_ref();

        let mut lower = KeyWalk::downward(allocator, key).peekable();
        let mut upper = KeyWalk::upward(allocator, key, inclusive).peekable();
        let mut closest = Vec::with_capacity(limit.min(64));
        let mut seen = HashSet::new();

        while closest.len() < limit {
            let take_upper = match (lower.peek(), upper.peek()) {
                (None, None) => break,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some(l), Some(u)) => self.closeness.compare(key, u, l) != Ordering::Greater,
            };
            let next = if take_upper {
                upper.next()
            } else {
                lower.next()
            };
            let Some(next) = next else {
                break;
            };
            // The walks met: everything beyond was already taken.
            if !seen.insert(next) {
                break;
            }
            closest.push(next);
        }

        closest
    }

    pub fn stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }
}

/// Lazy walk over the index in one direction, wrapping once around the
/// ends of the key space and stopping before it gets back to its start.
struct KeyWalk<'a> {
    allocator: &'a dyn BufferAllocator,
    start: Key,
    cursor: Key,
    upward: bool,
    inclusive: bool,
    wrapped: bool,
    done: bool,
}

impl<'a> KeyWalk<'a> {
    fn upward(allocator: &'a dyn BufferAllocator, from: &Key, inclusive: bool) -> Self {
        Self {
            allocator,
            start: *from,
            cursor: *from,
            upward: true,
            inclusive,
            wrapped: false,
            done: false,
        }
    }

    fn downward(allocator: &'a dyn BufferAllocator, from: &Key) -> Self {
        Self {
            allocator,
            start: *from,
            cursor: *from,
            upward: false,
            inclusive: false,
            wrapped: false,
            done: false,
        }
    }

    fn past_start(&self, key: &Key) -> bool {
        self.wrapped
            && if self.upward {
                *key >= self.start
            } else {
                *key <= self.start
            }
    }

    fn emit(&mut self, key: Key) -> Option<Key> {
        if self.past_start(&key) {
            self.done = true;
            return None;
        }
        self.cursor = key;
        Some(key)
    }
}

impl Iterator for KeyWalk<'_> {
    type Item = Key;

    fn next(&mut self) -> Option<Key> {
        while !self.done {
            let next = if self.upward {
                self.allocator.next_key(&self.cursor, self.inclusive)
            } else {
                self.allocator.prev_key(&self.cursor)
            };
            self.inclusive = false;
            if let Some(key) = next {
                return self.emit(key);
            }
            if self.wrapped {
                self.done = true;
                break;
            }

            self.wrapped = true;
            if self.upward {
                self.cursor = Key::MIN;
                self.inclusive = true;
            } else {
                self.cursor = Key::MAX;
                // prev_key excludes its bound, so the top key is checked here.
                if self.allocator.contains(&Key::MAX) {
                    return self.emit(Key::MAX);
                }
            }
        }
        None
    }
}
