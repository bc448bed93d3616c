use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::allocator::{AllocatorStats, BufferAllocator, BufferId, BufferKind};
use super::buffer::Buffer;
use super::config::StoreConfig;
use super::error::StoreError;
use crate::key::Key;

struct Slot {
    buffer: Arc<Buffer>,
    refs: usize,
    key: Option<Key>,
}

/// Eviction order of indexed keys; the front is evicted first.
struct LruList {
    order: VecDeque<Key>,
}

impl LruList {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    fn push_back(&mut self, key: Key) {
        self.order.push_back(key);
    }

    fn remove(&mut self, key: &Key) {
        self.order.retain(|k| k != key);
    }

    fn move_to_back(&mut self, key: &Key) {
        self.remove(key);
        self.order.push_back(*key);
    }

    fn move_to_front(&mut self, key: &Key) {
        self.remove(key);
        self.order.push_front(*key);
    }

    fn pop_front(&mut self) -> Option<Key> {
        self.order.pop_front()
    }
}

struct Directory {
    slots: HashMap<BufferId, Slot>,
    index: BTreeMap<Key, BufferId>,
    lru: LruList,
    used: u64,
    next_id: u64,
}

impl Directory {
    fn unindex(&mut self, key: &Key) -> Option<BufferId> {
        let id = self.index.remove(key)?;
        self.lru.remove(key);
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.key = None;
        }
        Some(id)
    }

    /// Frees `id` if it is neither indexed nor referenced.
    fn free_if_unused(&mut self, id: BufferId) -> bool {
        let unused = self
            .slots
            .get(&id)
            .map(|slot| slot.refs == 0 && slot.key.is_none())
            .unwrap_or(false);
        if !unused {
            return false;
        }
        if let Some(slot) = self.slots.remove(&id) {
            self.used -= slot.buffer.capacity();
            trace!("Freed buffer {} ({} bytes)", id, slot.buffer.capacity());
        }
        true
    }

    /// Evicts the least recently used entry. Returns `false` when nothing is
    /// left to evict.
    fn evict_one(&mut self) -> bool {
        let Some(key) = self.lru.pop_front() else {
            return false;
        };
        if let Some(id) = self.unindex(&key) {
            let freed = self.free_if_unused(id);
            debug!("Evicted {} from buffer {} (freed now: {})", key, id, freed);
        }
        true
    }
}

/// In-memory [`BufferAllocator`] with capacity accounting and LRU eviction.
///
/// # Examples
///
/// ```
/// use peerstore::store::{BufferAllocator, MemoryAllocator, StoreConfig};
///
/// let allocator = MemoryAllocator::new(&StoreConfig::default().with_capacity(4096));
/// let buffer = allocator.reserve(1024).unwrap();
/// assert_eq!(allocator.stats().used, 1024);
///
/// allocator.release(buffer.id());
/// assert_eq!(allocator.stats().used, 0);
/// ```
pub struct MemoryAllocator {
    capacity: u64,
    overflow_size: u64,
    space_wait: Duration,
    dir: Mutex<Directory>,
    space: Condvar,
    semaphore: Mutex<()>,
}

impl MemoryAllocator {
    pub fn new(config: &StoreConfig) -> Arc<Self> {
        Arc::new(Self {
            capacity: config.capacity,
            overflow_size: config.overflow_size,
            space_wait: config.space_wait,
            dir: Mutex::new(Directory {
                slots: HashMap::new(),
                index: BTreeMap::new(),
                lru: LruList::new(),
                used: 0,
                next_id: 0,
            }),
            space: Condvar::new(),
            semaphore: Mutex::new(()),
        })
    }

    fn allocate(&self, kind: BufferKind, size: u64) -> Result<Arc<Buffer>, StoreError> {
        if size > self.capacity {
            return Err(StoreError::TooLarge {
                requested: size,
                capacity: self.capacity,
            });
        }

        let deadline = Instant::now() + self.space_wait;
        let mut dir = self.dir.lock();
        while dir.used + size > self.capacity {
            if dir.evict_one() {
                continue;
            }
            if self.space.wait_until(&mut dir, deadline).timed_out() {
                warn!(
                    "No space for {} bytes after {:?} ({} of {} used)",
                    size, self.space_wait, dir.used, self.capacity
                );
                return Err(StoreError::NoSpace(size));
            }
        }

        let id = BufferId(dir.next_id);
        dir.next_id += 1;
        dir.used += size;
        let buffer = Arc::new(Buffer::new(id, kind, size));
        dir.slots.insert(
            id,
            Slot {
                buffer: Arc::clone(&buffer),
                refs: 1,
                key: None,
            },
        );
        trace!("Allocated {:?} buffer {} of {} bytes", kind, id, size);
        Ok(buffer)
    }
}

impl BufferAllocator for MemoryAllocator {
    fn reserve(&self, size: u64) -> Result<Arc<Buffer>, StoreError> {
        self.allocate(BufferKind::Normal, size)
    }

    fn reserve_overflow(&self, key: &Key, size: u64) -> Result<Arc<Buffer>, StoreError> {
        let ring = size.min(self.overflow_size);
        if ring == 0 {
            warn!("No overflow ring available for {} ({} bytes)", key, size);
            return Err(StoreError::NoSpace(size));
        }
        debug!("Streaming {} ({} bytes) through a {} byte ring", key, size, ring);
        self.allocate(BufferKind::Circular, ring)
    }

    fn contains(&self, key: &Key) -> bool {
        self.dir.lock().index.contains_key(key)
    }

    fn fetch(&self, key: &Key) -> Option<Arc<Buffer>> {
        let mut dir = self.dir.lock();
        let id = *dir.index.get(key)?;
        let buffer = {
            let slot = dir.slots.get_mut(&id)?;
            slot.refs += 1;
            Arc::clone(&slot.buffer)
        };
        dir.lru.move_to_back(key);
        Some(buffer)
    }

    fn retain(&self, id: BufferId) -> Result<(), StoreError> {
        let mut dir = self.dir.lock();
        let slot = dir.slots.get_mut(&id).ok_or(StoreError::UnknownBuffer(id))?;
        slot.refs += 1;
        Ok(())
    }

    fn release(&self, id: BufferId) {
        let mut dir = self.dir.lock();
        let Some(slot) = dir.slots.get_mut(&id) else {
            warn!("Release of unknown buffer {}", id);
            return;
        };
        if slot.refs == 0 {
            warn!("Buffer {} released more often than opened", id);
            return;
        }
        slot.refs -= 1;
        if dir.free_if_unused(id) {
            self.space.notify_all();
        }
    }

    fn commit(&self, id: BufferId, key: &Key, overwrite: bool) -> Result<(), StoreError> {
        let mut dir = self.dir.lock();
        let lapped = dir
            .slots
            .get(&id)
            .map(|slot| slot.buffer.lapped())
            .ok_or(StoreError::UnknownBuffer(id))?;

        if let Some(&existing) = dir.index.get(key) {
            if existing == id {
                return Ok(());
            }
            if !overwrite {
                return Err(StoreError::Collision(*key));
            }
        }
        if lapped {
            return Err(StoreError::Overwritten);
        }

        if let Some(existing) = dir.unindex(key) {
            if dir.free_if_unused(existing) {
                self.space.notify_all();
            }
        }

        let slot = dir.slots.get_mut(&id).ok_or(StoreError::UnknownBuffer(id))?;
        slot.key = Some(*key);
        dir.index.insert(*key, id);
        dir.lru.push_back(*key);
        Ok(())
    }

    fn delete(&self, key: &Key, keep_if_used: bool) -> bool {
        let mut dir = self.dir.lock();
        let Some(&id) = dir.index.get(key) else {
            return false;
        };
        if keep_if_used && dir.slots.get(&id).map(|s| s.refs > 0).unwrap_or(false) {
            debug!("Keeping {} in use", key);
            return false;
        }
        dir.unindex(key);
        if dir.free_if_unused(id) {
            self.space.notify_all();
        }
        true
    }

    fn demote(&self, key: &Key) -> bool {
        let mut dir = self.dir.lock();
        if !dir.index.contains_key(key) {
            return false;
        }
        dir.lru.move_to_front(key);
        true
    }

    fn next_key(&self, from: &Key, inclusive: bool) -> Option<Key> {
        let start = if inclusive {
            Bound::Included(*from)
        } else {
            Bound::Excluded(*from)
        };
        self.dir
            .lock()
            .index
            .range((start, Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
    }

    fn prev_key(&self, before: &Key) -> Option<Key> {
        self.dir
            .lock()
            .index
            .range(..*before)
            .next_back()
            .map(|(k, _)| *k)
    }

    fn semaphore(&self) -> &Mutex<()> {
        &self.semaphore
    }

    fn stats(&self) -> AllocatorStats {
        let dir = self.dir.lock();
        AllocatorStats {
            capacity: self.capacity,
            used: dir.used,
            buffers: dir.slots.len(),
            indexed: dir.index.len(),
        }
    }
}
