use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

use crate::constants::{BLOCK_SIZE, CHUNK_POOL_BLOCKS};

/// Lock-free pool of reusable transfer blocks.
///
/// Blocks are created on demand and returned after each transfer; the pool
/// keeps at most its capacity and drops the rest.
pub struct ChunkPool {
    blocks: ArrayQueue<BytesMut>,
    block_size: usize,
    outstanding: AtomicUsize,
}

impl ChunkPool {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(CHUNK_POOL_BLOCKS, BLOCK_SIZE)
    }

    pub fn with_capacity(blocks: usize, block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            blocks: ArrayQueue::new(blocks.max(1)),
            block_size,
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Takes a zeroed block of exactly `len` bytes.
    pub fn get(&self, len: usize) -> BytesMut {
        let mut buf = self
            .blocks
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.block_size.max(len)));
        buf.clear();
        buf.resize(len, 0);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        buf
    }

    pub fn put(&self, mut buf: BytesMut) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        buf.clear();
        let _ = self.blocks.push(buf);
    }

    pub fn available(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse() {
        let pool = ChunkPool::with_capacity(2, 64);
        assert_eq!(pool.available(), 0);

        let block = pool.get(32);
        assert_eq!(block.len(), 32);
        assert_eq!(pool.outstanding(), 1);
        pool.put(block);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.outstanding(), 0);

        let block = pool.get(128);
        assert_eq!(block.len(), 128);
        assert!(block.iter().all(|&b| b == 0));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_bounded() {
        let pool = ChunkPool::with_capacity(1, 16);
        pool.put(BytesMut::new());
        pool.put(BytesMut::new());
        assert_eq!(pool.available(), 1);
    }
}
