use std::sync::Arc;
use std::time::Duration;

use crate::bandwidth::BandwidthLimiter;
use crate::constants::{BLOCK_SIZE, PACKET_SIZE, TRANSFER_READ_TIMEOUT, TRANSFER_WRITE_TIMEOUT};

use super::pool::ChunkPool;

/// Transfer tuning shared by every transfer a node starts.
#[derive(Clone)]
pub struct TransferConfig {
    /// Bytes copied from the network into the store per cycle.
    pub block_size: usize,
    /// Largest chunk handed to a trailer sink per cycle.
    pub packet_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Optional rate limit on transfer traffic.
    pub limiter: Option<Arc<BandwidthLimiter>>,
    pub pool: Arc<ChunkPool>,
}

impl TransferConfig {
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size.max(1);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<BandwidthLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_pool(mut self, pool: Arc<ChunkPool>) -> Self {
        self.pool = pool;
        self
    }

    pub(crate) async fn acquire_inbound(&self, bytes: usize) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire_inbound(bytes).await;
        }
    }

    pub(crate) async fn acquire_outbound(&self, bytes: usize) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire_outbound(bytes).await;
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            packet_size: PACKET_SIZE,
            read_timeout: TRANSFER_READ_TIMEOUT,
            write_timeout: TRANSFER_WRITE_TIMEOUT,
            limiter: None,
            pool: ChunkPool::new(),
        }
    }
}
