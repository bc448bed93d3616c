//! Storage and transfer constants and tuning parameters.
//!
//! This module collects the defaults used by the data store and the transfer
//! state machine: buffer ceilings, wait bounds, chunk sizes and timeouts.

use std::time::Duration;

// ============================================================================
// Keys
// ============================================================================

/// Length of a key in bytes (SHA-256 digest)
pub const KEY_LENGTH: usize = 32;

// ============================================================================
// Data store
// ============================================================================

/// Default store capacity (256MB)
pub const DEFAULT_STORE_CAPACITY: u64 = 256 * 1024 * 1024;

/// Largest entry placed in a normal (contiguous) buffer (1MB).
/// Larger entries are streamed through a circular overflow buffer.
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 1024 * 1024;

/// Physical size of a circular overflow buffer (256KB)
pub const DEFAULT_OVERFLOW_SIZE: u64 = 256 * 1024;

/// How long `put` waits for space to be released before giving up
pub const SPACE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a reader waits for an in-flight write to resolve its failure code
pub const FAILURE_CODE_WAIT: Duration = Duration::from_secs(30 * 60);

/// Interval at which a blocked reader re-checks and logs its wait
pub const WAIT_LOG_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Metadata prefix
// ============================================================================

/// Magic bytes opening every serialized metadata prefix
pub const STORABLES_MAGIC: [u8; 2] = *b"SB";

/// Metadata prefix format version
pub const STORABLES_VERSION: u8 = 1;

/// Maximum number of fields in a metadata prefix
pub const STORABLES_MAX_FIELDS: usize = 64;

// ============================================================================
// Framing
// ============================================================================

/// Bytes of control data appended to every part
pub const CONTROL_LENGTH: u64 = 1;

/// Default part size (16KB of payload per control byte)
pub const DEFAULT_PART_SIZE: u64 = 16384;

// ============================================================================
// Transfers
// ============================================================================

/// Block size for copying network data into the store (16KB)
pub const BLOCK_SIZE: usize = 16384;

/// Largest chunk handed to the trailer sink in one write (8KB)
pub const PACKET_SIZE: usize = 8192;

/// Network read timeout for receiving and draining transfers
pub const TRANSFER_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Network write timeout for a single trailer chunk
pub const TRANSFER_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of a chain's reply channel
pub const REPLY_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Chunk pool
// ============================================================================

/// Number of block buffers kept in the chunk pool
pub const CHUNK_POOL_BLOCKS: usize = 256;

// ============================================================================
// Bandwidth
// ============================================================================

/// Token bucket burst multiplier
pub const BANDWIDTH_BURST_MULTIPLIER: u64 = 2;
