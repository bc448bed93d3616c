use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_OVERFLOW_SIZE, DEFAULT_STORE_CAPACITY, FAILURE_CODE_WAIT,
    SPACE_WAIT_TIMEOUT,
};

/// Data store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Total bytes of backing storage.
    pub capacity: u64,
    /// Largest entry (metadata prefix included) kept in a normal buffer.
    pub max_buffer_size: u64,
    /// Physical size of a circular overflow buffer.
    pub overflow_size: u64,
    /// Bound on waiting for space in `put`.
    pub space_wait: Duration,
    /// Bound on waiting for an in-flight write's failure code or data.
    pub failure_wait: Duration,
}

impl StoreConfig {
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_buffer_size(mut self, size: u64) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn with_overflow_size(mut self, size: u64) -> Self {
        self.overflow_size = size;
        self
    }

    pub fn with_space_wait(mut self, wait: Duration) -> Self {
        self.space_wait = wait;
        self
    }

    pub fn with_failure_wait(mut self, wait: Duration) -> Self {
        self.failure_wait = wait;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STORE_CAPACITY,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            overflow_size: DEFAULT_OVERFLOW_SIZE,
            space_wait: SPACE_WAIT_TIMEOUT,
            failure_wait: FAILURE_CODE_WAIT,
        }
    }
}
