use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::allocator::{BufferId, BufferKind};
use super::error::StoreError;
use crate::constants::WAIT_LOG_INTERVAL;
use crate::control::ControlCode;

struct BufferState {
    data: Vec<u8>,
    written: u64,
    writing: bool,
    failure: Option<ControlCode>,
    /// Positions of readers that hold back a circular writer.
    readers: HashMap<u64, u64>,
    next_reader: u64,
}

/// Backing bytes of one store entry.
///
/// The allocator owns the slot a buffer lives in and its reference count;
/// the buffer itself only tracks bytes, the writer cursor, reader positions
/// and the failure code that readers wait on.
///
/// A circular buffer keeps only the most recent `capacity` bytes. Its writer
/// blocks while the slowest registered reader is a full lap behind, and a
/// reader whose position has been overwritten gets [`StoreError::Overwritten`].
pub struct Buffer {
    id: BufferId,
    kind: BufferKind,
    capacity: u64,
    state: Mutex<BufferState>,
    changed: Condvar,
}

impl Buffer {
    pub(crate) fn new(id: BufferId, kind: BufferKind, capacity: u64) -> Self {
        let data = match kind {
            BufferKind::Normal => Vec::with_capacity(capacity as usize),
            BufferKind::Circular => vec![0u8; capacity as usize],
        };
        Self {
            id,
            kind,
            capacity,
            state: Mutex::new(BufferState {
                data,
                written: 0,
                writing: true,
                failure: None,
                readers: HashMap::new(),
                next_reader: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Physical length of the buffer.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Logical bytes written so far.
    pub fn written(&self) -> u64 {
        self.state.lock().written
    }

    pub fn is_writing(&self) -> bool {
        self.state.lock().writing
    }

    /// Whether the writer has overwritten the first lap.
    pub fn lapped(&self) -> bool {
        self.kind == BufferKind::Circular && self.state.lock().written > self.capacity
    }

    pub fn failure(&self) -> Option<ControlCode> {
        self.state.lock().failure
    }

    pub(crate) fn write(&self, mut data: &[u8], wait: Duration) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if !state.writing {
            return Err(StoreError::Closed);
        }

        match self.kind {
            BufferKind::Normal => {
                let end = state.written + data.len() as u64;
                if end > self.capacity {
                    return Err(StoreError::LengthMismatch {
                        declared: self.capacity,
                        written: end,
                    });
                }
                state.data.extend_from_slice(data);
                state.written = end;
            }
            BufferKind::Circular => {
                let deadline = Instant::now() + wait;
                while !data.is_empty() {
                    let floor = state
                        .readers
                        .values()
                        .copied()
                        .min()
                        .unwrap_or(state.written);
                    let in_flight = state.written.saturating_sub(floor);
                    let room = self.capacity.saturating_sub(in_flight);
                    if room == 0 {
                        if self.changed.wait_until(&mut state, deadline).timed_out() {
                            warn!("Buffer {} writer stalled behind a reader", self.id);
                            return Err(StoreError::Stalled);
                        }
                        continue;
                    }

                    let offset = (state.written % self.capacity) as usize;
                    let n = (room as usize)
                        .min(data.len())
                        .min(self.capacity as usize - offset);
                    state.data[offset..offset + n].copy_from_slice(&data[..n]);
                    state.written += n as u64;
                    data = &data[n..];
                    self.changed.notify_all();
                }
            }
        }

        self.changed.notify_all();
        Ok(())
    }

    /// Reads bytes at `pos`, waiting for an in-flight writer if needed.
    ///
    /// Returns `Ok(0)` once the writer has finished and `pos` is at the end.
    pub(crate) fn read_at(
        &self,
        reader: u64,
        pos: u64,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<usize, StoreError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + wait;
        let mut state = self.state.lock();
        loop {
            if let Some(code) = state.failure {
                if !code.is_ok() {
                    return Err(StoreError::Failed(code));
                }
            }
            if self.kind == BufferKind::Circular && pos + self.capacity < state.written {
                return Err(StoreError::Overwritten);
            }
            if pos < state.written {
                break;
            }
            if !state.writing {
                return Ok(0);
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                warn!("Buffer {} reader timed out waiting for data at {}", self.id, pos);
                return Err(StoreError::Failed(ControlCode::CacheFailed));
            }
        }

        let available = (state.written - pos) as usize;
        let n = match self.kind {
            BufferKind::Normal => {
                let n = buf.len().min(available);
                let start = pos as usize;
                buf[..n].copy_from_slice(&state.data[start..start + n]);
                n
            }
            BufferKind::Circular => {
                let offset = (pos % self.capacity) as usize;
                let n = buf
                    .len()
                    .min(available)
                    .min(self.capacity as usize - offset);
                buf[..n].copy_from_slice(&state.data[offset..offset + n]);
                n
            }
        };

        if let Some(position) = state.readers.get_mut(&reader) {
            *position = pos + n as u64;
        }
        self.changed.notify_all();
        Ok(n)
    }

    /// Marks the writer as finished; readers at the end see end of data.
    pub(crate) fn finish_write(&self) {
        let mut state = self.state.lock();
        state.writing = false;
        self.changed.notify_all();
    }

    /// Sets the failure code. The first code wins; a different second code
    /// is logged and ignored.
    pub(crate) fn set_failure(&self, code: ControlCode) -> bool {
        let mut state = self.state.lock();
        match state.failure {
            None => {
                state.failure = Some(code);
                state.writing = false;
                self.changed.notify_all();
                true
            }
            Some(existing) if existing == code => true,
            Some(existing) => {
                warn!(
                    "Buffer {} failure code already {}, ignoring {}",
                    self.id, existing, code
                );
                false
            }
        }
    }

    /// Waits up to `wait` for the failure code to be resolved.
    pub(crate) fn wait_failure(&self, wait: Duration) -> Option<ControlCode> {
        let started = Instant::now();
        let deadline = started + wait;
        let mut state = self.state.lock();
        while state.failure.is_none() {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Buffer {} failure code still undetermined after {:?}",
                    self.id,
                    started.elapsed()
                );
                return None;
            }
            let slice = deadline.min(now + WAIT_LOG_INTERVAL);
            if self.changed.wait_until(&mut state, slice).timed_out() && Instant::now() < deadline {
                debug!(
                    "Buffer {} waiting for failure code for {:?}",
                    self.id,
                    started.elapsed()
                );
            }
        }
        state.failure
    }

    pub(crate) fn open_reader(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_reader;
        state.next_reader += 1;
        // A reader that starts on an overwritten lap must not hold the writer back.
        if !(self.kind == BufferKind::Circular && state.written > self.capacity) {
            state.readers.insert(id, 0);
        }
        id
    }

    pub(crate) fn close_reader(&self, reader: u64) {
        let mut state = self.state.lock();
        state.readers.remove(&reader);
        self.changed.notify_all();
    }
}
