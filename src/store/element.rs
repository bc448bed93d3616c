use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::allocator::{BufferAllocator, BufferId};
use super::buffer::Buffer;
use super::error::StoreError;
use super::storables::{Storables, STORABLES_HEADER_LEN};
use crate::control::ControlCode;
use crate::key::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Open,
    Closed,
    Committed,
    RolledBack,
}

/// Write side of a store entry.
///
/// Returned by [`DataStore::put`](super::DataStore::put). The payload is
/// appended with [`write`](Self::write), then the handle is closed and either
/// committed (indexed and visible) or rolled back (never indexed). Commit and
/// rollback each happen at most once; the writer's buffer reference is
/// released exactly once, on whichever comes first.
///
/// Dropping an unfinished handle fails it with [`ControlCode::Cancelled`].
pub struct WriteHandle {
    key: Key,
    buffer: Arc<Buffer>,
    allocator: Arc<dyn BufferAllocator>,
    storables: Storables,
    prefix_len: u64,
    declared: u64,
    written: u64,
    overrun: bool,
    overwrite: bool,
    state: WriteState,
    wait: Duration,
}

impl WriteHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: Key,
        buffer: Arc<Buffer>,
        allocator: Arc<dyn BufferAllocator>,
        storables: Storables,
        prefix_len: u64,
        declared: u64,
        overwrite: bool,
        wait: Duration,
    ) -> Self {
        Self {
            key,
            buffer,
            allocator,
            storables,
            prefix_len,
            declared,
            written: 0,
            overrun: false,
            overwrite,
            state: WriteState::Open,
            wait,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn storables(&self) -> &Storables {
        &self.storables
    }

    /// Payload bytes the entry was declared with.
    pub fn declared_length(&self) -> u64 {
        self.declared
    }

    /// Payload bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id()
    }

    /// The failure code readers observe, if it has been determined.
    pub fn failure_code(&self) -> Option<ControlCode> {
        self.buffer.failure()
    }

    pub fn is_committed(&self) -> bool {
        self.state == WriteState::Committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.state == WriteState::RolledBack
    }

    /// Appends payload bytes. May block behind slow readers of an overflow
    /// buffer.
    pub fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        if self.state != WriteState::Open {
            return Err(StoreError::Closed);
        }
        let end = self.written + data.len() as u64;
        if end > self.declared {
            self.overrun = true;
            return Err(StoreError::LengthMismatch {
                declared: self.declared,
                written: end,
            });
        }
        self.buffer.write(data, self.wait)?;
        self.written = end;
        Ok(())
    }

    /// Finishes writing. A length mismatch fails the handle.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.state != WriteState::Open {
            return Ok(());
        }
        self.state = WriteState::Closed;
        self.buffer.finish_write();

        let physical = self.buffer.written();
        let expected = self.prefix_len + self.declared;
        if self.overrun || self.written != self.declared || physical != expected {
            debug!(
                "Write of {} closed at {} of {} bytes",
                self.key, self.written, self.declared
            );
            self.finish(ControlCode::CacheFailed);
            return Err(StoreError::LengthMismatch {
                declared: self.declared,
                written: self.written,
            });
        }
        Ok(())
    }

    /// Indexes the entry. Legal once, after a successful [`close`](Self::close).
    pub fn commit(&mut self) -> Result<(), StoreError> {
        match self.state {
            WriteState::Open => return Err(StoreError::NotClosed),
            WriteState::Committed => return Err(StoreError::AlreadyCommitted),
            WriteState::RolledBack => return Err(StoreError::AlreadyRolledBack),
            WriteState::Closed => {}
        }

        let result = {
            let _guard = self.allocator.semaphore().lock();
            self.allocator
                .commit(self.buffer.id(), &self.key, self.overwrite)
        };

        match result {
            Ok(()) => {
                self.state = WriteState::Committed;
                self.buffer.set_failure(ControlCode::Ok);
                self.allocator.release(self.buffer.id());
                debug!("Committed {} ({} bytes)", self.key, self.written);
                self.allocator.flush()
            }
            Err(e) => {
                // Readers already saw every byte; only the index entry is refused.
                debug!("Commit of {} refused: {}", self.key, e);
                self.finish(ControlCode::Ok);
                Err(e)
            }
        }
    }

    /// Releases the entry without indexing it.
    pub fn rollback(&mut self) -> Result<(), StoreError> {
        match self.state {
            WriteState::Committed => Err(StoreError::AlreadyCommitted),
            WriteState::RolledBack => Ok(()),
            WriteState::Open | WriteState::Closed => {
                self.finish(ControlCode::Aborted);
                Ok(())
            }
        }
    }

    /// Sets the failure code seen by readers and rolls back.
    pub fn fail(&mut self, code: ControlCode) -> Result<(), StoreError> {
        match self.state {
            WriteState::Committed => {
                warn!("Failing committed write of {} with {}", self.key, code);
                Err(StoreError::AlreadyCommitted)
            }
            WriteState::RolledBack => {
                self.buffer.set_failure(code);
                Ok(())
            }
            WriteState::Open | WriteState::Closed => {
                self.finish(code);
                Ok(())
            }
        }
    }

    /// Opens a reader on the in-flight entry.
    pub fn reader(&self) -> Result<ReadHandle, StoreError> {
        if self.state == WriteState::RolledBack {
            return Err(StoreError::AlreadyRolledBack);
        }
        self.allocator.retain(self.buffer.id())?;
        Ok(ReadHandle::new(
            self.key,
            Arc::clone(&self.buffer),
            Arc::clone(&self.allocator),
            Some(self.declared),
            self.wait,
        ))
    }

    fn finish(&mut self, code: ControlCode) {
        self.buffer.set_failure(code);
        self.state = WriteState::RolledBack;
        self.allocator.release(self.buffer.id());
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        if matches!(self.state, WriteState::Open | WriteState::Closed) {
            warn!("Write of {} dropped before commit", self.key);
            self.finish(ControlCode::Cancelled);
        }
    }
}

/// Read side of a store entry.
///
/// Obtained from [`DataStore::get`](super::DataStore::get) for committed
/// entries or from [`WriteHandle::reader`] for in-flight ones. Reads skip the
/// metadata prefix. Each handle holds one buffer reference, released when it
/// is closed or dropped.
pub struct ReadHandle {
    key: Key,
    buffer: Arc<Buffer>,
    allocator: Arc<dyn BufferAllocator>,
    reader: u64,
    pos: u64,
    end: Option<u64>,
    declared: Option<u64>,
    storables: Option<Storables>,
    wait: Duration,
    closed: bool,
}

impl ReadHandle {
    pub(crate) fn new(
        key: Key,
        buffer: Arc<Buffer>,
        allocator: Arc<dyn BufferAllocator>,
        declared: Option<u64>,
        wait: Duration,
    ) -> Self {
        let reader = buffer.open_reader();
        Self {
            key,
            buffer,
            allocator,
            reader,
            pos: 0,
            end: None,
            declared,
            storables: None,
            wait,
            closed: false,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id()
    }

    /// Parsed metadata prefix.
    pub fn storables(&mut self) -> Result<&Storables, StoreError> {
        self.ensure_prefix()?;
        self.storables
            .as_ref()
            .ok_or_else(|| StoreError::CorruptMetadata("prefix missing".into()))
    }

    /// Payload bytes left to read.
    pub fn length(&self) -> u64 {
        match self.end {
            Some(end) => end.saturating_sub(self.pos),
            None => self.declared.unwrap_or(0),
        }
    }

    /// Physical length of the backing buffer.
    pub fn real_length(&self) -> u64 {
        self.buffer.capacity()
    }

    /// Reads payload bytes; `Ok(0)` at the end of the entry.
    ///
    /// Blocks while an in-flight writer has not produced the next bytes yet.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        self.ensure_prefix()?;
        let remaining = self.length();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = (buf.len() as u64).min(remaining) as usize;
        let n = self
            .buffer
            .read_at(self.reader, self.pos, &mut buf[..limit], self.wait)?;
        if n == 0 {
            // The writer stopped short of the declared length.
            let code = self.buffer.failure().unwrap_or(ControlCode::CacheFailed);
            return Err(StoreError::Failed(if code.is_ok() {
                ControlCode::CacheFailed
            } else {
                code
            }));
        }
        self.pos += n as u64;
        Ok(n)
    }

    /// Fills `buf` completely or fails.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), StoreError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(StoreError::Failed(ControlCode::CacheFailed));
            }
            filled += n;
        }
        Ok(())
    }

    /// The writer's failure code. Waits (bounded) while the write is still
    /// undetermined.
    pub fn failure_code(&self) -> ControlCode {
        match self.buffer.wait_failure(self.wait) {
            Some(code) => code,
            None => {
                error!(
                    "Failure code of {} undetermined after {:?}",
                    self.key, self.wait
                );
                ControlCode::CacheFailed
            }
        }
    }

    pub fn close(mut self) {
        self.release();
    }

    fn ensure_prefix(&mut self) -> Result<(), StoreError> {
        if self.storables.is_some() {
            return Ok(());
        }

        let mut header = [0u8; STORABLES_HEADER_LEN];
        self.fill_raw(&mut header)?;
        let body_len = Storables::decode_header(&header)?;
        let mut body = vec![0u8; body_len];
        self.fill_raw(&mut body)?;
        let storables = Storables::decode_body(&body)?;

        let prefix_len = self.pos;
        self.end = Some(match self.declared {
            Some(declared) => prefix_len + declared,
            None => self.buffer.written(),
        });
        self.storables = Some(storables);
        Ok(())
    }

    fn fill_raw(&mut self, buf: &mut [u8]) -> Result<(), StoreError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .buffer
                .read_at(self.reader, self.pos, &mut buf[filled..], self.wait)?;
            if n == 0 {
                return Err(StoreError::CorruptMetadata("prefix truncated".into()));
            }
            filled += n;
            self.pos += n as u64;
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buffer.close_reader(self.reader);
            self.allocator.release(self.buffer.id());
        }
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        self.release();
    }
}
