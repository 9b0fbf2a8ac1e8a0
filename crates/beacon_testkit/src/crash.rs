//! Crash simulation for the action queue.
//!
//! [`CrashableBackend`] wraps a storage backend and fails writes on demand,
//! optionally leaving a torn prefix of the failing append behind. Once it
//! has crashed every later write fails too, including the rollback
//! truncation a store attempts, as it would in a dead process. Pair it
//! with a shared [`InMemoryBackend`] to reopen the queue over whatever
//! reached storage, as a process restart would.
//!
//! ## Usage
//!
//! ```rust
//! use beacon_storage::InMemoryBackend;
//! use beacon_sync_protocol::ActionPayload;
//! use beacon_testkit::crash::{open_crashable, recover};
//! use beacon_testkit::fixtures::fire_report;
//!
//! let storage = InMemoryBackend::new();
//! let (queue, switch) = open_crashable(&storage).unwrap();
//!
//! switch.crash_after(switch.bytes_written() + 5);
//! let create = ActionPayload::Create { report: fire_report(), public: false };
//! assert!(queue.enqueue_payload(None, &create).is_err());
//! drop(queue);
//!
//! assert!(recover(&storage).unwrap().is_empty());
//! ```

use beacon_queue::{QueueConfig, QueueResult, QueueStore};
use beacon_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
    fail_on_replace: AtomicBool,
}

/// Remote control for a [`CrashableBackend`] that has been moved into a
/// store.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Fails the append that would take the total written past `bytes`,
    /// keeping the part that fits.
    pub fn crash_after(&self, bytes: u64) {
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Makes flush and sync fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.state.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Makes whole-content replacement (compaction) fail.
    pub fn set_fail_on_replace(&self, fail: bool) {
        self.state.fail_on_replace.store(fail, Ordering::SeqCst);
    }

    /// Returns the bytes accepted by appends so far.
    pub fn bytes_written(&self) -> u64 {
        self.state.bytes_written.load(Ordering::SeqCst)
    }

    /// Returns whether a simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Clears every armed failure.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_flush.store(false, Ordering::SeqCst);
        self.state.fail_on_replace.store(false, Ordering::SeqCst);
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    ///
    /// Bytes already present in `inner` count as written.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        let existing = inner.size().unwrap_or(0);
        Self {
            inner,
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicU64::new(u64::MAX),
                bytes_written: AtomicU64::new(existing),
                crashed: AtomicBool::new(false),
                fail_on_flush: AtomicBool::new(false),
                fail_on_replace: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a handle that keeps working after the backend is boxed.
    pub fn switch(&self) -> CrashSwitch {
        CrashSwitch {
            state: self.state.clone(),
        }
    }

    fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let current = self.state.bytes_written.load(Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if self.has_crashed() || current >= threshold {
            return Err(self.crash("write"));
        }
        let end = current + data.len() as u64;
        if end > threshold {
            let partial = (threshold - current) as usize;
            if partial > 0 {
                self.inner.append(&data[..partial])?;
                self.state
                    .bytes_written
                    .fetch_add(partial as u64, Ordering::SeqCst);
            }
            return Err(self.crash("partial write"));
        }

        let offset = self.inner.append(data)?;
        self.state.bytes_written.store(end, Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("truncate"));
        }
        self.inner.truncate(new_size)?;
        self.state.bytes_written.store(new_size, Ordering::SeqCst);
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.state.fail_on_replace.load(Ordering::SeqCst) {
            return Err(self.crash("replace"));
        }
        self.inner.replace(data)?;
        self.state
            .bytes_written
            .store(data.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens a queue over `storage` behind a [`CrashableBackend`].
///
/// # Errors
///
/// Returns the replay error.
pub fn open_crashable(storage: &InMemoryBackend) -> QueueResult<(QueueStore, CrashSwitch)> {
    let backend = CrashableBackend::new(Box::new(storage.clone()));
    let switch = backend.switch();
    let store = QueueStore::with_backend(Box::new(backend), QueueConfig::default())?;
    Ok((store, switch))
}

/// Reopens a queue over whatever reached `storage`.
///
/// # Errors
///
/// Returns the replay error.
pub fn recover(storage: &InMemoryBackend) -> QueueResult<QueueStore> {
    QueueStore::with_backend(Box::new(storage.clone()), QueueConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_append_keeps_prefix() {
        let storage = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(storage.clone()));
        let switch = backend.switch();
        switch.crash_after(3);

        assert!(backend.append(b"abcdef").is_err());
        assert!(switch.has_crashed());
        assert_eq!(storage.snapshot(), b"abc");
        assert!(backend.append(b"g").is_err());
    }

    #[test]
    fn reset_disarms() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let switch = backend.switch();
        switch.set_fail_on_flush(true);
        assert!(backend.flush().is_err());
        switch.reset();
        assert!(backend.flush().is_ok());
        assert!(!switch.has_crashed());
    }
}
