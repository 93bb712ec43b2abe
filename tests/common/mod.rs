//! Shared test utilities for fault injection and crash consistency tests.

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use oxilog::device::{MemoryFile, MemoryStore, SegmentStore, StorageDevice};
use oxilog::pipeline::{IdleConfig, LogQueueConfig};

/// Fault switches shared by every segment of a [`FaultInjectionStore`].
#[derive(Default)]
pub struct Faults {
    /// Total number of write_sync calls observed so far.
    write_count: AtomicU64,
    /// When non-zero, the Nth write (1-based) will return an I/O error.
    fail_write_at: AtomicU64,
    /// When true, the next flush_sync call will return an error.
    fail_next_flush: AtomicBool,
    /// When true, the next truncate_sync call will return an error.
    fail_next_truncate: AtomicBool,
    /// When non-zero, the next write will be silently truncated to at most
    /// this many bytes (simulating a partial / torn write).
    partial_write_max: AtomicUsize,
    /// Delay applied to every write, to let producers pile up.
    write_delay_us: AtomicU64,
    /// When true, the next write panics instead of returning.
    panic_next_write: AtomicBool,
    /// Number of directory syncs observed so far.
    dir_sync_count: AtomicU64,
    /// When true, the next directory sync returns an error.
    fail_next_dir_sync: AtomicBool,
}

impl Faults {
    /// Make the Nth write from now (1-based) return an error.
    pub fn inject_write_error_in(&self, operations: u64) {
        let now = self.write_count.load(Ordering::SeqCst);
        self.fail_write_at.store(now + operations, Ordering::SeqCst);
    }

    /// Make the next `flush_sync` call return an error.
    pub fn inject_flush_error(&self) {
        self.fail_next_flush.store(true, Ordering::SeqCst);
    }

    /// Make the next `truncate_sync` call return an error.
    pub fn inject_truncate_error(&self) {
        self.fail_next_truncate.store(true, Ordering::SeqCst);
    }

    /// Make the next write silently truncate data to at most `max_bytes`.
    pub fn inject_partial_write(&self, max_bytes: usize) {
        self.partial_write_max.store(max_bytes, Ordering::SeqCst);
    }

    /// Slow every write down by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_us
            .store(delay.as_micros() as u64, Ordering::SeqCst);
    }

    /// Make the next write panic on the calling thread.
    pub fn inject_write_panic(&self) {
        self.panic_next_write.store(true, Ordering::SeqCst);
    }

    /// Make the next directory sync return an error.
    pub fn inject_dir_sync_error(&self) {
        self.fail_next_dir_sync.store(true, Ordering::SeqCst);
    }

    /// Return the number of directory syncs observed.
    pub fn dir_sync_count(&self) -> u64 {
        self.dir_sync_count.load(Ordering::SeqCst)
    }

    /// Return the total number of write_sync calls observed.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }
}

/// A fault-injection wrapper around one in-memory segment.
pub struct FaultInjectionDevice {
    inner: MemoryFile,
    faults: Arc<Faults>,
}

impl StorageDevice for FaultInjectionDevice {
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_sync(offset, buf)
    }

    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let n = self.faults.write_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.faults.panic_next_write.swap(false, Ordering::SeqCst) {
            panic!("injected write panic at operation {n}");
        }

        let delay = self.faults.write_delay_us.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_micros(delay));
        }

        let target = self.faults.fail_write_at.load(Ordering::SeqCst);
        if target != 0 && n == target {
            return Err(io::Error::other(format!(
                "injected write error at operation {n}"
            )));
        }

        let max = self.faults.partial_write_max.swap(0, Ordering::SeqCst);
        if max > 0 && max < buf.len() {
            return self.inner.write_sync(offset, &buf[..max]);
        }

        self.inner.write_sync(offset, buf)
    }

    fn flush_sync(&self) -> io::Result<()> {
        if self.faults.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("injected flush error"));
        }
        self.inner.flush_sync()
    }

    fn truncate_sync(&self, size: u64) -> io::Result<()> {
        if self.faults.fail_next_truncate.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("injected truncate error"));
        }
        self.inner.truncate_sync(size)
    }

    fn size_sync(&self) -> io::Result<u64> {
        self.inner.size_sync()
    }
}

/// A [`MemoryStore`] whose segments share one set of [`Faults`].
#[derive(Clone, Default)]
pub struct FaultInjectionStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FaultInjectionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault switches
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// The wrapped store, for fault-free access
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }
}

impl SegmentStore for FaultInjectionStore {
    type Device = FaultInjectionDevice;

    fn open_segment(&self, version: u64, create: bool) -> io::Result<FaultInjectionDevice> {
        Ok(FaultInjectionDevice {
            inner: self.inner.open_segment(version, create)?,
            faults: Arc::clone(&self.faults),
        })
    }

    fn list_segments(&self) -> io::Result<Vec<u64>> {
        self.inner.list_segments()
    }

    fn sync_directory(&self) -> io::Result<()> {
        if self.faults.fail_next_dir_sync.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("injected directory sync error"));
        }
        self.faults.dir_sync_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Queue configuration tuned for tests: the appender parks briefly so that
/// shutdown and wake-ups are prompt.
pub fn test_queue_config() -> LogQueueConfig {
    LogQueueConfig::default().with_idle(
        IdleConfig::default()
            .with_spin_threshold(10)
            .with_short_park_threshold(100)
            .with_short_park(Duration::from_micros(50))
            .with_long_park(Duration::from_millis(1)),
    )
}

// ---------------------------------------------------------------------------
// File corruption utilities
// ---------------------------------------------------------------------------

/// Flip one bit at the given byte offset in a file.
pub fn corrupt_byte_at(path: &Path, offset: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut byte = [0u8];
    file.read_exact(&mut byte)?;
    byte[0] ^= 0x01; // flip lowest bit
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()?;
    Ok(())
}

/// Truncate a file to `new_len` bytes.
pub fn truncate_to(path: &Path, new_len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(new_len)?;
    file.sync_all()?;
    Ok(())
}

/// Append raw bytes to the end of a file.
pub fn append_garbage(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
