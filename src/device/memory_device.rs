//! In-memory segment storage
//!
//! Keeps segment bytes in shared buffers: every handle opened for the same
//! version sees the same data. Useful for tests and benchmarks.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{SegmentStore, StorageDevice};

/// One in-memory segment.
#[derive(Clone, Default)]
pub struct MemoryFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryFile {
    /// Copy of the current contents
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl StorageDevice for MemoryFile {
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let end = std::cmp::min(offset + buf.len(), data.len());
        let len = end - offset;
        buf[..len].copy_from_slice(&data[offset..end]);
        Ok(len)
    }

    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.lock();
        let offset = offset as usize;
        if offset + buf.len() > data.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn flush_sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn truncate_sync(&self, size: u64) -> io::Result<()> {
        self.data.lock().resize(size as usize, 0);
        Ok(())
    }

    fn size_sync(&self) -> io::Result<u64> {
        Ok(self.data.lock().len() as u64)
    }
}

/// Set of in-memory segments.
#[derive(Clone, Default)]
pub struct MemoryStore {
    segments: Arc<Mutex<BTreeMap<u64, MemoryFile>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a segment's bytes, if it exists
    pub fn segment_contents(&self, version: u64) -> Option<Vec<u8>> {
        self.segments.lock().get(&version).map(MemoryFile::contents)
    }
}

impl SegmentStore for MemoryStore {
    type Device = MemoryFile;

    fn open_segment(&self, version: u64, create: bool) -> io::Result<MemoryFile> {
        let mut segments = self.segments.lock();
        match segments.get(&version) {
            Some(file) => Ok(file.clone()),
            None if create => {
                let file = MemoryFile::default();
                segments.insert(version, file.clone());
                Ok(file)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("segment {version} not found"),
            )),
        }
    }

    fn list_segments(&self) -> io::Result<Vec<u64>> {
        Ok(self.segments.lock().keys().copied().collect())
    }
}
