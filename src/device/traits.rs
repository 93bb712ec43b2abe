//! Storage device traits for the transaction log
//!
//! The log is split into segments. A [`SegmentStore`] creates and opens the
//! segment devices; each segment is a [`StorageDevice`] that supports
//! positioned synchronous I/O.

use std::io;

/// Synchronous positioned I/O on one segment.
pub trait StorageDevice: Send + Sync + 'static {
    /// Read up to `buf.len()` bytes from `offset` into `buf`.
    ///
    /// Returns the number of bytes read; fewer than requested means the end
    /// of the device was reached.
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf` at `offset`, returning the number of bytes written.
    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Flush written bytes to stable storage.
    fn flush_sync(&self) -> io::Result<()>;

    /// Truncate (or extend) the device to `size` bytes.
    fn truncate_sync(&self, size: u64) -> io::Result<()>;

    /// Current size of the device.
    fn size_sync(&self) -> io::Result<u64>;

    /// Write all of `buf` at `offset`, failing on a short write.
    fn write_all_sync(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut written = 0usize;
        while written < buf.len() {
            let n = self.write_sync(offset + written as u64, &buf[written..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!(
                        "short write at offset {offset}: expected {} bytes, wrote {written}",
                        buf.len()
                    ),
                ));
            }
            written += n;
        }
        Ok(())
    }

    /// Fill `buf` from `offset`, returning the bytes read before EOF.
    fn read_full_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut read = 0usize;
        while read < buf.len() {
            let n = self.read_sync(offset + read as u64, &mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }
}

/// Factory for segment devices, addressed by log version.
pub trait SegmentStore: Send + Sync + 'static {
    /// Device type of one segment
    type Device: StorageDevice;

    /// Open segment `version`, creating it when `create` is set.
    fn open_segment(&self, version: u64, create: bool) -> io::Result<Self::Device>;

    /// Versions of all existing segments, ascending.
    fn list_segments(&self) -> io::Result<Vec<u64>>;

    /// Make segment creation durable.
    ///
    /// Called after a new segment's header is flushed. Stores without a
    /// directory to sync keep the default.
    fn sync_directory(&self) -> io::Result<()> {
        Ok(())
    }
}
