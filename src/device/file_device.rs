//! File system storage for log segments
//!
//! Each segment lives in its own file `<prefix>.<version>` inside a
//! directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::device::{SegmentStore, StorageDevice};

/// Default segment file prefix.
pub const DEFAULT_SEGMENT_PREFIX: &str = "txlog";

/// One segment file.
///
/// The appender thread is the only writer; readers open their own handle.
pub struct FileSystemFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSystemFile {
    /// Open or create a file at the specified path
    pub fn open(path: impl AsRef<Path>, create: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Get the path to the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageDevice for FileSystemFile {
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write(buf)
    }

    fn flush_sync(&self) -> io::Result<()> {
        self.file.lock().sync_data()
    }

    fn truncate_sync(&self, size: u64) -> io::Result<()> {
        self.file.lock().set_len(size)
    }

    fn size_sync(&self) -> io::Result<u64> {
        self.file.lock().metadata().map(|m| m.len())
    }
}

/// Directory of segment files.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    base_dir: PathBuf,
    prefix: String,
}

impl DirectoryStore {
    /// Use `base_dir` (created if missing) with the default prefix.
    pub fn new(base_dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_prefix(base_dir, DEFAULT_SEGMENT_PREFIX)
    }

    /// Use `base_dir` (created if missing) with a custom prefix.
    pub fn with_prefix(base_dir: impl AsRef<Path>, prefix: &str) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;

        Ok(Self {
            base_dir,
            prefix: prefix.to_string(),
        })
    }

    /// Directory holding the segments
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the segment file path for a given version
    pub fn segment_path(&self, version: u64) -> PathBuf {
        self.base_dir.join(format!("{}.{}", self.prefix, version))
    }

    fn parse_version(&self, file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('.')?
            .parse()
            .ok()
    }
}

impl SegmentStore for DirectoryStore {
    type Device = FileSystemFile;

    fn open_segment(&self, version: u64, create: bool) -> io::Result<FileSystemFile> {
        FileSystemFile::open(self.segment_path(version), create)
    }

    fn list_segments(&self) -> io::Result<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(|n| self.parse_version(n)) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn sync_directory(&self) -> io::Result<()> {
        fsync_dir(&self.base_dir)
    }
}

/// Sync a directory so that entries created in it survive a crash.
///
/// Platforms that cannot open or sync a directory are treated as synced.
fn fsync_dir(path: &Path) -> io::Result<()> {
    match OpenOptions::new().read(true).open(path) {
        Ok(dir) => match dir.sync_all() {
            Ok(()) => Ok(()),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
                ) =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        },
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_system_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dat");

        let file = FileSystemFile::open(&path, true).unwrap();

        let data = b"Hello, World!";
        file.write_all_sync(0, data).unwrap();

        let mut buf = vec![0u8; data.len()];
        let read = file.read_full_sync(0, &mut buf).unwrap();
        assert_eq!(read, data.len());
        assert_eq!(&buf, data);

        file.truncate_sync(5).unwrap();
        assert_eq!(file.size_sync().unwrap(), 5);
    }

    #[test]
    fn test_directory_store_lists_versions() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::new(dir.path()).unwrap();

        for version in [2u64, 0, 10] {
            store.open_segment(version, true).unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();
        fs::write(dir.path().join("txlog.bad"), b"x").unwrap();

        assert_eq!(store.list_segments().unwrap(), vec![0, 2, 10]);
    }

    #[test]
    fn test_sync_directory() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::new(dir.path()).unwrap();
        store.open_segment(0, true).unwrap();
        store.sync_directory().unwrap();

        let gone = DirectoryStore::new(dir.path().join("nested")).unwrap();
        fs::remove_dir(gone.base_dir()).unwrap();
        assert_eq!(
            gone.sync_directory().unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_open_missing_segment_without_create() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::with_prefix(dir.path(), "wal").unwrap();
        let err = store.open_segment(3, false).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(store.segment_path(3).ends_with("wal.3"));
    }
}
