//! Append-only record log on disk.
//!
//! The log is a single file that is:
//! - Created lazily by the first append
//! - Never truncated while the server runs
//! - Removed unconditionally on shutdown
//!
//! Every operation opens and closes its own handle, so no descriptor is held
//! across connections. There is no internal locking: callers must not run two
//! append/read cycles at once, which the serial accept loop guarantees.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Size of each chunk streamed back by `read_all_into`.
const READ_CHUNK_SIZE: usize = 4096;

/// Permission bits for a newly created log file.
const FILE_MODE: u32 = 0o644;

/// Handle to the record log file.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    sync_on_append: bool,
}

impl LogStore {
    /// Create a store backed by `path`. Nothing is touched on disk until the
    /// first append; existing content is kept as the current log.
    pub fn new(path: impl Into<PathBuf>, sync_on_append: bool) -> Self {
        Self {
            path: path.into(),
            sync_on_append,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` to the end of the log.
    ///
    /// On success every byte is ordered after all earlier successful appends.
    /// Interrupted writes are retried; any other error is returned as is.
    pub fn append(&self, record: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .mode(FILE_MODE)
            .open(&self.path)?;

        // write_all retries ErrorKind::Interrupted and nothing else
        file.write_all(record)?;

        if self.sync_on_append {
            file.sync_data()?;
        }

        trace!(len = record.len(), "Appended record");
        Ok(())
    }

    /// Stream the whole current log into `out` in bounded chunks.
    ///
    /// Returns the number of bytes written. A log that was never created
    /// reads back as an error, since callers only read after an append.
    pub fn read_all_into<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<u64> {
        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            out.write_all(&chunk[..n])?;
            total += n as u64;
        }

        Ok(total)
    }

    /// Delete the log file. A missing file counts as success.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed record log");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn store_in(dir: &tempfile::TempDir) -> LogStore {
        LogStore::new(dir.path().join("aesdsocketdata"), false)
    }

    fn read_back(store: &LogStore) -> Vec<u8> {
        let mut out = Vec::new();
        store.read_all_into(&mut out).unwrap();
        out
    }

    #[test]
    fn test_append_creates_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.path().exists());

        store.append(b"hello\n").unwrap();
        assert!(store.path().exists());
        assert_eq!(read_back(&store), b"hello\n");

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        // 0644 filtered by whatever umask the test runs under
        assert_eq!(mode & 0o133, 0);
    }

    #[test]
    fn test_appends_accumulate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.append(b"hello\n").unwrap();
        store.append(b"world\n").unwrap();
        store.append(b"!\n").unwrap();

        assert_eq!(read_back(&store), b"hello\nworld\n!\n");
    }

    #[test]
    fn test_existing_content_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"left over\n").unwrap();

        store.append(b"new\n").unwrap();
        assert_eq!(read_back(&store), b"left over\nnew\n");
    }

    #[test]
    fn test_read_spans_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("big"), true);

        let mut record = vec![b'x'; READ_CHUNK_SIZE * 3 + 17];
        record.push(b'\n');
        store.append(&record).unwrap();

        let mut out = Vec::new();
        let n = store.read_all_into(&mut out).unwrap();
        assert_eq!(n, record.len() as u64);
        assert_eq!(out, record);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let err = store.read_all_into(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.remove().unwrap();

        store.append(b"data\n").unwrap();
        store.remove().unwrap();
        assert!(!store.path().exists());
        store.remove().unwrap();
    }

    #[test]
    fn test_append_after_remove_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.append(b"first run\n").unwrap();
        store.remove().unwrap();

        store.append(b"second run\n").unwrap();
        assert_eq!(read_back(&store), b"second run\n");
    }

    #[test]
    fn test_append_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("nope").join("data"), false);
        assert!(store.append(b"x\n").is_err());
    }
}
