//! Fixed-size block file backing the buffer pool.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::{DbError, DbResult};

use crate::PAGE_SIZE;

const DB_FILE_SUFFIX: &str = ".db";
const LOG_FILE_SUFFIX: &str = ".log";

struct DiskFile {
    db_file: File,
    log_file: File,
    db_file_size: u64,
}

/// Owns the on-disk `.db` and `.log` files and serializes all access to them
/// behind a single mutex, matching the original disk manager's "one lock for
/// the whole file" model rather than per-page locking.
pub struct DiskManager {
    db_path: PathBuf,
    log_path: PathBuf,
    inner: Mutex<DiskFile>,
}

impl DiskManager {
    /// Opens (creating if absent) the database and log files. A path that
    /// doesn't carry the expected suffix is a fatal, but recoverable-to-the-
    /// caller, construction error: the original disk manager panics on this
    /// ("database file format incorrect!"), but a panicking constructor
    /// isn't idiomatic Rust, so this surfaces as `DbError::Storage` instead.
    pub fn new(db_path: impl AsRef<Path>, log_path: impl AsRef<Path>) -> DbResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let log_path = log_path.as_ref().to_path_buf();

        if !has_suffix(&db_path, DB_FILE_SUFFIX) {
            return Err(DbError::Storage(format!(
                "database file path must end in {DB_FILE_SUFFIX}: {db_path:?}"
            )));
        }
        if !has_suffix(&log_path, LOG_FILE_SUFFIX) {
            return Err(DbError::Storage(format!(
                "log file path must end in {LOG_FILE_SUFFIX}: {log_path:?}"
            )));
        }

        let db_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&db_path)?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let db_file_size = db_file.metadata()?.len();

        Ok(Self {
            db_path,
            log_path,
            inner: Mutex::new(DiskFile {
                db_file,
                log_file,
                db_file_size,
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Writes exactly one page's worth of bytes at `page_id`'s offset.
    /// Allows writing at the current end of file (extending it by one page)
    /// but not past it. Flushes to disk before returning (spec §4.1:
    /// "every successful write is fsync'd before the call returns").
    pub fn write_page(&self, page_id: u64, data: &[u8]) -> DbResult<()> {
        if data.len() < PAGE_SIZE {
            return Err(DbError::ShortBuffer {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }

        let mut inner = self.inner.lock().expect("disk manager mutex poisoned");
        let offset = page_id * PAGE_SIZE as u64;
        let append_mode = offset == inner.db_file_size;
        if offset > inner.db_file_size {
            return Err(DbError::AppendPastEof {
                page_id: page_id as i64,
            });
        }

        inner.db_file.seek(SeekFrom::Start(offset))?;
        inner.db_file.write_all(&data[..PAGE_SIZE])?;
        inner.db_file.sync_all()?;

        if append_mode {
            inner.db_file_size += PAGE_SIZE as u64;
        }
        Ok(())
    }

    /// Reads exactly one page's worth of bytes from `page_id`'s offset.
    pub fn read_page(&self, page_id: u64) -> DbResult<Vec<u8>> {
        let mut inner = self.inner.lock().expect("disk manager mutex poisoned");
        let offset = page_id * PAGE_SIZE as u64;
        if inner.db_file_size == 0 || offset >= inner.db_file_size {
            return Err(DbError::PageAbsent {
                page_id: page_id as i64,
                reason: "page offset at or beyond end of file".into(),
            });
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        inner.db_file.seek(SeekFrom::Start(offset))?;
        let read = read_fully(&mut inner.db_file, &mut buf)?;
        if read < PAGE_SIZE {
            return Err(DbError::ShortRead {
                page_id: page_id as i64,
                expected: PAGE_SIZE,
                actual: read,
            });
        }
        Ok(buf)
    }

    /// Number of whole pages currently stored in the database file.
    pub fn page_count(&self) -> u64 {
        let inner = self.inner.lock().expect("disk manager mutex poisoned");
        inner.db_file_size / PAGE_SIZE as u64
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.to_str().is_some_and(|s| s.ends_with(suffix))
}

fn read_fully(file: &mut File, buf: &mut [u8]) -> DbResult<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, DiskManager) {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        let log = dir.path().join("test.log");
        let mgr = DiskManager::new(&db, &log).unwrap();
        (dir, mgr)
    }

    #[test]
    fn fresh_file_has_zero_pages() {
        let (_dir, mgr) = manager();
        assert_eq!(mgr.page_count(), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, mgr) = manager();
        let mut page = vec![7u8; PAGE_SIZE];
        page[0] = 42;
        mgr.write_page(0, &page).unwrap();
        let back = mgr.read_page(0).unwrap();
        assert_eq!(back, page);
        assert_eq!(mgr.page_count(), 1);
    }

    #[test]
    fn sequential_appends_grow_page_count() {
        let (_dir, mgr) = manager();
        for i in 0..5u64 {
            mgr.write_page(i, &vec![i as u8; PAGE_SIZE]).unwrap();
        }
        assert_eq!(mgr.page_count(), 5);
        for i in 0..5u64 {
            let back = mgr.read_page(i).unwrap();
            assert!(back.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn write_past_eof_is_rejected() {
        let (_dir, mgr) = manager();
        let page = vec![1u8; PAGE_SIZE];
        let err = mgr.write_page(3, &page).unwrap_err();
        assert!(matches!(err, DbError::AppendPastEof { page_id: 3 }));
    }

    #[test]
    fn write_with_short_buffer_is_rejected() {
        let (_dir, mgr) = manager();
        let err = mgr.write_page(0, &[0u8; 10]).unwrap_err();
        assert!(matches!(err, DbError::ShortBuffer { .. }));
    }

    #[test]
    fn read_absent_page_is_rejected() {
        let (_dir, mgr) = manager();
        let err = mgr.read_page(0).unwrap_err();
        assert!(matches!(err, DbError::PageAbsent { page_id: 0, .. }));
    }

    #[test]
    fn overwrite_existing_page_does_not_grow_file() {
        let (_dir, mgr) = manager();
        mgr.write_page(0, &vec![1u8; PAGE_SIZE]).unwrap();
        mgr.write_page(0, &vec![2u8; PAGE_SIZE]).unwrap();
        assert_eq!(mgr.page_count(), 1);
        assert!(mgr.read_page(0).unwrap().iter().all(|&b| b == 2));
    }

    #[test]
    fn rejects_bad_db_suffix() {
        let dir = tempdir().unwrap();
        let err = DiskManager::new(dir.path().join("test.bin"), dir.path().join("test.log"))
            .unwrap_err();
        assert!(matches!(err, DbError::Storage(_)));
    }

    #[test]
    fn rejects_bad_log_suffix() {
        let dir = tempdir().unwrap();
        let err = DiskManager::new(dir.path().join("test.db"), dir.path().join("test.bin"))
            .unwrap_err();
        assert!(matches!(err, DbError::Storage(_)));
    }
}
