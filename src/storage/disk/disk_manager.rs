use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use log::warn;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual disk I/O: fixed-size pages written at
/// page-aligned offsets of the database file, plus an append-only log file.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    log_path: PathBuf,
    num_writes: AtomicU64,
    num_flushes: AtomicU64,
}

impl DiskManager {
    /// Open (or create) the database file. The log file lives next to it
    /// with the extension swapped to `.log`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref();
        let log_path = db_path.with_extension("log");

        let db_file = Self::open(db_path)?;
        let log_file = Self::open(&log_path)?;

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            log_path,
            num_writes: AtomicU64::new(0),
            num_flushes: AtomicU64::new(0),
        })
    }

    fn open(path: &Path) -> Result<File, DiskManagerError> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?)
    }

    /// Read a page into `buf`. A read past the end of the file zero-fills
    /// the missing tail; short files are expected while the database grows.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            warn!("read of page {} past end of db file, zero-filling", page_id);
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                warn!("short read of page {} ({} of {} bytes), zero-filling tail", page_id, read, PAGE_SIZE);
                buf[read..].fill(0);
                break;
            }
            read += n;
        }
        Ok(())
    }

    /// Write a page at its page-aligned offset and flush.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        self.num_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Append bytes to the log file.
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes of log starting at `offset`. Returns the
    /// number of bytes read, or `None` once the offset is at or past EOF.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<Option<usize>, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(Some(read))
    }

    /// Number of whole pages currently in the database file.
    pub fn num_pages(&self) -> Result<u64, DiskManagerError> {
        let file = self.db_file.lock();
        Ok(file.metadata()?.len() / PAGE_SIZE as u64)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn num_flushes(&self) -> u64 {
        self.num_flushes.load(Ordering::Relaxed)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_disk() -> (DiskManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        (dm, file)
    }

    #[test]
    fn test_write_read_page() {
        let (dm, _file) = temp_disk();

        let mut buf = [0u8; PAGE_SIZE];
        buf[0..5].copy_from_slice(b"hello");
        dm.write_page(3, &buf).unwrap();

        let mut out = [0xffu8; PAGE_SIZE];
        dm.read_page(3, &mut out).unwrap();
        assert_eq!(&out[0..5], b"hello");
        assert_eq!(out[5..], buf[5..]);
        assert_eq!(dm.num_writes(), 1);
    }

    #[test]
    fn test_read_past_eof_zero_fills() {
        let (dm, _file) = temp_disk();

        let mut out = [0xffu8; PAGE_SIZE];
        dm.read_page(42, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_page_id() {
        let (dm, _file) = temp_disk();
        let mut buf = [0u8; PAGE_SIZE];
        assert!(matches!(
            dm.read_page(-1, &mut buf),
            Err(DiskManagerError::InvalidPageId(-1))
        ));
        assert!(dm.write_page(-1, &buf).is_err());
    }

    #[test]
    fn test_log_append_and_read() {
        let (dm, _file) = temp_disk();

        dm.write_log(b"first").unwrap();
        dm.write_log(b"second").unwrap();

        let mut buf = [0u8; 11];
        let n = dm.read_log(&mut buf, 0).unwrap().unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"firstsecond");

        let mut tail = [0u8; 16];
        let n = dm.read_log(&mut tail, 5).unwrap().unwrap();
        assert_eq!(&tail[..n], b"second");

        assert!(dm.read_log(&mut tail, 11).unwrap().is_none());
    }
}
