//! A file addressed by fixed-size record slots
//!
//! All I/O is positional so concurrent readers and writers never share a
//! file cursor. The page cache uses [`FileWithRecords::map`] for mapped
//! pages and falls back to [`FileWithRecords::read`] / [`FileWithRecords::write`]
//! for slots it does not hold.

use crate::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// File of fixed-size records
#[derive(Debug)]
pub struct FileWithRecords {
    file: File,
    path: PathBuf,
    record_size: usize,
    read_only: bool,
}

impl FileWithRecords {
    /// Open an existing file
    pub fn open<P: AsRef<Path>>(path: P, record_size: usize, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if record_size == 0 {
            return Err(Error::internal(format!("{:?}: record size 0", path)));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            record_size,
            read_only,
        })
    }

    /// Create a new empty file, failing if it exists
    pub fn create<P: AsRef<Path>>(path: P, record_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if record_size == 0 {
            return Err(Error::internal(format!("{:?}: record size 0", path)));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            record_size,
            read_only: false,
        })
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of one record slot
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Opened without write access
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current file length in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Whole records currently in the file
    pub fn record_count(&self) -> Result<u64> {
        Ok(self.size()? / self.record_size as u64)
    }

    /// Truncate or extend the file
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.check_writable()?;
        self.file.set_len(len)?;
        Ok(())
    }

    /// Read `count` records starting at `from`
    pub fn read(&self, from: u64, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count * self.record_size];
        self.read_into(from, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` with the records starting at `from`
    ///
    /// Bytes past the end of the file are zero-filled as long as the
    /// shortfall stays within one record; a larger gap is a storage error.
    pub fn read_into(&self, from: u64, buf: &mut [u8]) -> Result<()> {
        let offset = from * self.record_size as u64;
        let filled = self.read_bytes_at(offset, buf)?;
        if filled < buf.len() {
            let missing = buf.len() - filled;
            if missing > self.record_size {
                return Err(Error::storage(format!(
                    "{:?}: short read at record {}, got {} of {} bytes",
                    self.path,
                    from,
                    filled,
                    buf.len()
                )));
            }
            buf[filled..].fill(0);
        }
        Ok(())
    }

    /// Read raw bytes at `offset` until `buf` is full or the file ends
    pub fn read_bytes_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match pread(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Write whole records starting at `from`
    pub fn write(&self, from: u64, bytes: &[u8]) -> Result<()> {
        if bytes.len() % self.record_size != 0 {
            return Err(Error::storage(format!(
                "{:?}: write of {} bytes is not a multiple of record size {}",
                self.path,
                bytes.len(),
                self.record_size
            )));
        }
        self.write_bytes_at(from * self.record_size as u64, bytes)
    }

    /// Write raw bytes at `offset`
    pub fn write_bytes_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut written = 0;
        while written < bytes.len() {
            match pwrite(&self.file, &bytes[written..], offset + written as u64) {
                Ok(0) => {
                    return Err(Error::storage(format!(
                        "{:?}: short write at offset {}, wrote {} of {} bytes",
                        self.path,
                        offset,
                        written,
                        bytes.len()
                    )));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Map `count` records starting at `from`
    ///
    /// Writable stores get a shared mapping and the file is extended to cover
    /// it. Read-only stores get a private copy-on-write mapping of what exists.
    pub fn map(&self, from: u64, count: usize) -> Result<MmapMut> {
        let offset = from * self.record_size as u64;
        let len = count * self.record_size;
        let end = offset + len as u64;

        let mmap = if self.read_only {
            if end > self.size()? {
                return Err(Error::storage(format!(
                    "{:?}: cannot map {} bytes at {} past end of read-only file",
                    self.path, len, offset
                )));
            }
            unsafe { MmapOptions::new().offset(offset).len(len).map_copy(&self.file) }
        } else {
            if end > self.size()? {
                self.file.set_len(end)?;
            }
            unsafe { MmapOptions::new().offset(offset).len(len).map_mut(&self.file) }
        };
        mmap.map_err(|e| {
            Error::storage(format!(
                "{:?}: failed to map {} bytes at {}: {}",
                self.path, len, offset, e
            ))
        })
    }

    /// Flush file data to stable storage
    pub fn force(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// Take the exclusive OS lock on the file
    pub fn lock(&self) -> Result<()> {
        fs2::FileExt::try_lock_exclusive(&self.file)
            .map_err(|_| Error::StoreLocked(self.path.clone()))
    }

    /// Release the OS lock
    pub fn unlock(&self) -> Result<()> {
        fs2::FileExt::unlock(&self.file)?;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::read_only(format!("{:?} is read-only", self.path)));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}
