//! Record id allocation
//!
//! Each store keeps its id state in a `.id` sidecar file:
//!
//! ```text
//! u8   clean flag (0 = closed cleanly, 1 = open)
//! u64  high id
//! u64* free ids
//! ```
//!
//! Opening a generator sets the flag, closing it writes the free list and
//! clears the flag. A generator found with the flag set was not closed and
//! its store has to rebuild it from the records.

pub mod rebuild;

pub use rebuild::{rebuild_fast, rebuild_full, RebuildResult};

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const CLEAN: u8 = 0;
const STICKY: u8 = 1;
const HEADER_SIZE: usize = 9;

/// Id `0xFFFF_FFFF` is never handed out: with no high bits it reads back as
/// the "no record" sentinel.
pub const INTEGER_MINUS_ONE: u64 = u32::MAX as u64;

/// Hands out and takes back record ids
pub trait IdGenerator: Send + Sync {
    /// Allocate an id, reusing freed ids first
    fn next_id(&self) -> Result<u64>;
    /// Return an id for reuse
    fn free_id(&self, id: u64) -> Result<()>;
    /// One past the highest id ever handed out
    fn high_id(&self) -> u64;
    /// Move the high id
    fn set_high_id(&self, id: u64);
    /// Raise the high id past `id` if it is not already
    fn ensure_high_id(&self, id: u64);
    /// Ids waiting for reuse
    fn free_count(&self) -> usize;
    /// Persist state and mark the generator clean
    fn close(&self) -> Result<()>;
}

#[derive(Debug)]
struct State {
    high_id: u64,
    free: VecDeque<u64>,
    file: Option<File>,
}

/// Id generator persisted to a sidecar file
#[derive(Debug)]
pub struct FileIdGenerator {
    path: PathBuf,
    max_id: u64,
    state: Mutex<State>,
}

impl FileIdGenerator {
    /// Write a clean id file
    pub fn create<P: AsRef<Path>>(path: P, high_id: u64, free_ids: &[u64]) -> Result<()> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        write_state(&mut file, CLEAN, high_id, free_ids.iter().copied())?;
        tracing::debug!("Created id file {:?} with high id {}", path, high_id);
        Ok(())
    }

    /// Open an id file written by [`FileIdGenerator::create`] or a clean close
    ///
    /// Fails if the file is missing, malformed or was not closed cleanly.
    /// A read-only generator leaves the file untouched.
    pub fn open<P: AsRef<Path>>(path: P, max_id: u64, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)
            .map_err(|e| Error::id_generator(format!("cannot open {:?}: {}", path, e)))?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        if bytes.len() < HEADER_SIZE || (bytes.len() - HEADER_SIZE) % 8 != 0 {
            return Err(Error::id_generator(format!(
                "{:?} has invalid length {}",
                path,
                bytes.len()
            )));
        }
        match bytes[0] {
            CLEAN => {}
            STICKY => {
                return Err(Error::id_generator(format!("{:?} was not closed cleanly", path)));
            }
            other => {
                return Err(Error::id_generator(format!(
                    "{:?} has unknown clean flag {}",
                    path, other
                )));
            }
        }

        let high_id = u64::from_be_bytes(to_array(&bytes[1..HEADER_SIZE]));
        let free: VecDeque<u64> = bytes[HEADER_SIZE..]
            .chunks_exact(8)
            .map(|c| u64::from_be_bytes(to_array(c)))
            .filter(|id| *id < high_id)
            .collect();

        let file = if read_only {
            None
        } else {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&[STICKY])?;
            file.sync_data()?;
            Some(file)
        };

        tracing::debug!(
            "Opened id file {:?}: high id {}, {} free ids",
            path,
            high_id,
            free.len()
        );
        Ok(Self {
            path,
            max_id,
            state: Mutex::new(State {
                high_id,
                free,
                file,
            }),
        })
    }

    /// Path of the id file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdGenerator for FileIdGenerator {
    fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop_front() {
            return Ok(id);
        }
        let mut id = state.high_id;
        if id == INTEGER_MINUS_ONE {
            id += 1;
        }
        if id > self.max_id {
            return Err(Error::id_generator(format!(
                "{:?}: id space exhausted at {}",
                self.path, self.max_id
            )));
        }
        state.high_id = id + 1;
        Ok(id)
    }

    fn free_id(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.file.is_none() {
            return Err(Error::id_generator(format!(
                "{:?}: cannot free id {} on a closed or read-only generator",
                self.path, id
            )));
        }
        if id >= state.high_id || id == INTEGER_MINUS_ONE {
            return Err(Error::id_generator(format!(
                "{:?}: cannot free id {}, high id is {}",
                self.path, id, state.high_id
            )));
        }
        state.free.push_back(id);
        Ok(())
    }

    fn high_id(&self) -> u64 {
        self.state.lock().high_id
    }

    fn set_high_id(&self, id: u64) {
        let mut state = self.state.lock();
        state.high_id = id;
        state.free.retain(|free| *free < id);
    }

    fn ensure_high_id(&self, id: u64) {
        let mut state = self.state.lock();
        if id >= state.high_id {
            state.high_id = id + 1;
        }
    }

    fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(mut file) = state.file.take() else {
            return Ok(());
        };
        let high_id = state.high_id;
        write_state(&mut file, CLEAN, high_id, state.free.iter().copied())?;
        tracing::debug!(
            "Closed id file {:?}: high id {}, {} free ids",
            self.path,
            high_id,
            state.free.len()
        );
        Ok(())
    }
}

fn write_state(
    file: &mut File,
    flag: u8,
    high_id: u64,
    free: impl Iterator<Item = u64>,
) -> Result<()> {
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    buf.push(flag);
    buf.extend_from_slice(&high_id.to_be_bytes());
    for id in free {
        buf.extend_from_slice(&id.to_be_bytes());
    }
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

fn to_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}
