//! Store file lifecycle: create, verify on open, rebuild ids, seal on close
//!
//! Opening walks a store through
//!
//! ```text
//! Unchecked -> VersionChecked -> SizeVerified -> IdLoaded -> Ready
//! ```
//!
//! A store whose trailer is missing, whose size is not a whole number of
//! records or whose id file was not closed cleanly stops short of
//! `IdLoaded` and is "not ok" until [`make_store_ok`] rebuilds its ids.

use super::version::{check_trailer, trailer, VersionCheck};
use crate::config::StoreConfig;
use crate::file::FileWithRecords;
use crate::id_generator::{rebuild_fast, rebuild_full, FileIdGenerator, IdGenerator};
use crate::record::RecordFormat;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Loader progress for one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    /// File opened and locked
    Unchecked,
    /// Trailer matched this version and was stripped
    VersionChecked,
    /// File holds whole records only
    SizeVerified,
    /// Id generator opened
    IdLoaded,
    /// Open for record access
    Ready,
}

/// Result of opening a store file
#[derive(Debug)]
pub struct LoadedStore {
    /// The record file
    pub file: FileWithRecords,
    /// Id generator, absent while the store is not ok
    pub ids: Option<FileIdGenerator>,
    /// How far loading got
    pub state: LoadState,
    /// Why the store is not ok, if it is not
    pub not_ok: Option<String>,
}

/// Path of the id file that belongs to `path`
pub fn id_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".id");
    PathBuf::from(name)
}

/// Highest record id any store hands out; node and relationship pointers
/// carry 35 bits
pub const MAX_RECORD_ID: u64 = (1 << 35) - 1;

/// Create an empty store file with its trailer and a clean id file
///
/// Formats with a header record get it written as record 0 and start with
/// their reserved records allocated.
pub fn create_empty_store<F: RecordFormat>(path: &Path, format: &F) -> Result<()> {
    let file = FileWithRecords::create(path, format.record_size())?;
    let mut high_id = 0;
    if let Some(header) = format.header_record() {
        file.write(0, &header)?;
        high_id = format.reserved_records();
    }
    let end = high_id * format.record_size() as u64;
    file.write_bytes_at(end, trailer(format.type_descriptor()).as_bytes())?;
    file.force()?;
    FileIdGenerator::create(id_path(path), high_id, &[])?;

    tracing::info!(
        "Created {} at {:?} (record size {})",
        format.type_descriptor(),
        path,
        format.record_size()
    );
    Ok(())
}

/// Open a store file and take it as far through loading as it will go
///
/// Fails outright if the file is missing, locked by another process or
/// written by an older version. Every other problem leaves the store not ok.
pub fn load_store<F: RecordFormat>(path: &Path, format: &F, config: &StoreConfig) -> Result<LoadedStore> {
    let descriptor = format.type_descriptor();
    let record_size = format.record_size() as u64;
    let file = FileWithRecords::open(path, format.record_size(), config.read_only)?;
    if !config.read_only {
        file.lock()?;
    }
    let mut loaded = LoadedStore {
        file,
        ids: None,
        state: LoadState::Unchecked,
        not_ok: None,
    };

    let expected = trailer(descriptor);
    let size = loaded.file.size()?;
    let tail_len = (expected.len() as u64).min(size);
    let mut tail = vec![0u8; tail_len as usize];
    loaded.file.read_bytes_at(size - tail_len, &mut tail)?;

    let body = match check_trailer(descriptor, &tail) {
        VersionCheck::Current => {
            let body = size - tail_len;
            if !config.read_only {
                loaded.file.set_len(body)?;
            }
            loaded.state = LoadState::VersionChecked;
            body
        }
        VersionCheck::NeedsMigration(found) => {
            if !config.read_only {
                loaded.file.unlock()?;
            }
            return Err(Error::NeedsMigration { expected, found });
        }
        VersionCheck::Unrecognised(found) => {
            return Ok(not_ok(
                loaded,
                format!("{:?}: expected trailer {:?}, found {:?}", path, expected, found),
            ));
        }
    };

    if body % record_size != 0 {
        return Ok(not_ok(
            loaded,
            format!(
                "{:?}: size {} is not a multiple of record size {}",
                path, body, record_size
            ),
        ));
    }
    loaded.state = LoadState::SizeVerified;

    match FileIdGenerator::open(id_path(path), MAX_RECORD_ID, config.read_only) {
        Ok(ids) => {
            loaded.ids = Some(ids);
            loaded.state = LoadState::IdLoaded;
        }
        Err(e) => return Ok(not_ok(loaded, e.to_string())),
    }

    tracing::info!(
        "Opened {} at {:?}: {} records",
        descriptor,
        path,
        body / record_size
    );
    Ok(loaded)
}

fn not_ok(mut loaded: LoadedStore, reason: String) -> LoadedStore {
    tracing::warn!("Store not ok, {}", reason);
    loaded.not_ok = Some(reason);
    loaded
}

/// Rebuild the id file of a store from its records
///
/// Refuses on a read-only store unless this instance is a backup slave.
pub fn make_store_ok<F: RecordFormat>(
    path: &Path,
    file: &FileWithRecords,
    format: &F,
    config: &StoreConfig,
) -> Result<FileIdGenerator> {
    if config.read_only && !config.backup_slave {
        return Err(Error::read_only(format!(
            "{:?} is not ok and cannot be repaired read-only",
            path
        )));
    }
    let reserved = format.reserved_records();
    let in_use = |bytes: &[u8]| format.is_in_use(bytes);
    let rebuilt = if config.rebuild_idgenerators_fast {
        rebuild_fast(file, reserved, in_use)?
    } else {
        rebuild_full(file, reserved, in_use)?
    };
    let high_id = rebuilt.high_id.max(reserved);

    let ids_path = id_path(path);
    FileIdGenerator::create(&ids_path, high_id, &rebuilt.free_ids)?;
    let ids = FileIdGenerator::open(&ids_path, MAX_RECORD_ID, config.read_only)?;
    tracing::info!(
        "{} at {:?} is ok again: high id {}, {} free ids",
        format.type_descriptor(),
        path,
        high_id,
        ids.free_count()
    );
    Ok(ids)
}

/// Seal a store: cut the file at the high id, append the trailer, close ids
///
/// Only a store that is ok gets a trailer; otherwise it stays not ok for the
/// next open.
pub fn seal_store<F: RecordFormat>(
    file: &FileWithRecords,
    ids: Option<&FileIdGenerator>,
    format: &F,
) -> Result<()> {
    let Some(ids) = ids else {
        return Ok(());
    };
    if !file.is_read_only() {
        let end = ids.high_id() * format.record_size() as u64;
        file.set_len(end)?;
        file.write_bytes_at(end, trailer(format.type_descriptor()).as_bytes())?;
        file.force()?;
    }
    ids.close()?;
    tracing::info!(
        "Closed {} at {:?}: high id {}",
        format.type_descriptor(),
        file.path(),
        ids.high_id()
    );
    Ok(())
}
