//! A named store: record file, page cache and id generator together

use super::loader::{self, LoadState};
use crate::config::StoreConfig;
use crate::id_generator::{FileIdGenerator, IdGenerator};
use crate::page_cache::PagedFileWithRecords;
use crate::record::{LoadMode, Record, RecordFormat};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Status {
    state: LoadState,
    ids: Option<FileIdGenerator>,
    not_ok: Option<String>,
}

/// Fixed-size record store
///
/// Record access goes through the page cache and needs no lock of its own;
/// the id generator synchronises itself. A store that was not closed
/// cleanly opens "not ok" and refuses access until [`RecordStore::make_store_ok`]
/// has rebuilt its ids. Dropping a store without [`RecordStore::close`]
/// leaves it to that recovery on the next open.
#[derive(Debug)]
pub struct RecordStore<F: RecordFormat> {
    format: F,
    path: PathBuf,
    config: StoreConfig,
    paged: Arc<PagedFileWithRecords>,
    status: RwLock<Status>,
    closed: AtomicBool,
}

impl<F: RecordFormat> RecordStore<F> {
    /// Create an empty store at `path` and open it
    pub fn create<P: AsRef<Path>>(path: P, format: F, config: &StoreConfig) -> Result<Self> {
        loader::create_empty_store(path.as_ref(), &format)?;
        Self::open(path, format, config)
    }

    /// Open an existing store
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, locked by another process or needs
    /// migration. A store that merely failed verification opens not ok.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nexus_store::config::StoreConfig;
    /// use nexus_store::record::NodeRecordFormat;
    /// use nexus_store::store::RecordStore;
    ///
    /// let config = StoreConfig::default();
    /// let nodes = RecordStore::open("./data/neostore.nodestore.db", NodeRecordFormat, &config).unwrap();
    /// if !nodes.is_ok() {
    ///     nodes.make_store_ok().unwrap();
    /// }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, format: F, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let loaded = loader::load_store(&path, &format, config)?;
        let file = Arc::new(loaded.file);
        let paged = Arc::new(PagedFileWithRecords::new(file, format.type_descriptor(), config)?);
        let state = if loaded.ids.is_some() {
            LoadState::Ready
        } else {
            loaded.state
        };

        Ok(Self {
            format,
            path,
            config: config.clone(),
            paged,
            status: RwLock::new(Status {
                state,
                ids: loaded.ids,
                not_ok: loaded.not_ok,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Record codec
    pub fn format(&self) -> &F {
        &self.format
    }

    /// Store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Type descriptor, e.g. `NodeStore`
    pub fn type_descriptor(&self) -> &'static str {
        self.format.type_descriptor()
    }

    /// Record size in bytes
    pub fn record_size(&self) -> usize {
        self.format.record_size()
    }

    /// Page cache over the store file
    pub fn paged_file(&self) -> &Arc<PagedFileWithRecords> {
        &self.paged
    }

    /// Loader progress
    pub fn load_state(&self) -> LoadState {
        self.status.read().state
    }

    /// Whether the store passed verification (or was repaired)
    pub fn is_ok(&self) -> bool {
        self.status.read().not_ok.is_none()
    }

    /// Why the store is not ok
    pub fn not_ok_reason(&self) -> Option<String> {
        self.status.read().not_ok.clone()
    }

    /// Rebuild the id generator of a store that is not ok
    ///
    /// A no-op on a store that is ok. Read-only stores are only repaired on
    /// a backup slave.
    pub fn make_store_ok(&self) -> Result<()> {
        let mut status = self.status.write();
        if status.not_ok.is_none() {
            return Ok(());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::not_ok(format!("{} is closed", self.type_descriptor())));
        }
        let ids = loader::make_store_ok(&self.path, self.paged.file(), &self.format, &self.config)?;
        status.ids = Some(ids);
        status.not_ok = None;
        status.state = LoadState::Ready;
        Ok(())
    }

    /// Copy raw record `id` into `out`
    pub fn get_record(&self, id: u64, out: &mut [u8]) -> Result<()> {
        self.with_ids(|_| Ok(()))?;
        self.paged.get_record(id, out)
    }

    /// Write raw record `id`, raising the high id past it
    pub fn write_record(&self, id: u64, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.with_ids(|ids| {
            self.paged.write_record(id, bytes)?;
            ids.ensure_high_id(id);
            Ok(())
        })
    }

    /// Load record `id`
    ///
    /// Ids at or above the high id read as an unused record.
    pub fn get(&self, id: u64, mode: LoadMode) -> Result<Option<F::Record>> {
        let mut buf = vec![0u8; self.record_size()];
        if id < self.high_id()? {
            self.get_record(id, &mut buf)?;
        }
        self.format.decode(id, &buf, mode)
    }

    /// Load record `id`, failing if it is not in use
    pub fn load(&self, id: u64) -> Result<F::Record> {
        self.get(id, LoadMode::Normal)?.ok_or(Error::InvalidRecord {
            store: self.type_descriptor(),
            id,
        })
    }

    /// Encode and write a record
    ///
    /// A record marked not in use only has its in-use bits cleared; the
    /// rest of the slot keeps its bytes.
    pub fn update(&self, record: &F::Record) -> Result<()> {
        let mut buf = vec![0u8; self.record_size()];
        if !record.in_use() && record.id() < self.high_id()? {
            self.get_record(record.id(), &mut buf)?;
        }
        self.format.encode(record, &mut buf)?;
        self.write_record(record.id(), &buf)
    }

    /// Allocate a record id
    pub fn next_id(&self) -> Result<u64> {
        self.check_writable()?;
        self.with_ids(|ids| ids.next_id())
    }

    /// Return a record id for reuse
    pub fn free_id(&self, id: u64) -> Result<()> {
        self.check_writable()?;
        self.with_ids(|ids| ids.free_id(id))
    }

    /// One past the highest id handed out
    pub fn high_id(&self) -> Result<u64> {
        self.with_ids(|ids| Ok(ids.high_id()))
    }

    /// Move the high id
    pub fn set_high_id(&self, id: u64) -> Result<()> {
        self.with_ids(|ids| {
            ids.set_high_id(id);
            Ok(())
        })
    }

    /// Highest id that may be in use, `-1` for an empty store
    pub fn highest_possible_id_in_use(&self) -> Result<i64> {
        Ok(self.high_id()? as i64 - 1)
    }

    /// Ids waiting for reuse
    pub fn free_id_count(&self) -> Result<usize> {
        self.with_ids(|ids| Ok(ids.free_count()))
    }

    /// Write out dirty pages and flush the file
    pub fn force(&self) -> Result<()> {
        self.paged.force()
    }

    /// Flush, seal and unlock the store
    ///
    /// A store that is ok gets its trailer; one that is not stays not ok for
    /// the next open. Later record access fails.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut status = self.status.write();
        self.paged.close()?;
        let ids = status.ids.take();
        loader::seal_store(self.paged.file(), ids.as_ref(), &self.format)?;
        if !self.config.read_only {
            self.paged.file().unlock()?;
        }
        if status.not_ok.is_none() {
            status.not_ok = Some(format!("{} is closed", self.type_descriptor()));
        }
        Ok(())
    }

    fn with_ids<T>(&self, f: impl FnOnce(&FileIdGenerator) -> Result<T>) -> Result<T> {
        let status = self.status.read();
        match (&status.ids, &status.not_ok) {
            (Some(ids), None) => f(ids),
            (_, Some(reason)) => Err(Error::not_ok(reason.clone())),
            (None, None) => Err(Error::internal(format!(
                "{} has no id generator",
                self.type_descriptor()
            ))),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(Error::read_only(format!("{:?} is read-only", self.path)));
        }
        Ok(())
    }
}

/// Lifecycle of a store regardless of its record type
pub trait ManagedStore: Send + Sync {
    /// Type descriptor, e.g. `NodeStore`
    fn type_descriptor(&self) -> &'static str;
    /// Whether the store passed verification
    fn is_ok(&self) -> bool;
    /// Rebuild a store that is not ok
    fn make_store_ok(&self) -> Result<()>;
    /// Write out dirty pages and flush
    fn force(&self) -> Result<()>;
    /// Flush, seal and unlock
    fn close(&self) -> Result<()>;
    /// Page cache to register with the sweeper
    fn paged_file(&self) -> Arc<PagedFileWithRecords>;
}

impl<F: RecordFormat> ManagedStore for RecordStore<F> {
    fn type_descriptor(&self) -> &'static str {
        RecordStore::type_descriptor(self)
    }

    fn is_ok(&self) -> bool {
        RecordStore::is_ok(self)
    }

    fn make_store_ok(&self) -> Result<()> {
        RecordStore::make_store_ok(self)
    }

    fn force(&self) -> Result<()> {
        RecordStore::force(self)
    }

    fn close(&self) -> Result<()> {
        RecordStore::close(self)
    }

    fn paged_file(&self) -> Arc<PagedFileWithRecords> {
        self.paged.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NodeRecord, NodeRecordFormat};
    use tempfile::TempDir;

    fn config() -> StoreConfig {
        StoreConfig::default().with_page_target_size(15 * 8)
    }

    #[test]
    fn test_update_and_load() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(dir.path().join("n.db"), NodeRecordFormat, &config()).unwrap();

        let id = store.next_id().unwrap();
        let mut node = NodeRecord::new(id);
        node.in_use = true;
        node.next_rel = 42;
        store.update(&node).unwrap();

        let loaded = store.load(id).unwrap();
        assert_eq!(loaded.next_rel, 42);
        assert_eq!(store.highest_possible_id_in_use().unwrap(), 0);
    }

    #[test]
    fn test_load_past_high_id() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(dir.path().join("n.db"), NodeRecordFormat, &config()).unwrap();
        assert_eq!(store.highest_possible_id_in_use().unwrap(), -1);
        assert!(matches!(store.load(7), Err(Error::InvalidRecord { id: 7, .. })));
        assert!(store.get(7, LoadMode::Check).unwrap().is_none());
        assert!(!store.get(7, LoadMode::Force).unwrap().unwrap().in_use);
    }

    #[test]
    fn test_delete_keeps_slot_bytes() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(dir.path().join("n.db"), NodeRecordFormat, &config()).unwrap();
        let id = store.next_id().unwrap();
        let mut node = NodeRecord::new(id);
        node.in_use = true;
        node.next_prop = 9;
        store.update(&node).unwrap();

        node.in_use = false;
        store.update(&node).unwrap();
        store.free_id(id).unwrap();

        let forced = store.get(id, LoadMode::Force).unwrap().unwrap();
        assert!(!forced.in_use);
        assert_eq!(forced.next_prop, 9);
        assert_eq!(store.next_id().unwrap(), id);
    }

    #[test]
    fn test_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n.db");
        {
            let store = RecordStore::create(&path, NodeRecordFormat, &config()).unwrap();
            for _ in 0..20 {
                let mut node = NodeRecord::new(store.next_id().unwrap());
                node.in_use = true;
                store.update(&node).unwrap();
            }
            store.free_id(3).unwrap();
            store.close().unwrap();
            assert!(matches!(store.next_id(), Err(Error::StoreNotOk(_))));
        }
        let store = RecordStore::open(&path, NodeRecordFormat, &config()).unwrap();
        assert!(store.is_ok());
        assert_eq!(store.load_state(), LoadState::Ready);
        assert_eq!(store.high_id().unwrap(), 20);
        assert_eq!(store.free_id_count().unwrap(), 1);
        assert!(store.load(19).unwrap().in_use);
    }

    #[test]
    fn test_unclean_shutdown_needs_repair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n.db");
        {
            let store = RecordStore::create(&path, NodeRecordFormat, &config()).unwrap();
            for _ in 0..5 {
                let mut node = NodeRecord::new(store.next_id().unwrap());
                node.in_use = true;
                store.update(&node).unwrap();
            }
            store.force().unwrap();
        }

        let store = RecordStore::open(&path, NodeRecordFormat, &config()).unwrap();
        assert!(!store.is_ok());
        assert!(matches!(store.load(0), Err(Error::StoreNotOk(_))));
        store.make_store_ok().unwrap();
        assert_eq!(store.high_id().unwrap(), 5);
        assert!(store.load(4).unwrap().in_use);
    }

    #[test]
    fn test_read_only_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n.db");
        {
            let store = RecordStore::create(&path, NodeRecordFormat, &config()).unwrap();
            let mut node = NodeRecord::new(store.next_id().unwrap());
            node.in_use = true;
            store.update(&node).unwrap();
            store.close().unwrap();
        }
        let ro = config().with_read_only(true);
        let store = RecordStore::open(&path, NodeRecordFormat, &ro).unwrap();
        assert!(store.load(0).unwrap().in_use);
        assert!(matches!(store.next_id(), Err(Error::ReadOnly(_))));
        assert!(matches!(store.update(&NodeRecord::new(0)), Err(Error::ReadOnly(_))));
    }
}
