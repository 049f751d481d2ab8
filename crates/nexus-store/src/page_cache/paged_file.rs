//! Paged access to a [`FileWithRecords`]
//!
//! The file is split into pages of `records_per_page` records. Each page
//! slot is either unallocated, in which case record access goes straight to
//! the file, or holds an immutable [`Page`] published through a
//! [`PageElement`]. Writers build a new page version and swap it in; readers
//! re-validate that the page they read from is still current.
//!
//! Every slot has an I/O lock. Direct file access for an unallocated slot,
//! page allocation and eviction all take it, so a page is never loaded while
//! a direct write to its region is in flight and no direct write happens
//! while a page for the region is resident.

use super::element::{new_element, PageElement};
use super::hit_counter::HitCounter;
use super::page::Page;
use super::PageCacheStats;
use crate::config::{PageBacking, PageSync, StoreConfig};
use crate::file::FileWithRecords;
use crate::{Error, Result};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct PageSlot {
    element: Box<dyn PageElement>,
    io: RwLock<()>,
    hits: HitCounter,
}

impl PageSlot {
    fn new(sync: PageSync) -> Self {
        Self {
            element: new_element(sync),
            io: RwLock::new(()),
            hits: HitCounter::new(),
        }
    }
}

/// Record file with a page cache in front of it
#[derive(Debug)]
pub struct PagedFileWithRecords {
    file: Arc<FileWithRecords>,
    name: String,
    records_per_page: usize,
    backing: PageBacking,
    sync: PageSync,
    table: ArcSwap<Vec<Arc<PageSlot>>>,
    /// Serializes table growth against reads beyond the table
    tail: RwLock<()>,
    grow: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    mem_usage: AtomicU64,
    closed: AtomicBool,
}

impl PagedFileWithRecords {
    /// Put a page cache in front of `file`
    pub fn new(file: Arc<FileWithRecords>, name: impl Into<String>, config: &StoreConfig) -> Result<Self> {
        let records_per_page = (config.page_target_size / file.record_size()).max(1);
        let records = file.size()?.div_ceil(file.record_size() as u64);
        let pages = records.div_ceil(records_per_page as u64) as usize;
        let table = (0..pages)
            .map(|_| Arc::new(PageSlot::new(config.page_sync)))
            .collect();

        Ok(Self {
            file,
            name: name.into(),
            records_per_page,
            backing: config.page_backing,
            sync: config.page_sync,
            table: ArcSwap::from_pointee(table),
            tail: RwLock::new(()),
            grow: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            mem_usage: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Underlying file
    pub fn file(&self) -> &Arc<FileWithRecords> {
        &self.file
    }

    /// Store name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record size in bytes
    pub fn record_size(&self) -> usize {
        self.file.record_size()
    }

    /// Records per page
    pub fn records_per_page(&self) -> usize {
        self.records_per_page
    }

    /// Bytes per page
    pub fn page_bytes(&self) -> u64 {
        (self.records_per_page * self.file.record_size()) as u64
    }

    /// Slots in the page table
    pub fn page_count(&self) -> usize {
        self.table.load().len()
    }

    /// Bytes covered by the page table
    pub fn total_size(&self) -> u64 {
        self.page_count() as u64 * self.page_bytes()
    }

    /// Whether page `index` is resident
    pub fn is_allocated(&self, index: usize) -> bool {
        self.slot(index).is_some_and(|s| s.element.get().is_some())
    }

    fn slot(&self, index: usize) -> Option<Arc<PageSlot>> {
        self.table.load().get(index).cloned()
    }

    fn page_of(&self, id: u64) -> usize {
        (id / self.records_per_page as u64) as usize
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::page_cache(format!("{} is closed", self.name)));
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.record_size() {
            return Err(Error::page_cache(format!(
                "{}: buffer of {} bytes for {} byte records",
                self.name,
                len,
                self.record_size()
            )));
        }
        Ok(())
    }

    /// Copy record `id` into `out`
    pub fn get_record(&self, id: u64, out: &mut [u8]) -> Result<()> {
        self.check_open()?;
        self.check_len(out.len())?;
        let index = self.page_of(id);

        let slot = loop {
            if let Some(slot) = self.slot(index) {
                break slot;
            }
            let _tail = self.tail.read();
            if index < self.page_count() {
                continue;
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return self.file.read_into(id, out);
        };

        loop {
            if let Some(page) = slot.element.get() {
                page.read_record(id, out)?;
                if slot.element.still_current(&page) {
                    slot.hits.record(true);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                tracing::trace!("{}: page {} replaced during read of {}, retrying", self.name, index, id);
                continue;
            }

            let _io = slot.io.read();
            if slot.element.get().is_some() {
                continue;
            }
            slot.hits.record(false);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return self.file.read_into(id, out);
        }
    }

    /// Read record `id` into a new buffer
    pub fn read_record(&self, id: u64) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.record_size()];
        self.get_record(id, &mut out)?;
        Ok(out)
    }

    /// Write record `id`
    ///
    /// Writes beyond the page table grow it first. If building the new page
    /// version fails nothing is published.
    pub fn write_record(&self, id: u64, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        self.check_len(bytes.len())?;
        if self.file.is_read_only() {
            return Err(Error::read_only(format!("{} is read-only", self.name)));
        }
        let index = self.page_of(id);
        if index >= self.page_count() {
            self.grow(index + 1);
        }
        let slot = self
            .slot(index)
            .ok_or_else(|| Error::internal(format!("{}: page {} missing after grow", self.name, index)))?;

        loop {
            // unsync elements store without comparing; keep eviction out
            let evict_guard = (self.sync == PageSync::NoSync).then(|| slot.io.read());
            if let Some(current) = slot.element.get() {
                let next = Arc::new(current.with_record(id, bytes)?);
                if slot.element.compare_and_set(&Some(current), Some(next)) {
                    slot.hits.record(true);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                tracing::trace!("{}: lost page {} swap writing {}, retrying", self.name, index, id);
                continue;
            }
            drop(evict_guard);

            let _io = slot.io.write();
            if slot.element.get().is_some() {
                continue;
            }
            slot.hits.record(false);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return self.file.write(id, bytes);
        }
    }

    /// Grow the page table to at least `pages` slots
    pub fn grow(&self, pages: usize) {
        let _grow = self.grow.lock();
        let current = self.table.load_full();
        if current.len() >= pages {
            return;
        }
        let _tail = self.tail.write();
        let mut table = Vec::with_capacity(pages);
        table.extend(current.iter().cloned());
        table.extend((current.len()..pages).map(|_| Arc::new(PageSlot::new(self.sync))));
        self.table.store(Arc::new(table));
        tracing::debug!("{}: page table grown from {} to {} pages", self.name, current.len(), pages);
    }

    /// Load page `index` into memory; `false` if it already was
    pub fn allocate_page(&self, index: usize) -> Result<bool> {
        self.check_open()?;
        let Some(slot) = self.slot(index) else {
            return Ok(false);
        };
        let _io = slot.io.write();
        if slot.element.get().is_some() {
            return Ok(false);
        }
        let page = Page::load(&self.file, self.backing, index as u64, self.records_per_page)?;
        let size = page.mem_size() as u64;
        let kind = page.buffer().kind();
        if !slot.element.compare_and_set(&None, Some(Arc::new(page))) {
            return Err(Error::page_cache(format!(
                "{}: page {} published while its I/O lock was held",
                self.name, index
            )));
        }
        self.mem_usage.fetch_add(size, Ordering::Relaxed);
        tracing::debug!("{}: allocated {} page {} ({} bytes)", self.name, kind, index, size);
        Ok(true)
    }

    /// Force and drop page `index`; `false` if it was not resident
    pub fn free_page(&self, index: usize) -> Result<bool> {
        let Some(slot) = self.slot(index) else {
            return Ok(false);
        };
        let _io = slot.io.write();
        let Some(current) = slot.element.get() else {
            return Ok(false);
        };
        current.force(&self.file)?;
        let removed = loop {
            let latest = slot.element.get();
            if slot.element.compare_and_set(&latest, None) {
                break latest;
            }
            tracing::trace!("{}: page {} replaced during eviction, retrying", self.name, index);
        };
        // a writer may have published a newer version after the first force
        if let Some(removed) = removed {
            if !Arc::ptr_eq(&removed, &current) {
                removed.force(&self.file)?;
            }
            self.mem_usage.fetch_sub(removed.mem_size() as u64, Ordering::Relaxed);
        }
        tracing::debug!("{}: freed page {}", self.name, index);
        Ok(true)
    }

    /// Allocate the most accessed unallocated pages until `bytes` are granted
    pub fn allocate(&self, bytes: u64) -> Result<u64> {
        let table = self.table.load_full();
        let mut candidates: Vec<(usize, i32)> = table
            .iter()
            .enumerate()
            .filter(|(_, s)| s.element.get().is_none() && s.hits.get() > 0)
            .map(|(i, s)| (i, s.hits.get()))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut granted = 0;
        for (index, _) in candidates {
            if granted >= bytes {
                break;
            }
            if self.allocate_page(index)? {
                granted += self.page_bytes();
            }
        }
        Ok(granted)
    }

    /// Free the least accessed resident pages until `bytes` are released
    pub fn free(&self, bytes: u64) -> Result<u64> {
        let table = self.table.load_full();
        let mut candidates: Vec<(usize, i32)> = table
            .iter()
            .enumerate()
            .filter(|(_, s)| s.element.get().is_some())
            .map(|(i, s)| (i, s.hits.get()))
            .collect();
        candidates.sort_by_key(|(_, hits)| *hits);

        let mut freed = 0;
        for (index, _) in candidates {
            if freed >= bytes {
                break;
            }
            if self.free_page(index)? {
                freed += self.page_bytes();
            }
        }
        Ok(freed)
    }

    /// Write every dirty resident page to the file
    ///
    /// Each page is forced under its slot's I/O lock, so flushes and
    /// evictions of one slot reach the file in version order.
    pub fn write_out_dirty_pages(&self) -> Result<usize> {
        let table = self.table.load_full();
        let mut written = 0;
        for slot in table.iter() {
            let _io = slot.io.write();
            if let Some(page) = slot.element.get() {
                if page.is_dirty() {
                    page.force(&self.file)?;
                    written += 1;
                }
            }
        }
        if written > 0 {
            tracing::debug!("{}: wrote out {} dirty pages", self.name, written);
        }
        Ok(written)
    }

    /// Write out dirty pages and flush the file
    pub fn force(&self) -> Result<()> {
        self.write_out_dirty_pages()?;
        self.file.force()
    }

    /// Age every hit counter
    pub fn decay_hit_counters(&self) {
        for slot in self.table.load().iter() {
            slot.hits.decay(slot.element.get().is_some());
        }
    }

    /// Aggregate counters for the sweeper
    pub fn stats(&self) -> PageCacheStats {
        let page_bytes = self.page_bytes();
        let mem_needed = self
            .table
            .load()
            .iter()
            .filter(|s| s.element.get().is_none() && s.hits.get() > 0)
            .count() as u64
            * page_bytes;
        PageCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            mem_usage: self.mem_usage.load(Ordering::Relaxed),
            mem_needed,
        }
    }

    /// Force and evict every page, then flush the file
    ///
    /// Further record access fails.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let table = self.table.load_full();
        for index in 0..table.len() {
            self.free_page(index)?;
        }
        self.file.force()
    }
}
