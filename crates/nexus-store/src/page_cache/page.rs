//! Immutable page versions

use super::buffer::PageBuffer;
use crate::config::PageBacking;
use crate::file::FileWithRecords;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// A published view over `records` consecutive records
///
/// Once a page is reachable from its slot its bytes never change. Writes
/// build a new page through [`Page::with_record`] and swap it in.
#[derive(Debug)]
pub struct Page {
    index: u64,
    first_record: u64,
    records: usize,
    record_size: usize,
    buffer: PageBuffer,
    dirty: AtomicBool,
}

impl Page {
    /// Load page `index` of a file split into pages of `records_per_page`
    pub fn load(
        file: &FileWithRecords,
        backing: PageBacking,
        index: u64,
        records_per_page: usize,
    ) -> Result<Self> {
        let first_record = index * records_per_page as u64;
        let buffer = PageBuffer::load(file, backing, first_record, records_per_page)?;
        Ok(Self {
            index,
            first_record,
            records: records_per_page,
            record_size: file.record_size(),
            buffer,
            dirty: AtomicBool::new(false),
        })
    }

    /// Page index in the page table
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Resident bytes
    pub fn mem_size(&self) -> usize {
        self.buffer.len()
    }

    /// Modified since the last force
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Buffer backing this version
    pub fn buffer(&self) -> &PageBuffer {
        &self.buffer
    }

    fn offset_of(&self, id: u64) -> Result<usize> {
        if id < self.first_record || id >= self.first_record + self.records as u64 {
            return Err(Error::page_cache(format!(
                "record {} is outside page {} ({} records from {})",
                id, self.index, self.records, self.first_record
            )));
        }
        Ok((id - self.first_record) as usize * self.record_size)
    }

    /// Copy record `id` into `out`
    pub fn read_record(&self, id: u64, out: &mut [u8]) -> Result<()> {
        let offset = self.offset_of(id)?;
        out.copy_from_slice(&self.buffer.as_slice()[offset..offset + self.record_size]);
        Ok(())
    }

    /// New dirty version of this page with record `id` replaced by `bytes`
    pub fn with_record(&self, id: u64, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != self.record_size {
            return Err(Error::page_cache(format!(
                "record of {} bytes written to page of {} byte records",
                bytes.len(),
                self.record_size
            )));
        }
        let offset = self.offset_of(id)?;
        Ok(Self {
            index: self.index,
            first_record: self.first_record,
            records: self.records,
            record_size: self.record_size,
            buffer: self.buffer.with_write(offset, bytes),
            dirty: AtomicBool::new(true),
        })
    }

    /// Write this version to the file if it is dirty
    pub fn force(&self, file: &FileWithRecords) -> Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            let offset = self.first_record * self.record_size as u64;
            if let Err(e) = self.buffer.force(file, offset) {
                self.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}
