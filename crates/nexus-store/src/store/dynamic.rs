//! Stores of linked dynamic blocks (strings, arrays, names, label overflow)

use super::record_store::RecordStore;
use crate::config::StoreConfig;
use crate::file::FileWithRecords;
use crate::record::{
    allocate_records_from_bytes, read_full_byte_array, DynamicRecord, DynamicRecordAllocator,
    DynamicRecordFormat, LoadMode, ReusingAllocator, NO_NEXT_BLOCK,
};
use crate::{Error, Result};
use std::path::Path;

/// Dynamic store: payloads split over chains of fixed-size blocks
///
/// Record 0 holds the block size the store was created with; it wins over
/// the configured size when the store is reopened.
#[derive(Debug)]
pub struct DynamicStore {
    store: RecordStore<DynamicRecordFormat>,
}

/// Allocator drawing fresh ids from a dynamic store
struct StoreAllocator<'a> {
    store: &'a RecordStore<DynamicRecordFormat>,
}

impl DynamicRecordAllocator for StoreAllocator<'_> {
    fn data_size(&self) -> usize {
        self.store.format().block_size()
    }

    fn next_record(&mut self) -> Result<DynamicRecord> {
        Ok(DynamicRecord::new(self.store.next_id()?))
    }
}

impl DynamicStore {
    /// Create an empty dynamic store
    pub fn create<P: AsRef<Path>>(
        path: P,
        descriptor: &'static str,
        block_size: usize,
        config: &StoreConfig,
    ) -> Result<Self> {
        let format = DynamicRecordFormat::new(descriptor, block_size)?;
        Ok(Self {
            store: RecordStore::create(path, format, config)?,
        })
    }

    /// Open a dynamic store, taking its block size from record 0
    ///
    /// `default_block_size` is used when record 0 cannot be read.
    pub fn open<P: AsRef<Path>>(
        path: P,
        descriptor: &'static str,
        default_block_size: usize,
        config: &StoreConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let block_size = stored_block_size(path)?.unwrap_or(default_block_size);
        if block_size != default_block_size {
            tracing::debug!(
                "{} at {:?} keeps block size {} (configured {})",
                descriptor,
                path,
                block_size,
                default_block_size
            );
        }
        let format = DynamicRecordFormat::new(descriptor, block_size)?;
        Ok(Self {
            store: RecordStore::open(path, format, config)?,
        })
    }

    /// Underlying record store
    pub fn records(&self) -> &RecordStore<DynamicRecordFormat> {
        &self.store
    }

    /// Payload bytes per block
    pub fn block_size(&self) -> usize {
        self.store.format().block_size()
    }

    /// Split `payload` into a chain of newly allocated records
    ///
    /// Nothing is written; pass the chain to [`DynamicStore::update_records`].
    pub fn allocate_records_from_bytes(&self, payload: &[u8]) -> Result<Vec<DynamicRecord>> {
        let mut allocator = StoreAllocator { store: &self.store };
        allocate_records_from_bytes(payload, &mut allocator)
    }

    /// Re-encode `payload` into an existing chain
    ///
    /// Records of `existing` are reused in order; extra records come from the
    /// store. Records left over are appended marked not in use, so writing the
    /// result frees them.
    pub fn allocate_records_reusing(
        &self,
        payload: &[u8],
        existing: Vec<DynamicRecord>,
    ) -> Result<Vec<DynamicRecord>> {
        let mut fallback = StoreAllocator { store: &self.store };
        let mut allocator = ReusingAllocator::new(existing, &mut fallback);
        let mut records = allocate_records_from_bytes(payload, &mut allocator)?;
        records.extend(allocator.into_unused());
        Ok(records)
    }

    /// Load the chain starting at `start`
    ///
    /// Stops without error at a record that is not in use.
    pub fn get_records(&self, start: u64) -> Result<Vec<DynamicRecord>> {
        let high_id = self.store.high_id()?;
        let mut records = Vec::new();
        let mut next = start as i64;
        while next != NO_NEXT_BLOCK {
            if records.len() as u64 >= high_id {
                return Err(Error::corrupt(
                    self.store.type_descriptor(),
                    start,
                    "dynamic chain does not terminate",
                ));
            }
            let Some(record) = self.store.get(next as u64, LoadMode::Check)? else {
                break;
            };
            next = record.next_block;
            records.push(record);
        }
        Ok(records)
    }

    /// Payload of the chain starting at `start`
    pub fn read_full_byte_array(&self, start: u64) -> Result<Vec<u8>> {
        Ok(read_full_byte_array(&self.get_records(start)?))
    }

    /// Write a chain; ids of records marked not in use are freed
    pub fn update_records(&self, records: &[DynamicRecord]) -> Result<()> {
        for record in records {
            self.store.update(record)?;
            if !record.in_use {
                self.store.free_id(record.id)?;
            }
        }
        Ok(())
    }

    /// Allocate and write a chain for `payload`, returning its first id
    pub fn store_bytes(&self, payload: &[u8]) -> Result<u64> {
        let records = self.allocate_records_from_bytes(payload)?;
        self.update_records(&records)?;
        records
            .first()
            .map(|r| r.id)
            .ok_or_else(|| Error::internal("empty dynamic chain"))
    }

    /// Mark the chain starting at `start` not in use and free its ids
    pub fn delete_chain(&self, start: u64) -> Result<()> {
        let mut records = self.get_records(start)?;
        for record in &mut records {
            record.mark_unused();
        }
        self.update_records(&records)
    }
}

/// Block size recorded in record 0, if the file has one
fn stored_block_size(path: &Path) -> Result<Option<usize>> {
    let file = FileWithRecords::open(path, 1, true)?;
    let mut header = [0u8; 4];
    if file.read_bytes_at(0, &mut header)? < header.len() {
        return Ok(None);
    }
    let size = i32::from_be_bytes(header);
    Ok((size > 0).then_some(size as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create(dir: &TempDir, block_size: usize) -> DynamicStore {
        DynamicStore::create(
            dir.path().join("strings.db"),
            "StringPropertyStore",
            block_size,
            &StoreConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_store_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = create(&dir, 30);
        let payload: Vec<u8> = (0..95).collect();
        let first = store.store_bytes(&payload).unwrap();
        assert_eq!(first, 1);
        assert_eq!(store.get_records(first).unwrap().len(), 4);
        assert_eq!(store.read_full_byte_array(first).unwrap(), payload);
    }

    #[test]
    fn test_reuse_shrinks_and_frees() {
        let dir = TempDir::new().unwrap();
        let store = create(&dir, 10);
        let first = store.store_bytes(&[7u8; 45]).unwrap();
        let existing = store.get_records(first).unwrap();
        assert_eq!(existing.len(), 5);

        let records = store.allocate_records_reusing(&[8u8; 12], existing).unwrap();
        assert_eq!(records.iter().filter(|r| r.in_use).count(), 2);
        assert_eq!(records.len(), 5);
        store.update_records(&records).unwrap();

        assert_eq!(store.read_full_byte_array(first).unwrap(), vec![8u8; 12]);
        assert_eq!(store.records().free_id_count().unwrap(), 3);
    }

    #[test]
    fn test_reuse_grows_from_store() {
        let dir = TempDir::new().unwrap();
        let store = create(&dir, 10);
        let first = store.store_bytes(&[1u8; 5]).unwrap();
        let existing = store.get_records(first).unwrap();
        let records = store.allocate_records_reusing(&[2u8; 25], existing).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, first);
        store.update_records(&records).unwrap();
        assert_eq!(store.read_full_byte_array(first).unwrap(), vec![2u8; 25]);
    }

    #[test]
    fn test_read_stops_at_unused_record() {
        let dir = TempDir::new().unwrap();
        let store = create(&dir, 10);
        let first = store.store_bytes(&[3u8; 25]).unwrap();
        let mut records = store.get_records(first).unwrap();
        records[1].mark_unused();
        store.records().update(&records[1]).unwrap();
        assert_eq!(store.read_full_byte_array(first).unwrap(), vec![3u8; 10]);
    }

    #[test]
    fn test_delete_chain() {
        let dir = TempDir::new().unwrap();
        let store = create(&dir, 10);
        let first = store.store_bytes(&[4u8; 30]).unwrap();
        store.delete_chain(first).unwrap();
        assert!(store.get_records(first).unwrap().is_empty());
        assert_eq!(store.records().free_id_count().unwrap(), 3);
    }

    #[test]
    fn test_reopen_keeps_stored_block_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strings.db");
        let first = {
            let store =
                DynamicStore::create(&path, "StringPropertyStore", 30, &StoreConfig::default()).unwrap();
            let first = store.store_bytes(&[5u8; 31]).unwrap();
            store.records().close().unwrap();
            first
        };
        let store = DynamicStore::open(&path, "StringPropertyStore", 120, &StoreConfig::default()).unwrap();
        assert_eq!(store.block_size(), 30);
        assert_eq!(store.read_full_byte_array(first).unwrap(), vec![5u8; 31]);
    }
}
