//! Dynamic (overflow) records and chain allocation
//!
//! Values too large for their owning record are split into a chain of
//! fixed-size blocks. Each block is `BLOCK_HEADER_SIZE + block_size` bytes:
//!
//! ```text
//! u32 header   bit 31     set when NOT the first record of a chain
//!              bits 28-30 in use (value 1)
//!              bits 24-27 next_block[32..36]
//!              bits  0-23 data length
//! u32 next     next_block low word
//! [u8]         data, zero padded to block_size
//! ```
//!
//! Record 0 of every dynamic store is reserved and holds the block size.

use super::{
    check_len, check_pointer, finish_load, high_bits, long_from_int_and_mod, low_bits, LoadMode,
    Record, RecordFormat, NO_NEXT_BLOCK,
};
use crate::config::MAX_BLOCK_SIZE;
use crate::{Error, Result};
use bytes::{Buf, BufMut};
use std::collections::VecDeque;

/// Size of the header preceding the data of every dynamic record
pub const BLOCK_HEADER_SIZE: usize = 8;

const NOT_START_BIT: u32 = 0x8000_0000;
const IN_USE_BITS: u32 = 0x7000_0000;
const IN_USE_VALUE: u32 = 0x1000_0000;
const NEXT_MOD_BITS: u32 = 0x0F00_0000;
const LENGTH_BITS: u32 = 0x00FF_FFFF;

/// One block of a dynamic chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRecord {
    /// Record id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// First record of its chain
    pub start_record: bool,
    /// Next block of the chain, or [`NO_NEXT_BLOCK`]
    pub next_block: i64,
    /// Payload bytes held by this block
    pub data: Vec<u8>,
}

impl DynamicRecord {
    /// Create an unused record with the given id
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            start_record: true,
            next_block: NO_NEXT_BLOCK,
            data: Vec::new(),
        }
    }

    /// Payload length in bytes
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Release this block; its bytes are left as they are
    pub fn mark_unused(&mut self) {
        self.in_use = false;
    }
}

impl Record for DynamicRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }
}

/// Codec for one dynamic store
#[derive(Debug, Clone, Copy)]
pub struct DynamicRecordFormat {
    type_descriptor: &'static str,
    block_size: usize,
}

impl DynamicRecordFormat {
    /// Create a format for blocks holding `block_size` data bytes
    pub fn new(type_descriptor: &'static str, block_size: usize) -> Result<Self> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(Error::config(format!(
                "{} block size must be between 1 and {}, got {}",
                type_descriptor, MAX_BLOCK_SIZE, block_size
            )));
        }
        Ok(Self {
            type_descriptor,
            block_size,
        })
    }

    /// Data bytes per block
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl RecordFormat for DynamicRecordFormat {
    type Record = DynamicRecord;

    fn type_descriptor(&self) -> &'static str {
        self.type_descriptor
    }

    fn record_size(&self) -> usize {
        self.block_size + BLOCK_HEADER_SIZE
    }

    fn reserved_records(&self) -> u64 {
        1
    }

    fn header_record(&self) -> Option<Vec<u8>> {
        let mut record = vec![0u8; self.record_size()];
        record[..4].copy_from_slice(&(self.block_size as i32).to_be_bytes());
        Some(record)
    }

    fn is_in_use(&self, bytes: &[u8]) -> bool {
        bytes.first().is_some_and(|b| (b & 0x70) >> 4 == 1)
    }

    fn decode(&self, id: u64, bytes: &[u8], mode: LoadMode) -> Result<Option<DynamicRecord>> {
        let store = self.type_descriptor;
        check_len(store, id, bytes.len(), self.record_size())?;
        let mut buf = bytes;

        let header = buf.get_u32();
        let next = buf.get_u32();
        let in_use = (header & IN_USE_BITS) >> 28 == 1;
        let next_mod = ((header & NEXT_MOD_BITS) as u64) << 8;
        let length = (header & LENGTH_BITS) as usize;
        let next_block = long_from_int_and_mod(next, next_mod);

        if in_use && mode != LoadMode::Force {
            if length > self.block_size {
                return Err(Error::corrupt(
                    store,
                    id,
                    format!("length {} exceeds block size {}", length, self.block_size),
                ));
            }
            if next_block != NO_NEXT_BLOCK && length < self.block_size {
                return Err(Error::corrupt(
                    store,
                    id,
                    format!(
                        "length {} below block size {} with next block {}",
                        length, self.block_size, next_block
                    ),
                ));
            }
        }

        let data_len = if in_use || mode == LoadMode::Force {
            length.min(self.block_size)
        } else {
            0
        };
        let record = DynamicRecord {
            id,
            in_use,
            start_record: header & NOT_START_BIT == 0,
            next_block,
            data: buf[..data_len].to_vec(),
        };
        finish_load(store, record, mode)
    }

    fn encode(&self, record: &DynamicRecord, bytes: &mut [u8]) -> Result<()> {
        let store = self.type_descriptor;
        check_len(store, record.id, bytes.len(), self.record_size())?;
        if !record.in_use {
            bytes[0] = 0;
            return Ok(());
        }
        if record.length() > self.block_size {
            return Err(Error::corrupt(
                store,
                record.id,
                format!(
                    "length {} exceeds block size {}",
                    record.length(),
                    self.block_size
                ),
            ));
        }
        check_pointer(store, record.id, "next_block", record.next_block, 36)?;

        let next_mod = (high_bits(record.next_block, 0xF_0000_0000) >> 8) as u32;
        let mut header = IN_USE_VALUE | next_mod | record.length() as u32;
        if !record.start_record {
            header |= NOT_START_BIT;
        }

        let mut out = bytes;
        out.put_u32(header);
        out.put_u32(low_bits(record.next_block));
        out.put_slice(&record.data);
        out.fill(0);
        Ok(())
    }
}

/// Source of fresh dynamic records for a chain
pub trait DynamicRecordAllocator {
    /// Data bytes each record can hold
    fn data_size(&self) -> usize;

    /// Hand out a record with a freshly allocated id
    fn next_record(&mut self) -> Result<DynamicRecord>;
}

/// Allocator that hands back the records of an existing chain before
/// asking `fallback` for new ones
pub struct ReusingAllocator<'a> {
    reuse: VecDeque<DynamicRecord>,
    fallback: &'a mut dyn DynamicRecordAllocator,
}

impl<'a> ReusingAllocator<'a> {
    /// Reuse `existing` records in order, then draw from `fallback`
    pub fn new(existing: Vec<DynamicRecord>, fallback: &'a mut dyn DynamicRecordAllocator) -> Self {
        Self {
            reuse: existing.into(),
            fallback,
        }
    }

    /// Records that were not reused, marked not in use
    pub fn into_unused(self) -> Vec<DynamicRecord> {
        self.reuse
            .into_iter()
            .map(|mut r| {
                r.mark_unused();
                r
            })
            .collect()
    }
}

impl DynamicRecordAllocator for ReusingAllocator<'_> {
    fn data_size(&self) -> usize {
        self.fallback.data_size()
    }

    fn next_record(&mut self) -> Result<DynamicRecord> {
        match self.reuse.pop_front() {
            Some(record) => Ok(record),
            None => self.fallback.next_record(),
        }
    }
}

/// Split `payload` into a linked chain of records
///
/// The first record is the chain start; an empty payload yields a single
/// start record of length 0.
pub fn allocate_records_from_bytes(
    payload: &[u8],
    allocator: &mut dyn DynamicRecordAllocator,
) -> Result<Vec<DynamicRecord>> {
    let block_size = allocator.data_size();
    if block_size == 0 {
        return Err(Error::internal("dynamic allocator with zero data size"));
    }

    let mut chunks: Vec<&[u8]> = payload.chunks(block_size).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    let mut records: Vec<DynamicRecord> = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut record = allocator.next_record()?;
        record.in_use = true;
        record.start_record = i == 0;
        record.next_block = NO_NEXT_BLOCK;
        record.data = chunk.to_vec();
        if let Some(prev) = records.last_mut() {
            prev.next_block = record.id as i64;
        }
        records.push(record);
    }
    Ok(records)
}

/// Concatenate the data of a chain, stopping at the first record not in use
pub fn read_full_byte_array(records: &[DynamicRecord]) -> Vec<u8> {
    let total = records.iter().map(DynamicRecord::length).sum();
    let mut out = Vec::with_capacity(total);
    for record in records.iter().take_while(|r| r.in_use) {
        out.extend_from_slice(&record.data);
    }
    out
}
