//! Property store with its string, array and key token stores
//!
//! Strings and arrays do not fit a property block and are written to
//! dynamic chains; the block keeps a pointer to the first record. This
//! store is the only place those chains are allocated, written and freed.

use super::dynamic::DynamicStore;
use super::record_store::{ManagedStore, RecordStore};
use super::token::TokenStore;
use crate::config::StoreConfig;
use crate::record::{
    read_full_byte_array, PropertyBlock, PropertyRecord, PropertyRecordFormat, PropertyType,
    PropertyValue, TokenKind,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut};
use std::path::{Path, PathBuf};

/// Type descriptor of the property string store
pub const STRING_STORE: &str = "StringPropertyStore";

/// Type descriptor of the property array store
pub const ARRAY_STORE: &str = "ArrayPropertyStore";

/// Property records and the stores their values spill into
#[derive(Debug)]
pub struct PropertyStore {
    records: RecordStore<PropertyRecordFormat>,
    strings: DynamicStore,
    arrays: DynamicStore,
    keys: TokenStore,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl PropertyStore {
    /// Create an empty property store and its value and key stores
    pub fn create<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            strings: DynamicStore::create(
                with_suffix(path, ".strings"),
                STRING_STORE,
                config.string_block_size,
                config,
            )?,
            arrays: DynamicStore::create(
                with_suffix(path, ".arrays"),
                ARRAY_STORE,
                config.array_block_size,
                config,
            )?,
            keys: TokenStore::create(with_suffix(path, ".index"), TokenKind::PropertyKey, config)?,
            records: RecordStore::create(path, PropertyRecordFormat, config)?,
        })
    }

    /// Open a property store and its value and key stores
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            strings: DynamicStore::open(
                with_suffix(path, ".strings"),
                STRING_STORE,
                config.string_block_size,
                config,
            )?,
            arrays: DynamicStore::open(
                with_suffix(path, ".arrays"),
                ARRAY_STORE,
                config.array_block_size,
                config,
            )?,
            keys: TokenStore::open(with_suffix(path, ".index"), TokenKind::PropertyKey, config)?,
            records: RecordStore::open(path, PropertyRecordFormat, config)?,
        })
    }

    /// Property records
    pub fn records(&self) -> &RecordStore<PropertyRecordFormat> {
        &self.records
    }

    /// String value store
    pub fn strings(&self) -> &DynamicStore {
        &self.strings
    }

    /// Array value store
    pub fn arrays(&self) -> &DynamicStore {
        &self.arrays
    }

    /// Property key tokens
    pub fn keys(&self) -> &TokenStore {
        &self.keys
    }

    /// Every record store owned here
    pub fn stores(&self) -> Vec<&dyn ManagedStore> {
        let mut stores = vec![
            &self.records as &dyn ManagedStore,
            self.strings.records(),
            self.arrays.records(),
        ];
        stores.extend(self.keys.stores());
        stores
    }

    /// Encode a value for property key `key`
    ///
    /// Strings and arrays get a freshly allocated dynamic chain attached to
    /// the block; it is written by [`PropertyStore::update_record`].
    pub fn encode_value(&self, key: u32, value: &PropertyValue) -> Result<PropertyBlock> {
        if let Some(block) = PropertyBlock::inline(key, value)? {
            return Ok(block);
        }
        let (store, payload) = match value {
            PropertyValue::String(s) => (&self.strings, s.as_bytes().to_vec()),
            other => (&self.arrays, encode_array(other)?),
        };
        let records = store.allocate_records_from_bytes(&payload)?;
        let first = records
            .first()
            .map(|r| r.id)
            .ok_or_else(|| Error::internal("empty dynamic chain"))?;
        let mut block = PropertyBlock::dynamic(key, value.property_type(), first)?;
        block.value_records = records;
        Ok(block)
    }

    /// Decode the value of a block, reading its dynamic chain if needed
    pub fn get_value(&self, block: &PropertyBlock) -> Result<PropertyValue> {
        if let Some(value) = block.inline_value()? {
            return Ok(value);
        }
        let ty = self.dynamic_type(block)?;
        let bytes = if block.value_records.is_empty() {
            self.store_for(ty)
                .read_full_byte_array(block.single_value_long())?
        } else {
            read_full_byte_array(&block.value_records)
        };
        match ty {
            PropertyType::String => String::from_utf8(bytes)
                .map(PropertyValue::String)
                .map_err(|e| Error::invalid_property(format!("string value is not UTF-8: {}", e))),
            _ => decode_array(&bytes),
        }
    }

    /// Allocate a property record id
    pub fn next_id(&self) -> Result<u64> {
        self.records.next_id()
    }

    /// Load property record `id`
    pub fn get_record(&self, id: u64) -> Result<PropertyRecord> {
        self.records.load(id)
    }

    /// Write a property record and the dynamic records of its blocks
    ///
    /// Dynamic records marked not in use, both in live blocks and in
    /// `deleted_blocks`, get their ids freed. A record that is not in use
    /// frees its own id too.
    pub fn update_record(&self, record: &PropertyRecord) -> Result<()> {
        self.records.update(record)?;
        for block in record.blocks.iter().chain(&record.deleted_blocks) {
            if block.value_records.is_empty() {
                continue;
            }
            let ty = self.dynamic_type(block)?;
            self.store_for(ty).update_records(&block.value_records)?;
        }
        if !record.in_use {
            self.records.free_id(record.id)?;
        }
        Ok(())
    }

    /// Release the dynamic chain of a block's value
    ///
    /// Loads the chain if the block does not carry it yet and marks every
    /// record not in use; writing the owning record then frees them.
    pub fn remove_block_value(&self, block: &mut PropertyBlock) -> Result<()> {
        let Some(ty) = block.property_type().filter(|t| t.is_dynamic()) else {
            return Ok(());
        };
        if block.value_records.is_empty() {
            block.value_records = self.store_for(ty).get_records(block.single_value_long())?;
        }
        for record in &mut block.value_records {
            record.mark_unused();
        }
        Ok(())
    }

    /// Remove the property `key` from `record`, releasing its value
    ///
    /// The removed block is kept in `deleted_blocks` until the record is
    /// written. A record left without blocks is marked not in use.
    pub fn remove_property(&self, record: &mut PropertyRecord, key: u32) -> Result<bool> {
        let Some(mut block) = record.remove_block(key) else {
            return Ok(false);
        };
        self.remove_block_value(&mut block)?;
        record.deleted_blocks.push(block);
        if record.blocks.is_empty() {
            record.in_use = false;
        }
        Ok(true)
    }

    fn dynamic_type(&self, block: &PropertyBlock) -> Result<PropertyType> {
        match block.property_type() {
            Some(ty) if ty.is_dynamic() => Ok(ty),
            other => Err(Error::invalid_property(format!(
                "block type {:?} has no dynamic value",
                other
            ))),
        }
    }

    fn store_for(&self, ty: PropertyType) -> &DynamicStore {
        match ty {
            PropertyType::String => &self.strings,
            _ => &self.arrays,
        }
    }
}

/// Serialize an array value: element type id followed by big-endian elements
fn encode_array(value: &PropertyValue) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match value {
        PropertyValue::ByteArray(v) => {
            out.put_u8(PropertyType::Byte as u8);
            out.put_slice(v);
        }
        PropertyValue::IntArray(v) => {
            out.put_u8(PropertyType::Int as u8);
            v.iter().for_each(|x| out.put_i32(*x));
        }
        PropertyValue::LongArray(v) => {
            out.put_u8(PropertyType::Long as u8);
            v.iter().for_each(|x| out.put_i64(*x));
        }
        PropertyValue::DoubleArray(v) => {
            out.put_u8(PropertyType::Double as u8);
            v.iter().for_each(|x| out.put_f64(*x));
        }
        other => {
            return Err(Error::invalid_property(format!(
                "{:?} is not an array value",
                other.property_type()
            )));
        }
    }
    Ok(out)
}

fn decode_array(bytes: &[u8]) -> Result<PropertyValue> {
    let Some((&ty, mut body)) = bytes.split_first() else {
        return Err(Error::invalid_property("empty array value"));
    };
    let width = match PropertyType::from_id(ty) {
        Some(PropertyType::Byte) => 1,
        Some(PropertyType::Int) => 4,
        Some(PropertyType::Long) | Some(PropertyType::Double) => 8,
        _ => return Err(Error::invalid_property(format!("unknown array element type {}", ty))),
    };
    if body.len() % width != 0 {
        return Err(Error::invalid_property(format!(
            "array body of {} bytes is not a multiple of {}",
            body.len(),
            width
        )));
    }
    let count = body.len() / width;
    Ok(match PropertyType::from_id(ty) {
        Some(PropertyType::Byte) => PropertyValue::ByteArray(body.to_vec()),
        Some(PropertyType::Int) => PropertyValue::IntArray((0..count).map(|_| body.get_i32()).collect()),
        Some(PropertyType::Long) => PropertyValue::LongArray((0..count).map(|_| body.get_i64()).collect()),
        _ => PropertyValue::DoubleArray((0..count).map(|_| body.get_f64()).collect()),
    })
}
