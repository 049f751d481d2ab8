//! Binary record codecs
//!
//! Every store persists fixed-size records. A [`RecordFormat`] maps between
//! the raw slot bytes and a typed record without doing any I/O.
//!
//! Pointers are 64-bit in memory but only 32 bits are stored as a plain
//! field; the remaining high bits ("modifier" bits) are packed into unused
//! bits of the record's header byte(s). The all-ones low word combined with
//! zero modifier bits always decodes to `-1` (no next / no previous record).
//!
//! All multi-byte values are big-endian.

pub mod dynamic;
pub mod node;
pub mod property;
pub mod relationship;
pub mod token;

pub use dynamic::{
    allocate_records_from_bytes, read_full_byte_array, DynamicRecord, DynamicRecordAllocator,
    DynamicRecordFormat, ReusingAllocator, BLOCK_HEADER_SIZE,
};
pub use node::{NodeRecord, NodeRecordFormat};
pub use property::{
    PropertyBlock, PropertyRecord, PropertyRecordFormat, PropertyType, PropertyValue,
    PAYLOAD_SIZE,
};
pub use relationship::{RelationshipRecord, RelationshipRecordFormat};
pub use token::{TokenKind, TokenRecord, TokenRecordFormat};

use crate::{Error, Result};
use std::fmt::Debug;

/// Sentinel for "no next record" in a chain
pub const NO_NEXT_RECORD: i64 = -1;

/// Sentinel for "no previous record" in a chain
pub const NO_PREV_RECORD: i64 = -1;

/// Sentinel for "no next block" in a dynamic chain
pub const NO_NEXT_BLOCK: i64 = -1;

/// Sentinel for "no next property"
pub const NO_NEXT_PROPERTY: i64 = -1;

/// In-use marker bit in the leading status byte
pub const IN_USE: u8 = 0x1;

/// How strictly a record is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Fail with `InvalidRecord` when the record is not in use
    Normal,
    /// Return whatever the bytes hold, in use or not, skipping invariant checks
    Force,
    /// Return `None` when the record is not in use
    Check,
}

/// A typed record
pub trait Record: Clone + Debug + Send + Sync + 'static {
    /// Record id (slot position)
    fn id(&self) -> u64;
    /// In-use flag
    fn in_use(&self) -> bool;
    /// Set the in-use flag
    fn set_in_use(&mut self, in_use: bool);
}

/// Codec between raw slot bytes and a typed record
pub trait RecordFormat: Send + Sync + 'static {
    /// Record type produced by this format
    type Record: Record;

    /// Type descriptor written into the store trailer, e.g. `NodeStore`
    fn type_descriptor(&self) -> &'static str;

    /// Size of one slot in bytes
    fn record_size(&self) -> usize;

    /// Leading records that hold store metadata instead of user records
    fn reserved_records(&self) -> u64 {
        0
    }

    /// Contents of record 0 for formats that reserve it
    fn header_record(&self) -> Option<Vec<u8>> {
        None
    }

    /// Whether the raw slot holds an in-use record
    fn is_in_use(&self, bytes: &[u8]) -> bool;

    /// Decode a record from exactly `record_size()` bytes
    fn decode(&self, id: u64, bytes: &[u8], mode: LoadMode) -> Result<Option<Self::Record>>;

    /// Encode a record into exactly `record_size()` bytes
    fn encode(&self, record: &Self::Record, bytes: &mut [u8]) -> Result<()>;
}

/// Combine a stored low word with its modifier bits
///
/// `0xFFFF_FFFF` with no modifier bits is the `-1` sentinel.
#[inline]
pub fn long_from_int_and_mod(base: u32, modifier: u64) -> i64 {
    if modifier == 0 && base == u32::MAX {
        -1
    } else {
        (base as u64 | modifier) as i64
    }
}

/// Bits of `value` selected by `mask`; zero for the `-1` sentinel
#[inline]
pub(crate) fn high_bits(value: i64, mask: u64) -> u64 {
    if value < 0 { 0 } else { value as u64 & mask }
}

/// Low 32 bits stored in the plain field
#[inline]
pub(crate) fn low_bits(value: i64) -> u32 {
    value as u32
}

/// Reject pointers that do not fit the bits their format reserves
pub(crate) fn check_pointer(
    store: &'static str,
    id: u64,
    field: &str,
    value: i64,
    bits: u32,
) -> Result<()> {
    if value < -1 || (value >= 0 && (value as u64) >> bits != 0) {
        return Err(Error::corrupt(
            store,
            id,
            format!("{} {} does not fit in {} bits", field, value, bits),
        ));
    }
    Ok(())
}

/// Apply the load mode to a decoded record
pub(crate) fn finish_load<R: Record>(
    store: &'static str,
    record: R,
    mode: LoadMode,
) -> Result<Option<R>> {
    if record.in_use() {
        return Ok(Some(record));
    }
    match mode {
        LoadMode::Normal => Err(Error::InvalidRecord {
            store,
            id: record.id(),
        }),
        LoadMode::Force => Ok(Some(record)),
        LoadMode::Check => Ok(None),
    }
}

/// Fail unless the slot buffer has exactly the format's size
pub(crate) fn check_len(store: &'static str, id: u64, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(Error::internal(format!(
            "{} record {}: buffer of {} bytes, expected {}",
            store, id, len, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_decodes_to_minus_one() {
        assert_eq!(long_from_int_and_mod(u32::MAX, 0), -1);
        // same low word with modifier bits is a real id
        assert_eq!(
            long_from_int_and_mod(u32::MAX, 0x1_0000_0000),
            0x1_FFFF_FFFF
        );
        assert_eq!(long_from_int_and_mod(5, 0), 5);
    }

    #[test]
    fn test_high_bits_of_sentinel() {
        assert_eq!(high_bits(-1, 0x7_0000_0000), 0);
        assert_eq!(high_bits(0x5_0000_0001, 0x7_0000_0000), 0x5_0000_0000);
        assert_eq!(low_bits(-1), u32::MAX);
    }

    #[test]
    fn test_check_pointer() {
        assert!(check_pointer("NodeStore", 0, "next_rel", -1, 35).is_ok());
        assert!(check_pointer("NodeStore", 0, "next_rel", (1 << 35) - 1, 35).is_ok());
        assert!(check_pointer("NodeStore", 0, "next_rel", 1 << 35, 35).is_err());
        assert!(check_pointer("NodeStore", 0, "next_rel", -2, 35).is_err());
    }
}
