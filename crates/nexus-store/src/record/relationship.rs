//! Relationship records (34 bytes)
//!
//! ```text
//! byte  0      header: bit0 in use, bits1-3 first_node[32..35], bits4-7 next_prop[32..36]
//! bytes 1-4    first_node low word
//! bytes 5-8    second_node low word
//! bytes 9-12   type field:
//!                bits 28-30 second_node[32..35]
//!                bits 25-27 first_prev_rel[32..35]
//!                bits 22-24 first_next_rel[32..35]
//!                bits 19-21 second_prev_rel[32..35]
//!                bits 16-18 second_next_rel[32..35]
//!                bits  0-15 relationship type
//! bytes 13-28  first_prev, first_next, second_prev, second_next low words
//! bytes 29-32  next_prop low word
//! byte  33     extra: bit0 first in first node's chain, bit1 first in second node's chain
//! ```

use super::{
    check_len, check_pointer, finish_load, high_bits, long_from_int_and_mod, low_bits, LoadMode,
    Record, RecordFormat, IN_USE, NO_NEXT_PROPERTY, NO_NEXT_RECORD, NO_PREV_RECORD,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut};

/// Type descriptor of the relationship store
pub const RELATIONSHIP_STORE: &str = "RelationshipStore";

/// Relationship record size in bytes
pub const RELATIONSHIP_RECORD_SIZE: usize = 34;

/// Relationship record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Relationship id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// Start node (35 bits)
    pub first_node: i64,
    /// End node (35 bits)
    pub second_node: i64,
    /// Relationship type token id (16 bits)
    pub rel_type: u32,
    /// Previous relationship in the first node's chain
    pub first_prev_rel: i64,
    /// Next relationship in the first node's chain
    pub first_next_rel: i64,
    /// Previous relationship in the second node's chain
    pub second_prev_rel: i64,
    /// Next relationship in the second node's chain
    pub second_next_rel: i64,
    /// First property record (36 bits)
    pub next_prop: i64,
    /// Head of the first node's chain
    pub first_in_first_chain: bool,
    /// Head of the second node's chain
    pub first_in_second_chain: bool,
}

impl RelationshipRecord {
    /// Create an in-use relationship between two nodes with empty chains
    pub fn new(id: u64, first_node: i64, second_node: i64, rel_type: u32) -> Self {
        Self {
            id,
            in_use: true,
            first_node,
            second_node,
            rel_type,
            first_prev_rel: NO_PREV_RECORD,
            first_next_rel: NO_NEXT_RECORD,
            second_prev_rel: NO_PREV_RECORD,
            second_next_rel: NO_NEXT_RECORD,
            next_prop: NO_NEXT_PROPERTY,
            first_in_first_chain: true,
            first_in_second_chain: true,
        }
    }
}

impl Record for RelationshipRecord {
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

/// Codec for [`RelationshipRecord`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipRecordFormat;

impl RecordFormat for RelationshipRecordFormat {
    type Record = RelationshipRecord;

    fn type_descriptor(&self) -> &'static str {
        RELATIONSHIP_STORE
    }

    fn record_size(&self) -> usize {
        RELATIONSHIP_RECORD_SIZE
    }

    fn is_in_use(&self, bytes: &[u8]) -> bool {
        bytes.first().is_some_and(|b| b & IN_USE != 0)
    }

    fn decode(&self, id: u64, bytes: &[u8], mode: LoadMode) -> Result<Option<RelationshipRecord>> {
        check_len(RELATIONSHIP_STORE, id, bytes.len(), RELATIONSHIP_RECORD_SIZE)?;
        let mut buf = bytes;

        let header = buf.get_u8() as u64;
        let in_use = header & IN_USE as u64 != 0;
        let first_node_mod = (header & 0x0E) << 31;
        let next_prop_mod = (header & 0xF0) << 28;

        let first_node = buf.get_u32();
        let second_node = buf.get_u32();

        let type_field = buf.get_u32() as u64;
        let second_node_mod = (type_field & 0x7000_0000) << 4;
        let first_prev_mod = (type_field & 0x0E00_0000) << 7;
        let first_next_mod = (type_field & 0x01C0_0000) << 10;
        let second_prev_mod = (type_field & 0x0038_0000) << 13;
        let second_next_mod = (type_field & 0x0007_0000) << 16;
        let rel_type = (type_field & 0xFFFF) as u32;

        let first_prev = buf.get_u32();
        let first_next = buf.get_u32();
        let second_prev = buf.get_u32();
        let second_next = buf.get_u32();
        let next_prop = buf.get_u32();
        let extra = buf.get_u8();

        let record = RelationshipRecord {
            id,
            in_use,
            first_node: long_from_int_and_mod(first_node, first_node_mod),
            second_node: long_from_int_and_mod(second_node, second_node_mod),
            rel_type,
            first_prev_rel: long_from_int_and_mod(first_prev, first_prev_mod),
            first_next_rel: long_from_int_and_mod(first_next, first_next_mod),
            second_prev_rel: long_from_int_and_mod(second_prev, second_prev_mod),
            second_next_rel: long_from_int_and_mod(second_next, second_next_mod),
            next_prop: long_from_int_and_mod(next_prop, next_prop_mod),
            first_in_first_chain: extra & 0x1 != 0,
            first_in_second_chain: extra & 0x2 != 0,
        };
        finish_load(RELATIONSHIP_STORE, record, mode)
    }

    fn encode(&self, record: &RelationshipRecord, bytes: &mut [u8]) -> Result<()> {
        check_len(RELATIONSHIP_STORE, record.id, bytes.len(), RELATIONSHIP_RECORD_SIZE)?;
        if !record.in_use {
            bytes[0] = 0;
            return Ok(());
        }

        let id = record.id;
        for (field, value) in [
            ("first_node", record.first_node),
            ("second_node", record.second_node),
            ("first_prev_rel", record.first_prev_rel),
            ("first_next_rel", record.first_next_rel),
            ("second_prev_rel", record.second_prev_rel),
            ("second_next_rel", record.second_next_rel),
        ] {
            check_pointer(RELATIONSHIP_STORE, id, field, value, 35)?;
        }
        check_pointer(RELATIONSHIP_STORE, id, "next_prop", record.next_prop, 36)?;
        if record.rel_type > 0xFFFF {
            return Err(Error::corrupt(
                RELATIONSHIP_STORE,
                id,
                format!("relationship type {} exceeds 16 bits", record.rel_type),
            ));
        }

        let first_node_mod = high_bits(record.first_node, 0x7_0000_0000) >> 31;
        let next_prop_mod = high_bits(record.next_prop, 0xF_0000_0000) >> 28;
        let header = IN_USE as u64 | first_node_mod | next_prop_mod;

        let second_node_mod = high_bits(record.second_node, 0x7_0000_0000) >> 4;
        let first_prev_mod = high_bits(record.first_prev_rel, 0x7_0000_0000) >> 7;
        let first_next_mod = high_bits(record.first_next_rel, 0x7_0000_0000) >> 10;
        let second_prev_mod = high_bits(record.second_prev_rel, 0x7_0000_0000) >> 13;
        let second_next_mod = high_bits(record.second_next_rel, 0x7_0000_0000) >> 16;
        let type_field = record.rel_type as u64
            | second_node_mod
            | first_prev_mod
            | first_next_mod
            | second_prev_mod
            | second_next_mod;

        let mut extra = 0u8;
        if record.first_in_first_chain {
            extra |= 0x1;
        }
        if record.first_in_second_chain {
            extra |= 0x2;
        }

        let mut out = bytes;
        out.put_u8(header as u8);
        out.put_u32(low_bits(record.first_node));
        out.put_u32(low_bits(record.second_node));
        out.put_u32(type_field as u32);
        out.put_u32(low_bits(record.first_prev_rel));
        out.put_u32(low_bits(record.first_next_rel));
        out.put_u32(low_bits(record.second_prev_rel));
        out.put_u32(low_bits(record.second_next_rel));
        out.put_u32(low_bits(record.next_prop));
        out.put_u8(extra);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: &RelationshipRecord) -> RelationshipRecord {
        let mut buf = [0u8; RELATIONSHIP_RECORD_SIZE];
        RelationshipRecordFormat.encode(record, &mut buf).unwrap();
        RelationshipRecordFormat
            .decode(record.id, &buf, LoadMode::Normal)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_simple_round_trip() {
        let rel = RelationshipRecord::new(5, 10, 20, 3);
        assert_eq!(round_trip(&rel), rel);
    }

    #[test]
    fn test_every_pointer_uses_its_own_modifier_bits() {
        let mut rel = RelationshipRecord::new(1, 0x1_0000_0001, 0x2_0000_0002, 0xFFFF);
        rel.first_prev_rel = 0x3_0000_0003;
        rel.first_next_rel = 0x4_0000_0004;
        rel.second_prev_rel = 0x5_0000_0005;
        rel.second_next_rel = 0x6_0000_0006;
        rel.next_prop = 0xF_0000_0007;
        rel.first_in_first_chain = false;
        assert_eq!(round_trip(&rel), rel);
    }

    #[test]
    fn test_35_bit_ids() {
        let max = (1i64 << 35) - 1;
        let mut rel = RelationshipRecord::new(2, max, max, 7);
        rel.first_next_rel = max;
        rel.second_next_rel = max;
        assert_eq!(round_trip(&rel), rel);
    }

    #[test]
    fn test_type_field_layout() {
        let mut rel = RelationshipRecord::new(0, 0, 0x7_0000_0000, 0x1234);
        rel.second_next_rel = 0x1_0000_0000;
        let mut buf = [0u8; RELATIONSHIP_RECORD_SIZE];
        RelationshipRecordFormat.encode(&rel, &mut buf).unwrap();
        let type_field = u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]);
        assert_eq!(type_field, 0x7000_0000 | 0x0001_0000 | 0x1234);
    }

    #[test]
    fn test_type_too_wide() {
        let rel = RelationshipRecord::new(0, 0, 0, 0x1_0000);
        let mut buf = [0u8; RELATIONSHIP_RECORD_SIZE];
        assert!(RelationshipRecordFormat.encode(&rel, &mut buf).is_err());
    }
}
