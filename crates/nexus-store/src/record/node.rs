//! Node records (15 bytes)
//!
//! ```text
//! byte  0      header: bit0 in use, bits1-3 next_rel[32..35], bits4-7 next_prop[32..36]
//! bytes 1-4    next_rel low word
//! bytes 5-8    next_prop low word
//! bytes 9-13   labels field (u32 low + u8 high, 40 bits)
//! byte  14     extra: bit0 dense
//! ```

use super::{
    check_len, check_pointer, finish_load, high_bits, long_from_int_and_mod, low_bits, LoadMode,
    Record, RecordFormat, IN_USE, NO_NEXT_PROPERTY, NO_NEXT_RECORD,
};
use crate::Result;
use bytes::{Buf, BufMut};

/// Type descriptor of the node store
pub const NODE_STORE: &str = "NodeStore";

/// Node record size in bytes
pub const NODE_RECORD_SIZE: usize = 15;

/// Node record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// First relationship in this node's chain (35 bits)
    pub next_rel: i64,
    /// First property record (36 bits)
    pub next_prop: i64,
    /// Raw 40-bit label field, see [`crate::labels`]
    pub labels: u64,
    /// Relationships are kept in relationship groups
    pub dense: bool,
}

impl NodeRecord {
    /// Create an in-use node with no relationships, properties or labels
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            next_rel: NO_NEXT_RECORD,
            next_prop: NO_NEXT_PROPERTY,
            labels: 0,
            dense: false,
        }
    }
}

impl Record for NodeRecord {
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

/// Codec for [`NodeRecord`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRecordFormat;

impl RecordFormat for NodeRecordFormat {
    type Record = NodeRecord;

    fn type_descriptor(&self) -> &'static str {
        NODE_STORE
    }

    fn record_size(&self) -> usize {
        NODE_RECORD_SIZE
    }

    fn is_in_use(&self, bytes: &[u8]) -> bool {
        bytes.first().is_some_and(|b| b & IN_USE != 0)
    }

    fn decode(&self, id: u64, bytes: &[u8], mode: LoadMode) -> Result<Option<NodeRecord>> {
        check_len(NODE_STORE, id, bytes.len(), NODE_RECORD_SIZE)?;
        let mut buf = bytes;

        let header = buf.get_u8() as u64;
        let in_use = header & IN_USE as u64 != 0;
        let next_rel_mod = (header & 0x0E) << 31;
        let next_prop_mod = (header & 0xF0) << 28;

        let next_rel = buf.get_u32();
        let next_prop = buf.get_u32();
        let labels_low = buf.get_u32() as u64;
        let labels_high = buf.get_u8() as u64;
        let extra = buf.get_u8();

        let record = NodeRecord {
            id,
            in_use,
            next_rel: long_from_int_and_mod(next_rel, next_rel_mod),
            next_prop: long_from_int_and_mod(next_prop, next_prop_mod),
            labels: labels_low | (labels_high << 32),
            dense: extra & 0x1 != 0,
        };
        finish_load(NODE_STORE, record, mode)
    }

    fn encode(&self, record: &NodeRecord, bytes: &mut [u8]) -> Result<()> {
        check_len(NODE_STORE, record.id, bytes.len(), NODE_RECORD_SIZE)?;
        if !record.in_use {
            bytes[0] = 0;
            return Ok(());
        }
        check_pointer(NODE_STORE, record.id, "next_rel", record.next_rel, 35)?;
        check_pointer(NODE_STORE, record.id, "next_prop", record.next_prop, 36)?;
        if record.labels >> 40 != 0 {
            return Err(crate::Error::corrupt(
                NODE_STORE,
                record.id,
                format!("label field {:#x} exceeds 40 bits", record.labels),
            ));
        }

        let next_rel_mod = high_bits(record.next_rel, 0x7_0000_0000) >> 31;
        let next_prop_mod = high_bits(record.next_prop, 0xF_0000_0000) >> 28;
        let header = IN_USE as u64 | next_rel_mod | next_prop_mod;

        let mut out = bytes;
        out.put_u8(header as u8);
        out.put_u32(low_bits(record.next_rel));
        out.put_u32(low_bits(record.next_prop));
        out.put_u32(record.labels as u32);
        out.put_u8((record.labels >> 32) as u8);
        out.put_u8(if record.dense { 0x1 } else { 0x0 });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn round_trip(record: &NodeRecord) -> NodeRecord {
        let mut buf = [0u8; NODE_RECORD_SIZE];
        NodeRecordFormat.encode(record, &mut buf).unwrap();
        NodeRecordFormat
            .decode(record.id, &buf, LoadMode::Normal)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_new_node_round_trip() {
        let node = NodeRecord::new(42);
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_high_bit_pointers() {
        let mut node = NodeRecord::new(1);
        node.next_rel = (1 << 35) - 1;
        node.next_prop = 0xA_1234_5678;
        node.labels = 0xFF_0000_0001;
        node.dense = true;
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_layout_is_bit_exact() {
        let mut node = NodeRecord::new(0);
        node.next_rel = 0x5_0000_0002; // modifier 0b101 -> header bits 1..3
        node.next_prop = 0x3_0000_0004; // modifier 0b0011 -> header bits 4..7
        let mut buf = [0u8; NODE_RECORD_SIZE];
        NodeRecordFormat.encode(&node, &mut buf).unwrap();

        assert_eq!(buf[0], 0x1 | (0b101 << 1) | (0b0011 << 4));
        assert_eq!(&buf[1..5], &[0, 0, 0, 2]);
        assert_eq!(&buf[5..9], &[0, 0, 0, 4]);
    }

    #[test]
    fn test_sentinel_layout() {
        let node = NodeRecord::new(0);
        let mut buf = [0u8; NODE_RECORD_SIZE];
        NodeRecordFormat.encode(&node, &mut buf).unwrap();
        assert_eq!(buf[0], 0x1);
        assert_eq!(&buf[1..9], &[0xFF; 8]);
    }

    #[test]
    fn test_load_modes_on_unused_record() {
        let mut node = NodeRecord::new(9);
        node.next_rel = 77;
        let mut buf = [0u8; NODE_RECORD_SIZE];
        NodeRecordFormat.encode(&node, &mut buf).unwrap();

        node.in_use = false;
        NodeRecordFormat.encode(&node, &mut buf).unwrap();

        assert!(matches!(
            NodeRecordFormat.decode(9, &buf, LoadMode::Normal),
            Err(Error::InvalidRecord { id: 9, .. })
        ));
        assert!(
            NodeRecordFormat
                .decode(9, &buf, LoadMode::Check)
                .unwrap()
                .is_none()
        );
        let forced = NodeRecordFormat
            .decode(9, &buf, LoadMode::Force)
            .unwrap()
            .unwrap();
        assert!(!forced.in_use);
        // deletion only clears the header byte
        assert_eq!(forced.next_rel, 77);
    }

    #[test]
    fn test_pointer_too_wide() {
        let mut node = NodeRecord::new(3);
        node.next_rel = 1 << 35;
        let mut buf = [0u8; NODE_RECORD_SIZE];
        assert!(NodeRecordFormat.encode(&node, &mut buf).is_err());
    }
}
