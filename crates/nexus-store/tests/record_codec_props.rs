//! Property tests for the node and relationship record codecs

use nexus_store::record::{
    LoadMode, NodeRecord, NodeRecordFormat, RecordFormat, RelationshipRecord,
    RelationshipRecordFormat,
};
use proptest::prelude::*;

/// A 35-bit record pointer or the `-1` sentinel
///
/// `0xFFFF_FFFF` is never handed out as an id since it reads back as `-1`.
fn pointer(bits: u32) -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(-1i64),
        (0i64..(1i64 << bits)).prop_filter("reserved low word", |v| *v != 0xFFFF_FFFF),
    ]
}

fn node_record() -> impl Strategy<Value = NodeRecord> {
    (
        0u64..(1u64 << 35),
        pointer(35),
        pointer(36),
        0u64..(1u64 << 40),
        any::<bool>(),
    )
        .prop_map(|(id, next_rel, next_prop, labels, dense)| NodeRecord {
            id,
            in_use: true,
            next_rel,
            next_prop,
            labels,
            dense,
        })
}

fn relationship_record() -> impl Strategy<Value = RelationshipRecord> {
    (
        (0u64..(1u64 << 35), pointer(35), pointer(35), 0u32..=0xFFFF),
        (pointer(35), pointer(35), pointer(35), pointer(35)),
        (pointer(36), any::<bool>(), any::<bool>()),
    )
        .prop_map(
            |(
                (id, first_node, second_node, rel_type),
                (first_prev_rel, first_next_rel, second_prev_rel, second_next_rel),
                (next_prop, first_in_first_chain, first_in_second_chain),
            )| RelationshipRecord {
                id,
                in_use: true,
                first_node,
                second_node,
                rel_type,
                first_prev_rel,
                first_next_rel,
                second_prev_rel,
                second_next_rel,
                next_prop,
                first_in_first_chain,
                first_in_second_chain,
            },
        )
}

proptest! {
    #[test]
    fn node_records_survive_the_codec(record in node_record()) {
        let format = NodeRecordFormat;
        let mut bytes = vec![0u8; format.record_size()];
        format.encode(&record, &mut bytes).unwrap();
        prop_assert!(format.is_in_use(&bytes));

        let decoded = format.decode(record.id, &bytes, LoadMode::Normal).unwrap();
        prop_assert_eq!(decoded, Some(record));
    }

    #[test]
    fn relationship_records_survive_the_codec(record in relationship_record()) {
        let format = RelationshipRecordFormat;
        let mut bytes = vec![0u8; format.record_size()];
        format.encode(&record, &mut bytes).unwrap();

        let decoded = format.decode(record.id, &bytes, LoadMode::Normal).unwrap();
        prop_assert_eq!(decoded, Some(record));
    }

    #[test]
    fn unused_node_slots_only_clear_the_header(record in node_record()) {
        let format = NodeRecordFormat;
        let mut bytes = vec![0u8; format.record_size()];
        format.encode(&record, &mut bytes).unwrap();
        let before = bytes.clone();

        let mut unused = record.clone();
        unused.in_use = false;
        format.encode(&unused, &mut bytes).unwrap();

        prop_assert!(!format.is_in_use(&bytes));
        prop_assert_eq!(&bytes[1..], &before[1..]);
        prop_assert_eq!(format.decode(record.id, &bytes, LoadMode::Check).unwrap(), None);
    }

    #[test]
    fn oversized_pointers_are_rejected(id in 0u64..1000, extra in 0i64..1000) {
        let format = NodeRecordFormat;
        let mut record = NodeRecord::new(id);
        record.in_use = true;
        record.next_rel = (1i64 << 35) + extra;
        let mut bytes = vec![0u8; format.record_size()];
        prop_assert!(format.encode(&record, &mut bytes).is_err());
    }
}
