//! Open, close, crash and repair scenarios across whole stores

use nexus_store::record::{NodeRecord, NodeRecordFormat, RecordFormat};
use nexus_store::store::{DynamicStore, LoadState, STORE_VERSION};
use nexus_store::{Error, RecordStore, StoreConfig, StoreSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route store logs to the test output; `RUST_LOG=nexus_store=debug` to see them
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn append(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

fn truncate_by(path: &Path, len: usize) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    let size = file.metadata().unwrap().len();
    file.set_len(size - len as u64).unwrap();
}

#[test]
fn block_size_30_chains_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("strings.db");
    let config = StoreConfig::default();
    let payloads: Vec<Vec<u8>> = [0usize, 29, 30, 31, 300]
        .iter()
        .map(|&len| (0..len).map(|i| (i % 251) as u8).collect())
        .collect();

    let starts: Vec<u64> = {
        let store = DynamicStore::create(&path, "StringPropertyStore", 30, &config).unwrap();
        let starts: Vec<u64> = payloads.iter().map(|p| store.store_bytes(p).unwrap()).collect();
        let chain_lengths: Vec<usize> = starts
            .iter()
            .map(|&s| store.get_records(s).unwrap().len())
            .collect();
        assert_eq!(chain_lengths, vec![1, 1, 1, 2, 10]);
        // record 0 holds the block size
        assert_eq!(store.records().high_id().unwrap(), 1 + 15);
        store.records().close().unwrap();
        starts
    };

    // Configured size differs; the stored one wins
    let store = DynamicStore::open(&path, "StringPropertyStore", 120, &config).unwrap();
    assert!(store.records().is_ok());
    assert_eq!(store.block_size(), 30);
    for (start, payload) in starts.iter().zip(&payloads) {
        assert_eq!(&store.read_full_byte_array(*start).unwrap(), payload);
    }
    assert_eq!(store.records().high_id().unwrap(), 16);
    store.records().close().unwrap();
}

#[test]
fn sealed_file_is_whole_records_plus_trailer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.db");
    let config = StoreConfig::default();
    let store = RecordStore::create(&path, NodeRecordFormat, &config).unwrap();
    for _ in 0..7 {
        let node = NodeRecord::new(store.next_id().unwrap());
        store.update(&node).unwrap();
    }
    store.close().unwrap();

    let trailer = format!("NodeStore {}", STORE_VERSION);
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 7 * NodeRecordFormat.record_size() + trailer.len());
    assert!(bytes.ends_with(trailer.as_bytes()));
}

#[test]
fn full_and_fast_rebuild_agree_on_high_id() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.db");
    let base = StoreConfig::default().with_page_target_size(15 * 16);

    {
        let store = RecordStore::create(&path, NodeRecordFormat, &base).unwrap();
        for _ in 0..40 {
            let node = NodeRecord::new(store.next_id().unwrap());
            store.update(&node).unwrap();
        }
        for id in (10..20).chain(35..40) {
            let mut node = store.load(id).unwrap();
            node.in_use = false;
            store.update(&node).unwrap();
            store.free_id(id).unwrap();
        }
        store.force().unwrap();
        // dropped without close
    }

    let (full_high, full_free) = {
        let store = RecordStore::open(&path, NodeRecordFormat, &base.clone().with_fast_rebuild(false)).unwrap();
        assert!(!store.is_ok());
        assert!(store.load_state() < LoadState::IdLoaded);
        store.make_store_ok().unwrap();
        assert_eq!(store.load_state(), LoadState::Ready);
        let high = store.high_id().unwrap();
        let free = store.free_id_count().unwrap();
        assert_eq!(store.next_id().unwrap(), 10);
        (high, free)
    };
    assert_eq!(full_high, 35);
    assert_eq!(full_free, 10);

    let store = RecordStore::open(&path, NodeRecordFormat, &base.with_fast_rebuild(true)).unwrap();
    assert!(!store.is_ok());
    store.make_store_ok().unwrap();
    assert_eq!(store.high_id().unwrap(), full_high);
    assert_eq!(store.free_id_count().unwrap(), 0);
    assert_eq!(store.load(34).unwrap().id, 34);
    assert!(store.load(12).is_err());
    store.close().unwrap();
}

#[test]
fn legacy_trailer_needs_migration_and_releases_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.db");
    let config = StoreConfig::default();
    RecordStore::create(&path, NodeRecordFormat, &config)
        .unwrap()
        .close()
        .unwrap();

    let current = format!("NodeStore {}", STORE_VERSION);
    truncate_by(&path, current.len());
    append(&path, b"NodeStore v0.9.9");

    for _ in 0..2 {
        match RecordStore::open(&path, NodeRecordFormat, &config) {
            Err(Error::NeedsMigration { found, .. }) => assert_eq!(found, "NodeStore v0.9.9"),
            other => panic!("expected NeedsMigration, got {:?}", other.map(|_| ())),
        }
    }
}

#[test]
fn garbage_trailer_opens_not_ok() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.db");
    let config = StoreConfig::default();
    {
        let store = RecordStore::create(&path, NodeRecordFormat, &config).unwrap();
        store.update(&NodeRecord::new(store.next_id().unwrap())).unwrap();
        store.close().unwrap();
    }
    let current = format!("NodeStore {}", STORE_VERSION);
    truncate_by(&path, current.len());
    append(&path, b"garbage");

    let store = RecordStore::open(&path, NodeRecordFormat, &config).unwrap();
    assert!(!store.is_ok());
    assert!(matches!(store.load(0), Err(Error::StoreNotOk(_))));
    assert!(store.not_ok_reason().is_some());
}

#[test]
fn read_only_store_that_is_not_ok_cannot_be_repaired() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.db");
    {
        let store = RecordStore::create(&path, NodeRecordFormat, &StoreConfig::default()).unwrap();
        store.update(&NodeRecord::new(store.next_id().unwrap())).unwrap();
        store.force().unwrap();
    }

    let read_only = StoreConfig::default().with_read_only(true);
    let store = RecordStore::open(&path, NodeRecordFormat, &read_only).unwrap();
    assert!(!store.is_ok());
    assert!(matches!(store.make_store_ok(), Err(Error::ReadOnly(_))));
    drop(store);

    let slave = read_only.with_backup_slave(true);
    let store = RecordStore::open(&path, NodeRecordFormat, &slave).unwrap();
    store.make_store_ok().unwrap();
    assert!(store.load(0).unwrap().in_use);
    assert!(matches!(store.next_id(), Err(Error::ReadOnly(_))));
}

#[test]
fn second_writer_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.db");
    let config = StoreConfig::default();
    let first = RecordStore::create(&path, NodeRecordFormat, &config).unwrap();
    assert!(matches!(
        RecordStore::open(&path, NodeRecordFormat, &config),
        Err(Error::StoreLocked(_))
    ));
    first.close().unwrap();
    let second = RecordStore::open(&path, NodeRecordFormat, &config).unwrap();
    assert!(second.is_ok());
    second.close().unwrap();
}

#[test]
fn store_set_survives_crash_and_repair() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default();
    {
        let set = StoreSet::create(dir.path(), &config).unwrap();
        let label = set.labels().create_token("Person").unwrap() as u32;
        let mut node = NodeRecord::new(set.nodes().records().next_id().unwrap());
        let many: Vec<u32> = (label..label + 16).collect();
        set.nodes().put_labels(&mut node, &many).unwrap();
        set.nodes().records().update(&node).unwrap();
        set.schema().write_rule(b"constraint :Person(name) unique").unwrap();
        set.force_all().unwrap();
    }

    let set = StoreSet::open(dir.path(), &config).unwrap();
    assert!(!set.is_ok());
    set.make_stores_ok().unwrap();
    assert!(set.is_ok());

    let node = set.nodes().records().load(0).unwrap();
    assert_eq!(set.nodes().get_labels(&node).unwrap(), (0..16).collect::<Vec<u32>>());
    assert_eq!(set.schema().rules().unwrap().len(), 1);
    assert_eq!(set.labels().get_token(0).unwrap().name, "Person");
    set.close().unwrap();

    let set = StoreSet::open(dir.path(), &config).unwrap();
    assert!(set.is_ok());
    set.close().unwrap();
}
