//! Node store with its label overflow store

use super::dynamic::DynamicStore;
use super::record_store::{ManagedStore, RecordStore};
use crate::config::StoreConfig;
use crate::labels::{
    dynamic_field, inline_field, labels_from_bytes, labels_to_bytes, parse_label_field, LabelField,
};
use crate::record::{NodeRecord, NodeRecordFormat};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Type descriptor of the label overflow store
pub const LABEL_STORE: &str = "NodeStore.labels";

/// Node records plus the dynamic store for labels that do not fit inline
#[derive(Debug)]
pub struct NodeStore {
    records: RecordStore<NodeRecordFormat>,
    labels: DynamicStore,
}

fn labels_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".labels");
    PathBuf::from(name)
}

impl NodeStore {
    /// Create an empty node store and its label store
    pub fn create<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            labels: DynamicStore::create(labels_path(path), LABEL_STORE, config.label_block_size, config)?,
            records: RecordStore::create(path, NodeRecordFormat, config)?,
        })
    }

    /// Open a node store and its label store
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            labels: DynamicStore::open(labels_path(path), LABEL_STORE, config.label_block_size, config)?,
            records: RecordStore::open(path, NodeRecordFormat, config)?,
        })
    }

    /// Node records
    pub fn records(&self) -> &RecordStore<NodeRecordFormat> {
        &self.records
    }

    /// Label overflow store
    pub fn label_store(&self) -> &DynamicStore {
        &self.labels
    }

    /// Node records and label store
    pub fn stores(&self) -> Vec<&dyn ManagedStore> {
        vec![&self.records as &dyn ManagedStore, self.labels.records()]
    }

    /// Set the labels of `node`
    ///
    /// Labels are sorted and deduplicated. When they fit the inline field any
    /// previous overflow chain is released; otherwise the chain is rewritten,
    /// reusing its records. The node record itself is not written.
    pub fn put_labels(&self, node: &mut NodeRecord, labels: &[u32]) -> Result<()> {
        let mut labels = labels.to_vec();
        labels.sort_unstable();
        labels.dedup();

        let existing = match parse_label_field(node.labels) {
            LabelField::Dynamic(first) => self.labels.get_records(first)?,
            LabelField::Inline(_) => Vec::new(),
        };

        if let Some(field) = inline_field(&labels) {
            if !existing.is_empty() {
                let mut released = existing;
                for record in &mut released {
                    record.mark_unused();
                }
                self.labels.update_records(&released)?;
            }
            node.labels = field;
            return Ok(());
        }

        let payload = labels_to_bytes(node.id, &labels);
        let records = self.labels.allocate_records_reusing(&payload, existing)?;
        self.labels.update_records(&records)?;
        let first = records
            .first()
            .map(|r| r.id)
            .ok_or_else(|| Error::internal("empty label chain"))?;
        node.labels = dynamic_field(first)?;
        Ok(())
    }

    /// Labels of `node`, sorted
    pub fn get_labels(&self, node: &NodeRecord) -> Result<Vec<u32>> {
        match parse_label_field(node.labels) {
            LabelField::Inline(labels) => Ok(labels),
            LabelField::Dynamic(first) => {
                let bytes = self.labels.read_full_byte_array(first)?;
                let (owner, labels) = labels_from_bytes(&bytes)?;
                if owner != node.id {
                    return Err(Error::corrupt(
                        self.records.type_descriptor(),
                        node.id,
                        format!("label chain {} belongs to node {}", first, owner),
                    ));
                }
                Ok(labels)
            }
        }
    }
}
