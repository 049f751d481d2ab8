//! Schema rule store

use super::dynamic::DynamicStore;
use crate::config::StoreConfig;
use crate::record::{LoadMode, RecordFormat};
use crate::{Error, Result};
use std::path::Path;

/// Type descriptor of the schema store
pub const SCHEMA_STORE: &str = "SchemaStore";

/// Serialized schema rules, one dynamic chain per rule
///
/// A rule is addressed by the id of the first record of its chain.
#[derive(Debug)]
pub struct SchemaStore {
    store: DynamicStore,
}

impl SchemaStore {
    /// Create an empty schema store
    pub fn create<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            store: DynamicStore::create(path, SCHEMA_STORE, config.schema_block_size, config)?,
        })
    }

    /// Open a schema store
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            store: DynamicStore::open(path, SCHEMA_STORE, config.schema_block_size, config)?,
        })
    }

    /// Underlying dynamic store
    pub fn dynamic_store(&self) -> &DynamicStore {
        &self.store
    }

    /// Store a rule, returning its id
    pub fn write_rule(&self, rule: &[u8]) -> Result<u64> {
        let id = self.store.store_bytes(rule)?;
        tracing::debug!("Wrote schema rule {} ({} bytes)", id, rule.len());
        Ok(id)
    }

    /// Load rule `id`
    pub fn load_rule(&self, id: u64) -> Result<Vec<u8>> {
        let first = self.store.records().load(id)?;
        if !first.start_record {
            return Err(Error::corrupt(SCHEMA_STORE, id, "not the start of a rule"));
        }
        self.store.read_full_byte_array(id)
    }

    /// Delete rule `id`
    pub fn drop_rule(&self, id: u64) -> Result<()> {
        self.load_rule(id)?;
        self.store.delete_chain(id)?;
        tracing::debug!("Dropped schema rule {}", id);
        Ok(())
    }

    /// Every stored rule as `(id, bytes)`
    pub fn rules(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        let records = self.store.records();
        let mut rules = Vec::new();
        for id in records.format().reserved_records()..records.high_id()? {
            match records.get(id, LoadMode::Check)? {
                Some(record) if record.start_record => {
                    rules.push((id, self.store.read_full_byte_array(id)?));
                }
                _ => {}
            }
        }
        Ok(rules)
    }
}
