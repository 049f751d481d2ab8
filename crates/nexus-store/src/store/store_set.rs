//! All stores of one database directory

use super::node::NodeStore;
use super::property::PropertyStore;
use super::record_store::{ManagedStore, RecordStore};
use super::schema::SchemaStore;
use super::token::TokenStore;
use crate::config::StoreConfig;
use crate::page_cache::{SweepTarget, Sweeper};
use crate::record::{RelationshipRecordFormat, TokenKind};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Node store file name
pub const NODE_STORE_NAME: &str = "neostore.nodestore.db";
/// Relationship store file name
pub const RELATIONSHIP_STORE_NAME: &str = "neostore.relationshipstore.db";
/// Property store file name
pub const PROPERTY_STORE_NAME: &str = "neostore.propertystore.db";
/// Label token store file name
pub const LABEL_TOKEN_STORE_NAME: &str = "neostore.labeltokenstore.db";
/// Relationship type token store file name
pub const RELATIONSHIP_TYPE_STORE_NAME: &str = "neostore.relationshiptypestore.db";
/// Schema store file name
pub const SCHEMA_STORE_NAME: &str = "neostore.schemastore.db";

/// Every store of a database directory
#[derive(Debug)]
pub struct StoreSet {
    dir: PathBuf,
    config: StoreConfig,
    nodes: NodeStore,
    relationships: RecordStore<RelationshipRecordFormat>,
    properties: PropertyStore,
    labels: TokenStore,
    relationship_types: TokenStore,
    schema: SchemaStore,
}

impl StoreSet {
    /// Create empty stores under `dir`
    pub fn create<P: AsRef<Path>>(dir: P, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::info!("Creating store set in {:?}", dir);

        Ok(Self {
            nodes: NodeStore::create(dir.join(NODE_STORE_NAME), config)?,
            relationships: RecordStore::create(
                dir.join(RELATIONSHIP_STORE_NAME),
                RelationshipRecordFormat,
                config,
            )?,
            properties: PropertyStore::create(dir.join(PROPERTY_STORE_NAME), config)?,
            labels: TokenStore::create(dir.join(LABEL_TOKEN_STORE_NAME), TokenKind::Label, config)?,
            relationship_types: TokenStore::create(
                dir.join(RELATIONSHIP_TYPE_STORE_NAME),
                TokenKind::RelationshipType,
                config,
            )?,
            schema: SchemaStore::create(dir.join(SCHEMA_STORE_NAME), config)?,
            config: config.clone(),
            dir,
        })
    }

    /// Open the stores under `dir`
    ///
    /// Stores that fail verification open not ok; call
    /// [`StoreSet::make_stores_ok`] before using them.
    pub fn open<P: AsRef<Path>>(dir: P, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let set = Self {
            nodes: NodeStore::open(dir.join(NODE_STORE_NAME), config)?,
            relationships: RecordStore::open(
                dir.join(RELATIONSHIP_STORE_NAME),
                RelationshipRecordFormat,
                config,
            )?,
            properties: PropertyStore::open(dir.join(PROPERTY_STORE_NAME), config)?,
            labels: TokenStore::open(dir.join(LABEL_TOKEN_STORE_NAME), TokenKind::Label, config)?,
            relationship_types: TokenStore::open(
                dir.join(RELATIONSHIP_TYPE_STORE_NAME),
                TokenKind::RelationshipType,
                config,
            )?,
            schema: SchemaStore::open(dir.join(SCHEMA_STORE_NAME), config)?,
            config: config.clone(),
            dir,
        };
        let not_ok = set.stores().iter().filter(|s| !s.is_ok()).count();
        if not_ok > 0 {
            tracing::warn!("{} stores in {:?} are not ok", not_ok, set.dir);
        } else {
            tracing::info!("Opened store set in {:?}", set.dir);
        }
        Ok(set)
    }

    /// Database directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Node store
    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    /// Relationship store
    pub fn relationships(&self) -> &RecordStore<RelationshipRecordFormat> {
        &self.relationships
    }

    /// Property store
    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    /// Label tokens
    pub fn labels(&self) -> &TokenStore {
        &self.labels
    }

    /// Relationship type tokens
    pub fn relationship_types(&self) -> &TokenStore {
        &self.relationship_types
    }

    /// Schema rules
    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    /// Every record store in the set
    pub fn stores(&self) -> Vec<&dyn ManagedStore> {
        let mut stores = self.nodes.stores();
        stores.push(&self.relationships);
        stores.extend(self.properties.stores());
        stores.extend(self.labels.stores());
        stores.extend(self.relationship_types.stores());
        stores.push(self.schema.dynamic_store().records());
        stores
    }

    /// Whether every store is ok
    pub fn is_ok(&self) -> bool {
        self.stores().iter().all(|s| s.is_ok())
    }

    /// Rebuild every store that is not ok
    pub fn make_stores_ok(&self) -> Result<()> {
        for store in self.stores() {
            if !store.is_ok() {
                tracing::info!("Rebuilding ids of {}", store.type_descriptor());
                store.make_store_ok()?;
            }
        }
        Ok(())
    }

    /// Write out dirty pages of every store and flush
    pub fn force_all(&self) -> Result<()> {
        for store in self.stores() {
            store.force()?;
        }
        Ok(())
    }

    /// Close every store
    ///
    /// Every store is attempted; the first failure is returned. Shut down a
    /// sweeper started with [`StoreSet::start_sweeper`] before closing.
    pub fn close(&self) -> Result<()> {
        let mut result = Ok(());
        for store in self.stores() {
            if let Err(e) = store.close() {
                tracing::warn!("Failed to close {}: {}", store.type_descriptor(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        tracing::info!("Closed store set in {:?}", self.dir);
        result
    }

    /// Start a sweeper balancing every store's page cache under the
    /// configured memory budget
    pub fn start_sweeper(&self) -> Result<Sweeper> {
        let targets: Vec<Arc<dyn SweepTarget>> = self
            .stores()
            .iter()
            .map(|s| s.paged_file() as Arc<dyn SweepTarget>)
            .collect();
        Sweeper::start(targets, self.config.memory_budget, self.config.sweep_interval)
    }
}
