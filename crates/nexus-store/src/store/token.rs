//! Token stores: labels, relationship types and property keys

use super::dynamic::DynamicStore;
use super::record_store::{ManagedStore, RecordStore};
use crate::config::StoreConfig;
use crate::record::{LoadMode, TokenKind, TokenRecord, TokenRecordFormat};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// A token id with its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token id
    pub id: u64,
    /// Token name
    pub name: String,
}

/// Token records plus the dynamic store holding their names
#[derive(Debug)]
pub struct TokenStore {
    records: RecordStore<TokenRecordFormat>,
    names: DynamicStore,
}

fn names_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".names");
    PathBuf::from(name)
}

impl TokenStore {
    /// Create an empty token store and its name store
    pub fn create<P: AsRef<Path>>(path: P, kind: TokenKind, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let names = DynamicStore::create(
            names_path(path),
            kind.name_store_descriptor(),
            config.name_block_size,
            config,
        )?;
        let records = RecordStore::create(path, TokenRecordFormat::new(kind), config)?;
        Ok(Self { records, names })
    }

    /// Open a token store and its name store
    pub fn open<P: AsRef<Path>>(path: P, kind: TokenKind, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let names = DynamicStore::open(
            names_path(path),
            kind.name_store_descriptor(),
            config.name_block_size,
            config,
        )?;
        let records = RecordStore::open(path, TokenRecordFormat::new(kind), config)?;
        Ok(Self { records, names })
    }

    /// Which tokens this store holds
    pub fn kind(&self) -> TokenKind {
        self.records.format().kind()
    }

    /// Token records
    pub fn records(&self) -> &RecordStore<TokenRecordFormat> {
        &self.records
    }

    /// Name store
    pub fn names(&self) -> &DynamicStore {
        &self.names
    }

    /// Token records and name store
    pub fn stores(&self) -> Vec<&dyn ManagedStore> {
        vec![&self.records as &dyn ManagedStore, self.names.records()]
    }

    /// Store a new token, returning its id
    pub fn create_token(&self, name: &str) -> Result<u64> {
        let name_id = self.names.store_bytes(name.as_bytes())?;
        let id = self.records.next_id()?;
        self.records.update(&TokenRecord::new(id, name_id as i64))?;
        tracing::debug!("Created {:?} token {} '{}'", self.kind(), id, name);
        Ok(id)
    }

    /// Load token `id` with its name
    pub fn get_token(&self, id: u64) -> Result<Token> {
        let record = self.records.load(id)?;
        self.token_of(&record)
    }

    /// Every token in use, by id
    pub fn all_tokens(&self) -> Result<Vec<Token>> {
        let high_id = self.records.high_id()?;
        let mut tokens = Vec::new();
        for id in 0..high_id {
            if let Some(record) = self.records.get(id, LoadMode::Check)? {
                tokens.push(self.token_of(&record)?);
            }
        }
        Ok(tokens)
    }

    fn token_of(&self, record: &TokenRecord) -> Result<Token> {
        if record.name_id < 0 {
            return Err(Error::corrupt(
                self.records.type_descriptor(),
                record.id,
                "token without a name",
            ));
        }
        let bytes = self.names.read_full_byte_array(record.name_id as u64)?;
        let name = String::from_utf8(bytes).map_err(|e| {
            Error::corrupt(
                self.records.type_descriptor(),
                record.id,
                format!("token name is not UTF-8: {}", e),
            )
        })?;
        Ok(Token {
            id: record.id,
            name,
        })
    }
}
