//! Error types for Nexus record stores

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the store Error
pub type Result<T> = std::result::Result<T, Error>;

/// Error types raised by the record store engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Short read/write or other inconsistency between the file and what we expect of it
    #[error("Underlying storage error: {0}")]
    UnderlyingStorage(String),

    /// A record loaded in normal mode is not in use
    #[error("{store} record {id} not in use")]
    InvalidRecord {
        /// Store type descriptor
        store: &'static str,
        /// Record id
        id: u64,
    },

    /// A record violates its on-disk invariants
    #[error("Corrupt {store} record {id}: {reason}")]
    CorruptRecord {
        /// Store type descriptor
        store: &'static str,
        /// Record id
        id: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Store failed verification at open time and has not been rebuilt
    #[error("Store not ok: {0}")]
    StoreNotOk(String),

    /// Store was written by an older recognised version
    #[error("Upgrade required: expected '{expected}', found '{found}'")]
    NeedsMigration {
        /// Trailer this build writes
        expected: String,
        /// Trailer found on disk
        found: String,
    },

    /// Attempt to modify a read-only store
    #[error("Read-only violation: {0}")]
    ReadOnly(String),

    /// Another process holds the store file lock
    #[error("Unable to lock store {0:?}, another process is using it")]
    StoreLocked(PathBuf),

    /// Id generator errors
    #[error("Id generator error: {0}")]
    IdGenerator(String),

    /// Page cache errors
    #[error("Page cache error: {0}")]
    PageCache(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown property type or value that cannot be encoded
    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an underlying storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::UnderlyingStorage(msg.into())
    }

    /// Create a corrupt record error
    pub fn corrupt(store: &'static str, id: u64, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            store,
            id,
            reason: reason.into(),
        }
    }

    /// Create a store-not-ok error
    pub fn not_ok(msg: impl Into<String>) -> Self {
        Self::StoreNotOk(msg.into())
    }

    /// Create a read-only violation error
    pub fn read_only(msg: impl Into<String>) -> Self {
        Self::ReadOnly(msg.into())
    }

    /// Create an id generator error
    pub fn id_generator(msg: impl Into<String>) -> Self {
        Self::IdGenerator(msg.into())
    }

    /// Create a page cache error
    pub fn page_cache(msg: impl Into<String>) -> Self {
        Self::PageCache(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid property error
    pub fn invalid_property(msg: impl Into<String>) -> Self {
        Self::InvalidProperty(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for failures caused by the state of the file rather than the caller
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::UnderlyingStorage(_))
    }
}
