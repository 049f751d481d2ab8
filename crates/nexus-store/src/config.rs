//! Store configuration
//!
//! Values come from, in increasing priority: defaults, `config/store.toml`,
//! and `NEXUS_STORE_*` environment variables.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest payload a dynamic block can declare (24-bit length field)
pub const MAX_BLOCK_SIZE: usize = (1 << 24) - 1;

/// Buffer kind backing resident pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageBacking {
    /// Shared writable memory mapping of the file region
    Mapped,
    /// Private heap copy loaded with positioned reads
    Heap,
    /// Reference-counted immutable snapshot, cheap to share between versions
    Direct,
}

impl Default for PageBacking {
    fn default() -> Self {
        Self::Mapped
    }
}

/// Synchronization protocol used by page elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSync {
    /// Compare-and-swap publication, readers re-validate (many writers)
    Atomic,
    /// Plain publication without retry loops (single writer)
    #[serde(rename = "none")]
    NoSync,
}

impl Default for PageSync {
    fn default() -> Self {
        Self::Atomic
    }
}

/// Record store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Target page size in bytes; rounded down to whole records
    pub page_target_size: usize,
    /// Backing buffer for resident pages
    pub page_backing: PageBacking,
    /// Page element synchronization policy
    pub page_sync: PageSync,
    /// Initial resident memory budget shared by all stores, in bytes
    pub memory_budget: u64,
    /// Open stores read-only (no file lock, no writes)
    pub read_only: bool,
    /// This instance is a backup/slave replica allowed to repair read-only stores
    pub backup_slave: bool,
    /// Rebuild id generators with a backward scan instead of a full scan
    pub rebuild_idgenerators_fast: bool,
    /// Block size of the property string store
    pub string_block_size: usize,
    /// Block size of the property array store
    pub array_block_size: usize,
    /// Block size of the node label overflow store
    pub label_block_size: usize,
    /// Block size of token name stores
    pub name_block_size: usize,
    /// Block size of the schema store
    pub schema_block_size: usize,
    /// Interval between sweeper iterations
    #[serde(with = "serde_millis")]
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_target_size: 1024 * 1024,
            page_backing: PageBacking::Mapped,
            page_sync: PageSync::Atomic,
            memory_budget: 64 * 1024 * 1024,
            read_only: false,
            backup_slave: false,
            rebuild_idgenerators_fast: true,
            string_block_size: 120,
            array_block_size: 120,
            label_block_size: 60,
            name_block_size: 30,
            schema_block_size: 56,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file yields the defaults; a file that does not parse is an error.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("Store config file not found: {:?}", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {:?}: {}", path, e)))?;
        tracing::info!("Loaded store configuration from {:?}", path);
        config.validate()?;
        Ok(config)
    }

    /// Load `config/store.toml` and apply `NEXUS_STORE_*` environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_toml_file("config/store.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (environment variables in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| Error::config(format!("invalid value '{}' for {}", value, key)))
        }

        if let Some(v) = lookup("NEXUS_STORE_PAGE_SIZE") {
            self.page_target_size = parse("NEXUS_STORE_PAGE_SIZE", v)?;
        }
        if let Some(v) = lookup("NEXUS_STORE_PAGE_BACKING") {
            self.page_backing = match v.trim().to_ascii_lowercase().as_str() {
                "mapped" => PageBacking::Mapped,
                "heap" => PageBacking::Heap,
                "direct" => PageBacking::Direct,
                other => {
                    return Err(Error::config(format!(
                        "invalid value '{}' for NEXUS_STORE_PAGE_BACKING",
                        other
                    )));
                }
            };
        }
        if let Some(v) = lookup("NEXUS_STORE_PAGE_SYNC") {
            self.page_sync = match v.trim().to_ascii_lowercase().as_str() {
                "atomic" => PageSync::Atomic,
                "none" => PageSync::NoSync,
                other => {
                    return Err(Error::config(format!(
                        "invalid value '{}' for NEXUS_STORE_PAGE_SYNC",
                        other
                    )));
                }
            };
        }
        if let Some(v) = lookup("NEXUS_STORE_MEMORY") {
            self.memory_budget = parse("NEXUS_STORE_MEMORY", v)?;
        }
        if let Some(v) = lookup("NEXUS_STORE_READ_ONLY") {
            self.read_only = parse("NEXUS_STORE_READ_ONLY", v)?;
        }
        if let Some(v) = lookup("NEXUS_STORE_BACKUP_SLAVE") {
            self.backup_slave = parse("NEXUS_STORE_BACKUP_SLAVE", v)?;
        }
        if let Some(v) = lookup("NEXUS_STORE_FAST_REBUILD") {
            self.rebuild_idgenerators_fast = parse("NEXUS_STORE_FAST_REBUILD", v)?;
        }
        if let Some(v) = lookup("NEXUS_STORE_SWEEP_INTERVAL_MS") {
            self.sweep_interval =
                Duration::from_millis(parse("NEXUS_STORE_SWEEP_INTERVAL_MS", v)?);
        }
        Ok(())
    }

    /// Check that sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.page_target_size == 0 {
            return Err(Error::config("page_target_size must be > 0"));
        }
        for (name, size) in [
            ("string_block_size", self.string_block_size),
            ("array_block_size", self.array_block_size),
            ("label_block_size", self.label_block_size),
            ("name_block_size", self.name_block_size),
            ("schema_block_size", self.schema_block_size),
        ] {
            if size == 0 || size > MAX_BLOCK_SIZE {
                return Err(Error::config(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_BLOCK_SIZE, size
                )));
            }
        }
        Ok(())
    }

    /// Set page target size
    pub fn with_page_target_size(mut self, bytes: usize) -> Self {
        self.page_target_size = bytes;
        self
    }

    /// Set page backing
    pub fn with_page_backing(mut self, backing: PageBacking) -> Self {
        self.page_backing = backing;
        self
    }

    /// Set page synchronization policy
    pub fn with_page_sync(mut self, sync: PageSync) -> Self {
        self.page_sync = sync;
        self
    }

    /// Set initial memory budget
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Open stores read-only
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Mark this instance as a backup/slave replica
    pub fn with_backup_slave(mut self, backup_slave: bool) -> Self {
        self.backup_slave = backup_slave;
        self
    }

    /// Choose fast (backward) or full id generator rebuild
    pub fn with_fast_rebuild(mut self, fast: bool) -> Self {
        self.rebuild_idgenerators_fast = fast;
        self
    }

    /// Set the string store block size
    pub fn with_string_block_size(mut self, size: usize) -> Self {
        self.string_block_size = size;
        self
    }

    /// Set the array store block size
    pub fn with_array_block_size(mut self, size: usize) -> Self {
        self.array_block_size = size;
        self
    }
}
