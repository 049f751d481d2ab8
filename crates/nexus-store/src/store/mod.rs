//! Typed stores
//!
//! A [`RecordStore`] ties a record format to its file, page cache and id
//! generator. The façades around it ([`NodeStore`], [`PropertyStore`],
//! [`TokenStore`], [`SchemaStore`]) own the dynamic stores their records
//! spill into, and [`StoreSet`] opens every store of a database directory.

pub mod dynamic;
pub mod loader;
pub mod node;
pub mod property;
pub mod record_store;
pub mod schema;
pub mod store_set;
pub mod token;
pub mod version;

pub use dynamic::DynamicStore;
pub use loader::{LoadState, LoadedStore};
pub use node::NodeStore;
pub use property::PropertyStore;
pub use record_store::{ManagedStore, RecordStore};
pub use schema::SchemaStore;
pub use store_set::StoreSet;
pub use token::{Token, TokenStore};
pub use version::{VersionCheck, STORE_VERSION};
