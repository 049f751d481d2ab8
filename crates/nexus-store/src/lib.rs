//! Nexus Store - fixed-size record storage engine
//!
//! This crate provides the storage layer underneath the Nexus graph engine:
//! - Bit-exact record formats for nodes, relationships, properties, tokens
//!   and dynamic (overflow) blocks
//! - Record files with positional I/O and memory mapping
//! - A copy-on-write page cache with a background sweeper working under a
//!   memory budget
//! - Id generators that survive clean shutdown and are rebuilt from the
//!   records after an unclean one
//! - Store lifecycle: trailer verification, file locking, recovery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              StoreSet                        │
//! │  (Node, Relationship, Property, Token, ...)  │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │      RecordStore<F: RecordFormat>            │
//! │   (codec, loader, id generator)             │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │     PagedFileWithRecords + Sweeper           │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │           FileWithRecords                    │
//! └─────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod file;
pub mod id_generator;
pub mod labels;
pub mod page_cache;
pub mod record;
pub mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use store::{RecordStore, StoreSet};
