//! Validated async document access over a single pooled MongoDB connection
//!
//! `docstore` exposes a fixed set of document CRUD operations on a
//! [`DocumentStore`]. Each operation checks its arguments up front and
//! returns an `Err` straight away when they are malformed; otherwise it hands
//! back a [`Pending`] future that resolves once with the storage outcome.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//!
//! let store = docstore::connect("mongodb://localhost:27017/library")?.await?;
//!
//! store.insert("book", doc! { "title": "Dracula" })?.await?;
//! let books = store.find("book", doc! {}, None)?.await?;
//! let renamed = store
//!     .multi_update("book", doc! { "title": "Dracula" }, doc! { "title": "Dra-cool-la" })?
//!     .await?;
//! ```

pub mod backend;
pub mod connection;
pub mod descriptor;
pub mod memory;
pub mod options;
pub mod store;
pub mod validation;

pub use backend::{Backend, SaveOutcome};
pub use connection::{MongoBackend, PoolConfig};
pub use descriptor::{ConnectionDescriptor, HostAddress};
pub use docstore_common::{DocStoreError, Result};
pub use memory::{MemoryBackend, MemoryError};
pub use options::{Acknowledgement, ReadOptions, WriteNodes, WriteOptions};
pub use store::{connect, connect_with_config, DocumentStore, Pending};
