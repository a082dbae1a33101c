//! Storage collaborators for the nimbus VFS.
//!
//! The VFS core never talks to a database or a disk directly. It goes
//! through three small contracts defined here:
//!
//! - [`DocStore`]: JSON documents with CouchDB-style revisions, bulk
//!   writes, selector queries and sum/count aggregation
//! - [`ObjectStore`]: a flat namespace of named blobs with streaming
//!   writers and seekable readers
//! - [`TtlStore`]: a tiny key/value map with expiring entries, used for
//!   lock leases
//!
//! Each contract ships with an in-memory implementation for tests and a
//! persistent one ([`SqliteDocStore`], [`LocalObjectStore`]) for the CLI.

pub mod doc;
pub mod error;
pub mod local_objects;
pub mod memory_docs;
pub mod memory_objects;
pub mod objects;
pub mod sqlite_docs;
pub mod ttl;

pub use doc::{DocStore, MAX_BULK, Query, Reduce, Selector, SortOrder, next_rev};
pub use error::{StoreError, StoreResult};
pub use local_objects::LocalObjectStore;
pub use memory_docs::MemoryDocStore;
pub use memory_objects::MemoryObjectStore;
pub use objects::{ObjectInfo, ObjectReader, ObjectStore, ObjectWriter};
pub use sqlite_docs::SqliteDocStore;
pub use ttl::{MemoryTtlStore, TtlStore};
