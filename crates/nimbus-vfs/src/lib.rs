//! # nimbus-vfs
//!
//! Virtual file system of one tenant of a personal cloud.
//!
//! The hierarchy lives in a document store ([`Indexer`]), the bytes in an
//! object store ([`StorageBackend`]). A per-tenant lock serializes the two
//! so they move together:
//! - Writes go to a fresh object and become visible only on close
//! - Overwrites keep the previous content as a [`Version`](nimbus_types::Version)
//!   under a retention policy
//! - Directory moves rewrite every descendant path in bounded batches
//! - Quota is checked before and while writing; crossing 90% fires an alert
//! - Fsck checks the index alone, then the index against the object store

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod fsck;
pub mod indexer;
pub mod instance;
pub mod lock;
pub mod ops;
pub mod quota;
pub mod versions;

pub use backend::{FileReader, FileWriter, FlatNaming, ObjectBackend, ObjectNaming, ShardedNaming, StorageBackend};
pub use config::{ConfigError, NamingScheme, VersioningConfig, VfsConfig};
pub use error::{VfsError, VfsResult};
pub use extract::{ExtractorRegistry, MetadataExtractor, TextExtractor};
pub use fsck::{FsckKind, FsckLog, FsckReport, FsckSink};
pub use indexer::{CouchIndexer, Indexer, SharingRevoker, Tree, TreeFile};
pub use instance::{Instance, InstanceBuilder};
pub use lock::{LockManager, LongOperationLock, VfsLock};
pub use ops::{CreateOptions, QuotaInfo, Vfs, Walk};
pub use quota::register_quota_alert;
pub use versions::{CleanAction, detect_versions_to_clean};
