//! Storage backend: content bytes plus the index bookkeeping around them.
//!
//! One implementation, [`ObjectBackend`], runs the quota and
//! commit-on-close protocol over any [`ObjectStore`](nimbus_store::ObjectStore);
//! the [`ObjectNaming`] strategy decides how documents map to object names.
//!
//! ```text
//! create_file ──► quota check ──► placeholder doc ──► FileWriter
//!                                                        │ write*: hash, extract, size checks
//!                                                        ▼
//!                                   close: write lock ──► update doc ──► version / old blob
//! ```

mod file;
mod naming;
mod object;

pub use file::{FileReader, FileWriter};
pub use naming::{FlatNaming, ObjectNaming, ParsedObject, ShardedNaming, is_internal_id};
pub use object::ObjectBackend;

use async_trait::async_trait;
use std::sync::Arc;

use nimbus_types::{DirDoc, FileDoc, Version};

use crate::config::VfsConfig;
use crate::error::VfsResult;
use crate::fsck::FsckSink;
use crate::indexer::{Indexer, Tree};
use crate::lock::VfsLock;

/// Content storage operations of one tenant.
///
/// Every operation takes the tenant lock itself. Callers must not hold it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Context
    // ========================================================================

    fn tenant(&self) -> &str;

    fn indexer(&self) -> &Arc<dyn Indexer>;

    fn lock(&self) -> &VfsLock;

    fn config(&self) -> &VfsConfig;

    /// Prepare the index and the object namespace.
    async fn init(&self) -> VfsResult<()>;

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a directory, failing when the name is taken in its parent.
    async fn create_dir(&self, doc: &mut DirDoc) -> VfsResult<()>;

    /// Open a write handle for new content.
    ///
    /// `olddoc` is the current document when overwriting. `declared_size`
    /// and `newdoc.content_hash`, when set, are checked against what is
    /// actually written.
    async fn create_file(
        &self,
        newdoc: FileDoc,
        olddoc: Option<FileDoc>,
        declared_size: Option<u64>,
    ) -> VfsResult<FileWriter>;

    /// Server-side copy of the content of `old` into the new document.
    async fn copy_file(&self, old: &FileDoc, newdoc: FileDoc) -> VfsResult<FileDoc>;

    // ========================================================================
    // Reading
    // ========================================================================

    async fn open_file(&self, doc: &FileDoc) -> VfsResult<FileReader>;

    async fn open_file_version(&self, doc: &FileDoc, version: &Version) -> VfsResult<FileReader>;

    // ========================================================================
    // Updates
    // ========================================================================

    async fn update_file_doc(&self, old: &FileDoc, new: &mut FileDoc) -> VfsResult<()>;

    async fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> VfsResult<()>;

    /// Make `version` the current content; the current content becomes a
    /// version.
    async fn revert_file_version(&self, doc: &FileDoc, version: &Version) -> VfsResult<FileDoc>;

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Remove a file, its content and its versions.
    async fn destroy_file(&self, doc: &FileDoc) -> VfsResult<()>;

    /// Remove everything below a directory, keeping the directory.
    async fn destroy_dir_content(&self, doc: &DirDoc) -> VfsResult<()>;

    /// Remove a directory and everything below it.
    async fn destroy_dir_and_content(&self, doc: &DirDoc) -> VfsResult<()>;

    // ========================================================================
    // Fsck
    // ========================================================================

    /// Reconcile stored objects with the index snapshot in `tree`.
    async fn check_files(&self, tree: &Tree, sink: FsckSink<'_>, fail_fast: bool) -> VfsResult<()>;

    /// Both fsck passes under a long operation lock.
    async fn fsck(&self, sink: FsckSink<'_>, fail_fast: bool) -> VfsResult<()>;
}
