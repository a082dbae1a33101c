//! Metadata index of the hierarchy.
//!
//! The [`Indexer`] owns file, directory and version documents. It knows
//! nothing about content bytes: the storage backend drives it and stores
//! the internal id it mints opaquely in [`FileDoc::internal_vfs_id`].

mod couch;
pub mod tree;

pub use couch::CouchIndexer;
pub use tree::{Tree, TreeFile};

use async_trait::async_trait;
use std::collections::HashSet;

use nimbus_types::{DirDoc, FileDoc, IndexDoc, Version};

use crate::error::VfsResult;
use crate::fsck::{self, FsckSink};

/// Called once per document scanned by [`Indexer::build_tree`].
pub type TreeVisitor<'a> = &'a mut (dyn FnMut(&TreeFile) + Send);

/// Revokes sharings rooted at a document about to be trashed.
#[async_trait]
pub trait SharingRevoker: Send + Sync {
    async fn revoke(&self, doc_id: &str, sharing_ids: &[String]) -> VfsResult<()>;
}

/// Index operations over files, directories and versions.
///
/// Path lookups take absolute cleaned paths. Updates use optimistic
/// concurrency on the revision of the old document and fail with
/// `Conflict` when it is stale.
#[async_trait]
pub trait Indexer: Send + Sync {
    // ========================================================================
    // Setup and usage
    // ========================================================================

    /// Create the root and trash directories if missing.
    async fn init_index(&self) -> VfsResult<()>;

    /// Bytes used by current files and versions.
    async fn disk_usage(&self) -> VfsResult<u64> {
        Ok(self.files_usage().await? + self.versions_usage().await?)
    }

    async fn files_usage(&self) -> VfsResult<u64>;

    async fn versions_usage(&self) -> VfsResult<u64>;

    /// Bytes used by files under the trash.
    async fn trash_usage(&self) -> VfsResult<u64>;

    // ========================================================================
    // Lookups
    // ========================================================================

    async fn dir_by_id(&self, id: &str) -> VfsResult<DirDoc>;

    async fn dir_by_path(&self, path: &str) -> VfsResult<DirDoc>;

    async fn file_by_id(&self, id: &str) -> VfsResult<FileDoc>;

    /// Resolve a file by path. The returned doc carries the cached path.
    async fn file_by_path(&self, path: &str) -> VfsResult<FileDoc>;

    async fn dir_or_file_by_id(&self, id: &str) -> VfsResult<IndexDoc>;

    async fn dir_or_file_by_path(&self, path: &str) -> VfsResult<IndexDoc>;

    /// Path of a file, resolved through its parent directory.
    async fn file_path(&self, doc: &FileDoc) -> VfsResult<String> {
        if let Some(path) = &doc.fullpath {
            return Ok(path.clone());
        }
        let parent = self.dir_by_id(&doc.dir_id).await?;
        Ok(nimbus_types::path::join(&parent.fullpath, &doc.name))
    }

    // ========================================================================
    // Children
    // ========================================================================

    /// A page of children of a directory, sorted by name.
    async fn dir_batch(&self, dir_id: &str, skip: usize, limit: usize) -> VfsResult<Vec<IndexDoc>>;

    /// Every child of a directory, sorted by name.
    async fn dir_children(&self, dir_id: &str) -> VfsResult<Vec<IndexDoc>> {
        let mut out = Vec::new();
        loop {
            let batch = self.dir_batch(dir_id, out.len(), nimbus_store::MAX_BULK).await?;
            let short = batch.len() < nimbus_store::MAX_BULK;
            out.extend(batch);
            if short {
                return Ok(out);
            }
        }
    }

    async fn dir_length(&self, dir_id: &str) -> VfsResult<usize>;

    /// True when a file or directory named `name` exists in `dir_id`.
    async fn dir_child_exists(&self, dir_id: &str, name: &str) -> VfsResult<bool>;

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a file doc, assigning an id. Sets the new revision on `doc`.
    async fn create_file_doc(&self, doc: &mut FileDoc) -> VfsResult<()>;

    /// Insert a file doc under its pre-assigned id.
    async fn create_named_file_doc(&self, doc: &mut FileDoc) -> VfsResult<()>;

    async fn create_dir_doc(&self, doc: &mut DirDoc) -> VfsResult<()>;

    async fn create_named_dir_doc(&self, doc: &mut DirDoc) -> VfsResult<()>;

    /// Replace `old` by `new`. Sets the new revision on `new`.
    async fn update_file_doc(&self, old: &FileDoc, new: &mut FileDoc) -> VfsResult<()>;

    /// Replace `old` by `new`, moving the subtree when the path changes.
    async fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> VfsResult<()>;

    async fn delete_file_doc(&self, doc: &FileDoc) -> VfsResult<()>;

    async fn delete_dir_doc(&self, doc: &DirDoc) -> VfsResult<()>;

    /// Delete every descendant of `doc`, and `doc` itself unless
    /// `only_content`. Returns the removed files and their total size.
    async fn delete_dir_doc_and_content(
        &self,
        doc: &DirDoc,
        only_content: bool,
    ) -> VfsResult<(Vec<FileDoc>, u64)>;

    // ========================================================================
    // Versions
    // ========================================================================

    async fn all_versions(&self) -> VfsResult<Vec<Version>>;

    /// Versions of a file, oldest first.
    async fn versions_for(&self, file_id: &str) -> VfsResult<Vec<Version>>;

    async fn create_version(&self, version: &mut Version) -> VfsResult<()>;

    async fn delete_version(&self, version: &Version) -> VfsResult<()>;

    async fn batch_delete_versions(&self, versions: &[Version]) -> VfsResult<()>;

    // ========================================================================
    // Fsck
    // ========================================================================

    /// Scan every hierarchy document into a [`Tree`].
    async fn build_tree(&self, visitor: Option<TreeVisitor<'_>>) -> VfsResult<Tree>;

    /// Build the tree and check it. Returns the tree for the content pass.
    async fn check_tree_integrity(&self, sink: FsckSink<'_>, fail_fast: bool) -> VfsResult<Tree> {
        let mut tree = self.build_tree(None).await?;
        fsck::check_tree_integrity(&mut tree, &mut *sink, fail_fast)?;
        Ok(tree)
    }

    /// Tree checks followed by the version checks.
    async fn check_index_integrity(&self, sink: FsckSink<'_>, fail_fast: bool) -> VfsResult<Tree> {
        let tree = self.check_tree_integrity(&mut *sink, fail_fast).await?;
        if tree.root.is_none() {
            return Ok(tree);
        }
        let versions = self.all_versions().await?;
        let files: &HashSet<String> = &tree.files;
        fsck::check_versions(&versions, files, sink, fail_fast)?;
        Ok(tree)
    }
}
