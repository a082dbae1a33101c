//! Path-based façade over the storage backend.
//!
//! [`Vfs`] resolves paths under the tenant read lock, releases it, then
//! hands the resolved documents to the backend, which takes the lock it
//! needs itself. Locks are not reentrant, so no guard is ever held across
//! a backend call.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use nimbus_types::path::{check_abs_path, is_in_trash, join, split};
use nimbus_types::{
    ContentHash, DirDoc, DocPatch, FileDoc, IndexDoc, ROOT_DIR_ID, ROOT_PATH, TRASH_DIR_ID,
    TRASH_DIR_PATH, Version, apply_dir_patch, apply_file_patch, guess_mime, is_reserved_id,
};

use crate::backend::{FileReader, FileWriter, StorageBackend};
use crate::error::{VfsError, VfsResult};
use crate::fsck::{FsckLog, FsckReport, FsckSink};
use crate::indexer::Indexer;
use crate::quota::quota_cap;

/// Options of [`Vfs::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// MIME type; guessed from the name when unset.
    pub content_type: Option<String>,
    /// Declared size, checked at close.
    pub size: Option<u64>,
    /// Declared content hash, checked at close.
    pub hash: Option<ContentHash>,
    /// Replace the content of an existing file.
    pub overwrite: bool,
    pub executable: bool,
    pub tags: Vec<String>,
    /// Modification time; now when unset.
    pub updated_at: Option<DateTime<Utc>>,
}

impl CreateOptions {
    pub fn overwrite() -> Self {
        Self {
            overwrite: true,
            ..Default::default()
        }
    }
}

/// Walk control returned by the visitor of [`Vfs::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    /// Do not descend into this directory.
    SkipDir,
}

/// Disk usage of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    /// Zero or negative when unlimited.
    pub quota: i64,
    pub used: u64,
    pub files: u64,
    pub versions: u64,
    pub trash: u64,
    /// Usage level of the over-quota alert, if a quota is set.
    pub alert_at: Option<u64>,
}

/// The VFS of one tenant.
#[derive(Clone)]
pub struct Vfs {
    backend: Arc<dyn StorageBackend>,
}

/// Name for a copy of `name` that does not collide, `stem (n).ext`.
pub fn conflict_name(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}

/// Attempts at a free name before giving up to concurrent writers.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Whether a child of the directory at `parent_path` shows in listings.
///
/// An upload in progress is flagged trashed outside the trash until its
/// content is committed.
fn is_listed(parent_path: &str, child: &IndexDoc) -> bool {
    match child {
        IndexDoc::File(f) => !f.trashed || is_in_trash(parent_path),
        IndexDoc::Dir(_) => true,
    }
}

fn split_checked(path: &str) -> VfsResult<(&str, &str)> {
    check_abs_path(path)?;
    let (parent, name) = split(path);
    if name.is_empty() {
        return Err(VfsError::illegal_path(path));
    }
    Ok((parent, name))
}

impl Vfs {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn indexer(&self) -> &Arc<dyn Indexer> {
        self.backend.indexer()
    }

    async fn child_exists(&self, dir_id: &str, name: &str) -> VfsResult<bool> {
        let _guard = self.backend.lock().read().await?;
        self.indexer().dir_child_exists(dir_id, name).await
    }

    /// First name free in `dir_id`, starting with `name`.
    async fn free_name(&self, dir_id: &str, name: &str) -> VfsResult<String> {
        if !self.child_exists(dir_id, name).await? {
            return Ok(name.to_string());
        }
        let mut n = 2;
        loop {
            let candidate = conflict_name(name, n);
            if !self.child_exists(dir_id, &candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// The document at `path`.
    pub async fn stat(&self, path: &str) -> VfsResult<IndexDoc> {
        let _guard = self.backend.lock().read().await?;
        self.indexer().dir_or_file_by_path(path).await
    }

    pub async fn stat_file(&self, path: &str) -> VfsResult<FileDoc> {
        let _guard = self.backend.lock().read().await?;
        self.indexer().file_by_path(path).await
    }

    pub async fn stat_dir(&self, path: &str) -> VfsResult<DirDoc> {
        let _guard = self.backend.lock().read().await?;
        self.indexer().dir_by_path(path).await
    }

    /// Open the content of the file at `path`.
    pub async fn open(&self, path: &str) -> VfsResult<FileReader> {
        let doc = self.stat_file(path).await?;
        self.backend.open_file(&doc).await
    }

    /// Children of the directory at `path`, sorted by name.
    pub async fn read_dir(&self, path: &str) -> VfsResult<Vec<IndexDoc>> {
        let _guard = self.backend.lock().read().await?;
        let dir = self.indexer().dir_by_path(path).await?;
        let mut children = self.indexer().dir_children(&dir.id).await?;
        children.retain(|c| is_listed(&dir.fullpath, c));
        Ok(children)
    }

    /// Depth-first walk from `root`, parents before children.
    ///
    /// The visitor gets each path with its document; returning an error
    /// stops the walk.
    pub async fn walk<F>(&self, root: &str, mut visit: F) -> VfsResult<()>
    where
        F: FnMut(&str, &IndexDoc) -> VfsResult<Walk> + Send,
    {
        let _guard = self.backend.lock().read().await?;
        let start = self.indexer().dir_or_file_by_path(root).await?;
        let mut stack = vec![(root.to_string(), start)];
        while let Some((path, doc)) = stack.pop() {
            let action = visit(&path, &doc)?;
            let IndexDoc::Dir(dir) = &doc else {
                continue;
            };
            if action == Walk::SkipDir {
                continue;
            }
            let children = self.indexer().dir_children(&dir.id).await?;
            // Reversed so that the stack pops them in name order.
            for child in children.into_iter().rev().filter(|c| is_listed(&dir.fullpath, c)) {
                let child_path = join(&path, child.name());
                stack.push((child_path, child));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Open a write handle on `path`.
    pub async fn create(&self, path: &str, opts: CreateOptions) -> VfsResult<FileWriter> {
        let (parent_path, name) = split_checked(path)?;
        let guard = self.backend.lock().read().await?;
        let parent = self.indexer().dir_by_path(parent_path).await?;
        if is_in_trash(&parent.fullpath) {
            return Err(VfsError::ParentInTrash);
        }
        let olddoc = match self.indexer().file_by_path(path).await {
            Ok(existing) if opts.overwrite => Some(existing),
            Ok(_) => return Err(VfsError::already_exists(path)),
            Err(VfsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        drop(guard);

        let now = Utc::now();
        let content_type = opts.content_type.unwrap_or_else(|| guess_mime(name));
        let newdoc = match &olddoc {
            Some(old) => {
                if old.trashed {
                    return Err(VfsError::FileInTrash);
                }
                let mut new = old.clone();
                let (mime, class) = nimbus_types::extract_mime_and_class(&content_type);
                new.mime = mime;
                new.class = class;
                new.executable = opts.executable;
                new.content_hash = opts.hash;
                new.updated_at = opts.updated_at.unwrap_or(now);
                if new.updated_at < new.created_at {
                    return Err(VfsError::IllegalTime(format!(
                        "{} is before {}",
                        new.updated_at, new.created_at
                    )));
                }
                if !opts.tags.is_empty() {
                    new.tags = nimbus_types::normalize_tags(opts.tags);
                }
                new
            }
            None => {
                nimbus_types::validate_mime(&content_type)?;
                let mut new = FileDoc::new(name, parent.id.clone(), &content_type)?
                    .with_tags(opts.tags)
                    .with_created_at(opts.updated_at.unwrap_or(now));
                new.executable = opts.executable;
                new.content_hash = opts.hash;
                new
            }
        };
        self.backend.create_file(newdoc, olddoc, opts.size).await
    }

    /// Create and fill a file in one call.
    pub async fn write_file(&self, path: &str, data: &[u8], mut opts: CreateOptions) -> VfsResult<FileDoc> {
        opts.size = Some(data.len() as u64);
        let mut w = self.create(path, opts).await?;
        w.write(data).await?;
        w.close().await
    }

    /// Create a directory whose parent exists.
    pub async fn mkdir(&self, path: &str) -> VfsResult<DirDoc> {
        let (parent_path, name) = split_checked(path)?;
        let parent = self.stat_dir(parent_path).await?;
        if is_in_trash(&parent.fullpath) {
            return Err(VfsError::ParentInTrash);
        }
        let mut doc = DirDoc::new(name, parent.id.clone(), &parent.fullpath)?;
        self.backend.create_dir(&mut doc).await?;
        Ok(doc)
    }

    /// Create a directory and any missing ancestor.
    pub async fn mkdir_all(&self, path: &str) -> VfsResult<DirDoc> {
        check_abs_path(path)?;
        let mut current = self.stat_dir(ROOT_PATH).await?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = join(&current.fullpath, segment);
            current = match self.stat(&next).await {
                Ok(IndexDoc::Dir(d)) => d,
                Ok(IndexDoc::File(_)) => return Err(VfsError::already_exists(next)),
                Err(VfsError::NotFound(_)) => match self.mkdir(&next).await {
                    Ok(d) => d,
                    // Lost a race with another mkdir.
                    Err(VfsError::AlreadyExists(_)) => self.stat_dir(&next).await?,
                    Err(e) => return Err(e),
                },
                Err(e) => return Err(e),
            };
        }
        Ok(current)
    }

    /// Copy the file at `from` to `to`.
    pub async fn copy_file(&self, from: &str, to: &str) -> VfsResult<FileDoc> {
        let (parent_path, name) = split_checked(to)?;
        let src = self.stat_file(from).await?;
        let parent = self.stat_dir(parent_path).await?;
        if is_in_trash(&parent.fullpath) {
            return Err(VfsError::ParentInTrash);
        }
        let newdoc = FileDoc::new(name, parent.id.clone(), &src.mime)?.with_tags(src.tags.clone());
        self.backend.copy_file(&src, newdoc).await
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Move or rename the file or directory at `from` to `to`.
    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<IndexDoc> {
        let (parent_path, name) = split_checked(to)?;
        let doc = self.stat(from).await?;
        let parent = self.stat_dir(parent_path).await?;
        let patch = DocPatch {
            updated_at: Some(Utc::now()),
            ..DocPatch::move_to(parent.id.clone(), Some(name.to_string()))
        };
        self.apply_patch(doc, &patch, &parent).await
    }

    /// The backend refuses a name taken in `parent` under its write lock.
    async fn apply_patch(&self, doc: IndexDoc, patch: &DocPatch, parent: &DirDoc) -> VfsResult<IndexDoc> {
        match doc {
            IndexDoc::File(old) => {
                let mut new = apply_file_patch(&old, patch)?;
                new.trashed = is_in_trash(&parent.fullpath);
                if !new.trashed {
                    new.restore_path = None;
                }
                self.backend.update_file_doc(&old, &mut new).await?;
                new.fullpath = Some(join(&parent.fullpath, &new.name));
                Ok(IndexDoc::File(new))
            }
            IndexDoc::Dir(old) => {
                let mut new = apply_dir_patch(&old, patch, &parent.fullpath)?;
                if !is_in_trash(&new.fullpath) {
                    new.restore_path = None;
                }
                self.backend.update_dir_doc(&old, &mut new).await?;
                Ok(IndexDoc::Dir(new))
            }
        }
    }

    /// Apply a metadata patch to the file at `path`.
    pub async fn modify_file_metadata(&self, path: &str, patch: DocPatch) -> VfsResult<FileDoc> {
        let old = self.stat_file(path).await?;
        let parent_id = patch.dir_id.clone().unwrap_or_else(|| old.dir_id.clone());
        let parent = self.stat_dir_by_id(&parent_id).await?;
        match self.apply_patch(IndexDoc::File(old), &patch, &parent).await? {
            IndexDoc::File(f) => Ok(f),
            IndexDoc::Dir(d) => Err(VfsError::not_found(d.fullpath)),
        }
    }

    /// Apply a metadata patch to the directory at `path`.
    pub async fn modify_dir_metadata(&self, path: &str, patch: DocPatch) -> VfsResult<DirDoc> {
        let old = self.stat_dir(path).await?;
        if old.id == ROOT_DIR_ID {
            return Err(VfsError::forbidden_move(ROOT_PATH));
        }
        let parent_id = patch.dir_id.clone().unwrap_or_else(|| old.dir_id.clone());
        let parent = self.stat_dir_by_id(&parent_id).await?;
        match self.apply_patch(IndexDoc::Dir(old), &patch, &parent).await? {
            IndexDoc::Dir(d) => Ok(d),
            IndexDoc::File(f) => Err(VfsError::not_found(f.id)),
        }
    }

    async fn stat_dir_by_id(&self, id: &str) -> VfsResult<DirDoc> {
        let _guard = self.backend.lock().read().await?;
        self.indexer().dir_by_id(id).await
    }

    // ========================================================================
    // Trash
    // ========================================================================

    /// Move the file or directory at `path` to the trash.
    pub async fn trash(&self, path: &str) -> VfsResult<IndexDoc> {
        let doc = self.stat(path).await?;
        if is_reserved_id(doc.id()) {
            return Err(VfsError::forbidden_move(path));
        }
        let in_trash = match &doc {
            IndexDoc::File(f) => f.trashed,
            IndexDoc::Dir(d) => is_in_trash(&d.fullpath),
        };
        if in_trash {
            return Err(VfsError::FileInTrash);
        }
        let trash = self.stat_dir(TRASH_DIR_PATH).await?;
        let (parent_path, _) = split(path);
        let patch = DocPatch {
            restore_path: Some(Some(parent_path.to_string())),
            updated_at: Some(Utc::now()),
            ..DocPatch::move_to(TRASH_DIR_ID, None)
        };
        let trashed = self.move_to_free_name(doc, patch, &trash).await?;
        tracing::debug!(path, id = %trashed.id(), "moved to trash");
        Ok(trashed)
    }

    /// Move a trashed file or directory back where it came from.
    ///
    /// A missing original parent is recreated. The name gets a numbered
    /// suffix when it is taken.
    pub async fn restore(&self, path: &str) -> VfsResult<IndexDoc> {
        let doc = self.stat(path).await?;
        let (in_trash, restore_path) = match &doc {
            IndexDoc::File(f) => (f.trashed, f.restore_path.clone()),
            IndexDoc::Dir(d) => (is_in_trash(&d.fullpath) && d.id != TRASH_DIR_ID, d.restore_path.clone()),
        };
        if !in_trash {
            return Err(VfsError::FileNotInTrash);
        }
        let target_path = restore_path
            .filter(|p| !is_in_trash(p))
            .unwrap_or_else(|| ROOT_PATH.to_string());
        let parent = self.mkdir_all(&target_path).await?;
        let patch = DocPatch {
            restore_path: Some(None),
            updated_at: Some(Utc::now()),
            ..DocPatch::move_to(parent.id.clone(), None)
        };
        let restored = self.move_to_free_name(doc, patch, &parent).await?;
        tracing::debug!(path, to = %parent.fullpath, "restored from trash");
        Ok(restored)
    }

    /// Apply `patch` under the first free variant of the name of `doc` in
    /// `parent`, picking again when a concurrent move takes it first.
    async fn move_to_free_name(
        &self,
        doc: IndexDoc,
        mut patch: DocPatch,
        parent: &DirDoc,
    ) -> VfsResult<IndexDoc> {
        let mut attempt = 1;
        loop {
            patch.name = Some(self.free_name(&parent.id, doc.name()).await?);
            match self.apply_patch(doc.clone(), &patch, parent).await {
                Err(VfsError::AlreadyExists(name)) if attempt < MAX_NAME_ATTEMPTS => {
                    tracing::debug!(%name, attempt, "name taken concurrently, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Permanently remove everything in the trash.
    pub async fn destroy_trash(&self) -> VfsResult<()> {
        let trash = self.stat_dir(TRASH_DIR_PATH).await?;
        self.backend.destroy_dir_content(&trash).await
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove a file, or a directory that is empty.
    pub async fn remove(&self, path: &str) -> VfsResult<()> {
        match self.stat(path).await? {
            IndexDoc::File(f) => self.backend.destroy_file(&f).await,
            IndexDoc::Dir(d) => {
                if is_reserved_id(&d.id) {
                    return Err(VfsError::forbidden_move(path));
                }
                let len = {
                    let _guard = self.backend.lock().read().await?;
                    self.indexer().dir_length(&d.id).await?
                };
                if len > 0 {
                    return Err(VfsError::dir_not_empty(path));
                }
                self.backend.destroy_dir_and_content(&d).await
            }
        }
    }

    /// Remove a file or a directory with everything below it.
    pub async fn remove_all(&self, path: &str) -> VfsResult<()> {
        match self.stat(path).await? {
            IndexDoc::File(f) => self.backend.destroy_file(&f).await,
            IndexDoc::Dir(d) if d.id == TRASH_DIR_ID => self.backend.destroy_dir_content(&d).await,
            IndexDoc::Dir(d) if is_reserved_id(&d.id) => Err(VfsError::forbidden_move(path)),
            IndexDoc::Dir(d) => self.backend.destroy_dir_and_content(&d).await,
        }
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Retained versions of the file at `path`, oldest first.
    pub async fn versions(&self, path: &str) -> VfsResult<Vec<Version>> {
        let _guard = self.backend.lock().read().await?;
        let doc = self.indexer().file_by_path(path).await?;
        self.indexer().versions_for(&doc.id).await
    }

    async fn find_version(&self, doc: &FileDoc, version_id: &str) -> VfsResult<Version> {
        let _guard = self.backend.lock().read().await?;
        self.indexer()
            .versions_for(&doc.id)
            .await?
            .into_iter()
            .find(|v| v.id == version_id)
            .ok_or_else(|| VfsError::not_found(version_id))
    }

    pub async fn open_version(&self, path: &str, version_id: &str) -> VfsResult<FileReader> {
        let doc = self.stat_file(path).await?;
        let version = self.find_version(&doc, version_id).await?;
        self.backend.open_file_version(&doc, &version).await
    }

    /// Make a version the current content of the file at `path`.
    pub async fn revert(&self, path: &str, version_id: &str) -> VfsResult<FileDoc> {
        let doc = self.stat_file(path).await?;
        let version = self.find_version(&doc, version_id).await?;
        self.backend.revert_file_version(&doc, &version).await
    }

    // ========================================================================
    // Usage and fsck
    // ========================================================================

    pub async fn disk_usage(&self) -> VfsResult<u64> {
        let _guard = self.backend.lock().read().await?;
        self.indexer().disk_usage().await
    }

    pub async fn quota(&self) -> VfsResult<QuotaInfo> {
        let _guard = self.backend.lock().read().await?;
        let quota = self.backend.config().disk_quota;
        let ix = self.indexer();
        let (files, versions, trash) =
            futures::try_join!(ix.files_usage(), ix.versions_usage(), ix.trash_usage())?;
        Ok(QuotaInfo {
            quota,
            used: files + versions,
            files,
            versions,
            trash,
            alert_at: quota_cap(quota),
        })
    }

    /// Run both fsck passes, streaming findings to `sink`.
    pub async fn fsck_with(&self, sink: FsckSink<'_>, fail_fast: bool) -> VfsResult<()> {
        self.backend.fsck(sink, fail_fast).await
    }

    /// Run both fsck passes and collect the findings.
    pub async fn fsck(&self, fail_fast: bool) -> VfsResult<FsckReport> {
        let mut report = FsckReport::default();
        self.backend
            .fsck(&mut |log: FsckLog| report.push(log), fail_fast)
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VfsConfig;
    use crate::instance::Instance;

    async fn vfs() -> Vfs {
        Instance::in_memory("alice", VfsConfig::default()).vfs().await.unwrap()
    }

    #[test]
    fn test_conflict_name() {
        assert_eq!(conflict_name("photo.jpg", 2), "photo (2).jpg");
        assert_eq!(conflict_name("README", 3), "README (3)");
        assert_eq!(conflict_name(".bashrc", 2), ".bashrc (2)");
    }

    #[tokio::test]
    async fn test_create_read_and_stat() {
        let vfs = vfs().await;
        vfs.mkdir("/docs").await.unwrap();
        let doc = vfs
            .write_file("/docs/note.txt", b"# hi\n", CreateOptions::default())
            .await
            .unwrap();
        assert_eq!(doc.mime, "text/plain");
        assert_eq!(doc.class, "text");
        let read = vfs.open("/docs/note.txt").await.unwrap().read_all().await.unwrap();
        assert_eq!(read, b"# hi\n");
        assert!(matches!(
            vfs.write_file("/docs/note.txt", b"x", CreateOptions::default()).await,
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(matches!(vfs.mkdir("/nope/x").await, Err(VfsError::NotFound(_))));
        assert!(matches!(vfs.mkdir("relative").await, Err(VfsError::IllegalPath(_))));
    }

    #[tokio::test]
    async fn test_mkdir_all_and_walk_order() {
        let vfs = vfs().await;
        vfs.mkdir_all("/a/b/c").await.unwrap();
        vfs.mkdir_all("/a/b/c").await.unwrap();
        vfs.write_file("/a/z.txt", b"z", CreateOptions::default()).await.unwrap();
        vfs.write_file("/a/b/y.txt", b"y", CreateOptions::default()).await.unwrap();

        let mut seen = Vec::new();
        vfs.walk("/a", |path, _| {
            seen.push(path.to_string());
            Ok(Walk::Continue)
        })
        .await
        .unwrap();
        assert_eq!(seen, ["/a", "/a/b", "/a/b/c", "/a/b/y.txt", "/a/z.txt"]);

        let mut skipped = Vec::new();
        vfs.walk("/a", |path, doc| {
            skipped.push(path.to_string());
            Ok(if doc.is_dir() && path == "/a/b" { Walk::SkipDir } else { Walk::Continue })
        })
        .await
        .unwrap();
        assert_eq!(skipped, ["/a", "/a/b", "/a/z.txt"]);
    }

    #[tokio::test]
    async fn test_remove_requires_empty_dir() {
        let vfs = vfs().await;
        vfs.mkdir_all("/a/b").await.unwrap();
        assert!(matches!(vfs.remove("/a").await, Err(VfsError::DirNotEmpty(_))));
        vfs.remove("/a/b").await.unwrap();
        vfs.remove("/a").await.unwrap();
        assert!(matches!(vfs.remove("/").await, Err(VfsError::ForbiddenDocMove(_))));
    }

    #[tokio::test]
    async fn test_trash_and_restore_with_name_conflict() {
        let vfs = vfs().await;
        vfs.mkdir("/d").await.unwrap();
        vfs.write_file("/d/f.txt", b"1", CreateOptions::default()).await.unwrap();
        let trashed = vfs.trash("/d/f.txt").await.unwrap();
        assert_eq!(trashed.name(), "f.txt");
        assert!(matches!(vfs.trash("/.cozy_trash/f.txt").await, Err(VfsError::FileInTrash)));

        vfs.write_file("/d/f.txt", b"2", CreateOptions::default()).await.unwrap();
        let restored = vfs.restore("/.cozy_trash/f.txt").await.unwrap();
        assert_eq!(restored.name(), "f (2).txt");
        let f = vfs.stat_file("/d/f (2).txt").await.unwrap();
        assert!(!f.trashed);
        assert!(f.restore_path.is_none());
        assert!(matches!(vfs.restore("/d/f.txt").await, Err(VfsError::FileNotInTrash)));
    }

    #[tokio::test]
    async fn test_trashed_dir_blocks_creation() {
        let vfs = vfs().await;
        vfs.mkdir("/old").await.unwrap();
        vfs.trash("/old").await.unwrap();
        assert!(matches!(
            vfs.write_file("/.cozy_trash/old/x", b"x", CreateOptions::default()).await,
            Err(VfsError::ParentInTrash)
        ));
        vfs.destroy_trash().await.unwrap();
        assert!(vfs.read_dir(TRASH_DIR_PATH).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_and_revert() {
        let vfs = vfs().await;
        let t0 = Utc::now() - chrono::Duration::hours(2);
        let opts = CreateOptions {
            updated_at: Some(t0),
            ..Default::default()
        };
        vfs.write_file("/f", b"first", opts).await.unwrap();
        vfs.write_file("/f", b"second", CreateOptions::overwrite()).await.unwrap();
        let versions = vfs.versions("/f").await.unwrap();
        assert_eq!(versions.len(), 1);
        let old = vfs
            .open_version("/f", &versions[0].id)
            .await
            .unwrap()
            .read_all()
            .await
            .unwrap();
        assert_eq!(old, b"first");
        vfs.revert("/f", &versions[0].id).await.unwrap();
        assert_eq!(vfs.open("/f").await.unwrap().read_all().await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_modify_metadata() {
        let vfs = vfs().await;
        vfs.mkdir("/d").await.unwrap();
        vfs.write_file("/d/f", b"x", CreateOptions::default()).await.unwrap();
        let patch = DocPatch {
            tags: Some(vec!["b".into(), "a".into(), "b".into()]),
            executable: Some(true),
            ..Default::default()
        };
        let f = vfs.modify_file_metadata("/d/f", patch).await.unwrap();
        assert!(f.executable);
        assert_eq!(f.tags.len(), 2);

        let d = vfs
            .modify_dir_metadata("/d", DocPatch::rename("e"))
            .await
            .unwrap();
        assert_eq!(d.fullpath, "/e");
        assert!(vfs.stat_file("/e/f").await.is_ok());
    }

    #[tokio::test]
    async fn test_upload_in_progress_is_not_listed() {
        let vfs = vfs().await;
        let mut w = vfs.create("/uploading.bin", CreateOptions::default()).await.unwrap();
        w.write(b"partial").await.unwrap();

        let names = |docs: Vec<IndexDoc>| docs.iter().map(|d| d.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(vfs.read_dir("/").await.unwrap()), [".cozy_trash"]);
        let mut walked = Vec::new();
        vfs.walk("/", |path, _| {
            walked.push(path.to_string());
            Ok(Walk::Continue)
        })
        .await
        .unwrap();
        assert_eq!(walked, ["/", "/.cozy_trash"]);
        // The name is still taken.
        assert!(matches!(
            vfs.write_file("/uploading.bin", b"x", CreateOptions::default()).await,
            Err(VfsError::AlreadyExists(_))
        ));

        w.close().await.unwrap();
        assert_eq!(names(vfs.read_dir("/").await.unwrap()), [".cozy_trash", "uploading.bin"]);
    }

    #[tokio::test]
    async fn test_rename_onto_taken_name_fails() {
        let vfs = vfs().await;
        vfs.write_file("/a", b"a", CreateOptions::default()).await.unwrap();
        vfs.write_file("/b", b"b", CreateOptions::default()).await.unwrap();
        vfs.mkdir("/d").await.unwrap();
        assert!(matches!(vfs.rename("/a", "/b").await, Err(VfsError::AlreadyExists(_))));
        assert!(matches!(vfs.rename("/d", "/a").await, Err(VfsError::AlreadyExists(_))));
        assert_eq!(vfs.open("/b").await.unwrap().read_all().await.unwrap(), b"b");
        // Patching a file in place keeps its own name.
        vfs.modify_file_metadata("/a", DocPatch::rename("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_quota_info() {
        let vfs = Instance::in_memory("q", VfsConfig::default().with_quota(1000))
            .vfs()
            .await
            .unwrap();
        vfs.write_file("/a", &[0u8; 100], CreateOptions::default()).await.unwrap();
        vfs.write_file("/b", &[0u8; 50], CreateOptions::default()).await.unwrap();
        vfs.trash("/b").await.unwrap();
        let q = vfs.quota().await.unwrap();
        assert_eq!((q.used, q.files, q.trash), (150, 150, 50));
        assert_eq!(q.alert_at, Some(900));
    }
}
