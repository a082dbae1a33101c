//! [`Indexer`] over an MVCC [`DocStore`].

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use nimbus_store::{DocStore, MAX_BULK, Query, Reduce, Selector};
use nimbus_types::ids::doctypes;
use nimbus_types::path::{check_abs_path, is_in_trash, is_strictly_under, rebase, split};
use nimbus_types::{
    DirDoc, DocReference, FileDoc, IndexDoc, TRASH_DIR_ID, TRASH_DIR_PATH, Version, is_reserved_id,
    new_doc_id,
};

use super::tree::{Tree, TreeFile};
use super::{Indexer, SharingRevoker, TreeVisitor};
use crate::config::VfsConfig;
use crate::error::{VfsError, VfsResult};

const FILE_TYPE: &str = "file";
const DIR_TYPE: &str = "directory";

/// Index stored as JSON documents, one doctype for the hierarchy and one
/// for versions.
pub struct CouchIndexer {
    store: Arc<dyn DocStore>,
    revoker: Option<Arc<dyn SharingRevoker>>,
    move_batch_size: usize,
    move_max_batches: usize,
    delete_batch_size: usize,
}

impl CouchIndexer {
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        Self::with_config(store, &VfsConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocStore>, config: &VfsConfig) -> Self {
        Self {
            store,
            revoker: None,
            move_batch_size: config.move_batch_size.clamp(1, MAX_BULK),
            move_max_batches: config.move_max_batches.max(1),
            delete_batch_size: config.delete_batch_size.clamp(1, MAX_BULK),
        }
    }

    pub fn with_revoker(mut self, revoker: Arc<dyn SharingRevoker>) -> Self {
        self.revoker = Some(revoker);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocStore> {
        &self.store
    }

    async fn find_one(&self, selector: Selector) -> VfsResult<Option<IndexDoc>> {
        let rows = self
            .store
            .find(doctypes::FILES, &Query::new(selector).limit(1))
            .await?;
        rows.into_iter().next().map(decode).transpose()
    }

    async fn find_docs(&self, query: &Query) -> VfsResult<Vec<IndexDoc>> {
        let rows = self.store.find(doctypes::FILES, query).await?;
        rows.into_iter().map(decode).collect()
    }

    async fn sum(&self, doctype: &str, selector: &Selector) -> VfsResult<u64> {
        let value = self
            .store
            .reduce(doctype, selector, &Reduce::Sum("size".into()))
            .await?;
        as_count(&value)
    }

    /// Every directory strictly below `path`, sorted by path.
    async fn subtree_dirs(&self, path: &str) -> VfsResult<Vec<DirDoc>> {
        let mut out = Vec::new();
        let mut skip = 0;
        loop {
            let query = Query::new(subtree_selector(path))
                .sort_by("path")
                .skip(skip)
                .limit(MAX_BULK);
            let batch = self.find_docs(&query).await?;
            let short = batch.len() < MAX_BULK;
            skip += batch.len();
            out.extend(
                batch
                    .into_iter()
                    .filter_map(|d| match d {
                        IndexDoc::Dir(d) if is_strictly_under(&d.fullpath, path) => Some(d),
                        _ => None,
                    }),
            );
            if short {
                return Ok(out);
            }
        }
    }

    /// Every file whose parent is one of `dir_ids`.
    async fn files_in(&self, dir_ids: &[String]) -> VfsResult<Vec<FileDoc>> {
        let mut out = Vec::new();
        for chunk in dir_ids.chunks(self.move_batch_size) {
            let selector = Selector::In(
                "dir_id".into(),
                chunk.iter().map(|id| json!(id)).collect(),
            )
            .and(Selector::equals("type", FILE_TYPE));
            let docs = self.find_docs(&Query::new(selector)).await?;
            out.extend(docs.into_iter().filter_map(|d| match d {
                IndexDoc::File(f) => Some(f),
                IndexDoc::Dir(_) => None,
            }));
        }
        Ok(out)
    }

    /// Rewrite the path prefix of every directory below `old`.
    #[tracing::instrument(skip(self), name = "index.move_dir")]
    async fn move_dir(&self, old: &str, new: &str) -> VfsResult<()> {
        if new == old || new == format!("{old}/") {
            return Ok(());
        }
        let mut skip = 0;
        let mut moved = 0usize;
        for _ in 0..self.move_max_batches {
            let query = Query::new(subtree_selector(old))
                .sort_by("path")
                .skip(skip)
                .limit(self.move_batch_size);
            let rows = self.find_docs(&query).await?;
            let short = rows.len() < self.move_batch_size;

            let mut updates = Vec::with_capacity(rows.len());
            for row in rows {
                let IndexDoc::Dir(mut dir) = row else {
                    skip += 1;
                    continue;
                };
                let Some(path) = rebase(&dir.fullpath, old, new) else {
                    // Not a true descendant; it stays in the range.
                    skip += 1;
                    continue;
                };
                dir.fullpath = path;
                updates.push(encode_dir(&dir)?);
            }
            moved += updates.len();
            if !updates.is_empty() {
                self.store.bulk_update(doctypes::FILES, updates).await?;
            }
            if short {
                tracing::debug!(from = old, to = new, moved, "moved directory subtree");
                return Ok(());
            }
        }
        tracing::warn!(
            from = old,
            to = new,
            moved,
            max_batches = self.move_max_batches,
            "directory move stopped at the batch cap"
        );
        Err(VfsError::other(format!("too many subdirectories to move {old}")))
    }

    /// Set the trashed flag on every file below `dir`.
    /// Revoke the sharings `doc_id` is the root of, before it goes to the trash.
    async fn revoke_sharings(&self, doc_id: &str, refs: &[DocReference]) -> VfsResult<()> {
        let sharings: Vec<String> = refs
            .iter()
            .filter(|r| r.doctype == doctypes::SHARINGS)
            .map(|r| r.id.clone())
            .collect();
        if sharings.is_empty() {
            return Ok(());
        }
        if let Some(revoker) = &self.revoker {
            revoker.revoke(doc_id, &sharings).await?;
        }
        Ok(())
    }

    async fn propagate_trashed(&self, dir: &DirDoc, trashed: bool) -> VfsResult<()> {
        let mut dir_ids = vec![dir.id.clone()];
        dir_ids.extend(self.subtree_dirs(&dir.fullpath).await?.into_iter().map(|d| d.id));

        let mut updates = Vec::new();
        for mut file in self.files_in(&dir_ids).await? {
            if file.trashed == trashed && (trashed || file.restore_path.is_none()) {
                continue;
            }
            file.trashed = trashed;
            if !trashed {
                file.restore_path = None;
            }
            updates.push(encode_file(&file)?);
        }
        let count = updates.len();
        while !updates.is_empty() {
            let rest = updates.split_off(updates.len().min(MAX_BULK));
            self.store.bulk_update(doctypes::FILES, updates).await?;
            updates = rest;
        }
        tracing::debug!(dir = %dir.fullpath, trashed, count, "propagated trashed flag");
        Ok(())
    }

    async fn bulk_delete_retrying(&self, doctype: &str, docs: Vec<(String, String)>) -> VfsResult<()> {
        for chunk in docs.chunks(self.delete_batch_size) {
            match self.store.bulk_delete(doctype, chunk.to_vec()).await {
                Err(e) if e.is_transient() => {
                    tracing::warn!(doctype, count = chunk.len(), error = %e, "bulk delete failed, retrying once");
                    self.store.bulk_delete(doctype, chunk.to_vec()).await?;
                }
                other => other?,
            }
        }
        Ok(())
    }

    async fn ensure_dir(&self, mut dir: DirDoc) -> VfsResult<()> {
        match self.create_named_dir_doc(&mut dir).await {
            Ok(()) => {
                tracing::info!(id = %dir.id, path = %dir.fullpath, "created reserved directory");
                Ok(())
            }
            Err(VfsError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Directories whose path lies in `(path + "/", path + "0")`.
fn subtree_selector(path: &str) -> Selector {
    let prefix = if path == "/" { String::new() } else { path.to_string() };
    Selector::equals("type", DIR_TYPE).and(Selector::range(
        "path",
        Some(json!(format!("{prefix}/"))),
        Some(json!(format!("{prefix}0"))),
    ))
}

fn decode(value: Value) -> VfsResult<IndexDoc> {
    Ok(serde_json::from_value(value)?)
}

fn encode_file(doc: &FileDoc) -> VfsResult<Value> {
    let mut doc = doc.clone();
    doc.fullpath = None;
    Ok(serde_json::to_value(IndexDoc::File(doc))?)
}

fn encode_dir(doc: &DirDoc) -> VfsResult<Value> {
    Ok(serde_json::to_value(IndexDoc::Dir(doc.clone()))?)
}

fn without_rev(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.remove("_rev");
    }
    value
}

fn with_rev(mut value: Value, rev: &str) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("_rev".into(), json!(rev));
    }
    value
}

fn as_count(value: &Value) -> VfsResult<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .ok_or_else(|| VfsError::wrong_store_state(format!("expected a number, got {value}")))
}

fn conflicts_of(value: &Value) -> Vec<String> {
    value
        .get("_conflicts")
        .and_then(Value::as_array)
        .map(|revs| revs.iter().filter_map(|r| r.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Indexer for CouchIndexer {
    async fn init_index(&self) -> VfsResult<()> {
        self.ensure_dir(DirDoc::root()).await?;
        self.ensure_dir(DirDoc::trash()).await
    }

    async fn files_usage(&self) -> VfsResult<u64> {
        self.sum(doctypes::FILES, &Selector::equals("type", FILE_TYPE))
            .await
    }

    async fn versions_usage(&self) -> VfsResult<u64> {
        self.sum(doctypes::FILES_VERSIONS, &Selector::All).await
    }

    async fn trash_usage(&self) -> VfsResult<u64> {
        let mut dir_ids = vec![TRASH_DIR_ID.to_string()];
        dir_ids.extend(self.subtree_dirs(TRASH_DIR_PATH).await?.into_iter().map(|d| d.id));
        let mut total = 0;
        for chunk in dir_ids.chunks(self.move_batch_size) {
            let selector = Selector::In(
                "dir_id".into(),
                chunk.iter().map(|id| json!(id)).collect(),
            )
            .and(Selector::equals("type", FILE_TYPE));
            total += self.sum(doctypes::FILES, &selector).await?;
        }
        Ok(total)
    }

    async fn dir_by_id(&self, id: &str) -> VfsResult<DirDoc> {
        match self.dir_or_file_by_id(id).await? {
            IndexDoc::Dir(d) => Ok(d),
            IndexDoc::File(_) => Err(VfsError::not_found(format!("directory {id}"))),
        }
    }

    async fn dir_by_path(&self, path: &str) -> VfsResult<DirDoc> {
        check_abs_path(path)?;
        let selector = Selector::equals("path", path).and(Selector::equals("type", DIR_TYPE));
        match self.find_one(selector).await? {
            Some(IndexDoc::Dir(d)) => Ok(d),
            _ => Err(VfsError::not_found(path)),
        }
    }

    async fn file_by_id(&self, id: &str) -> VfsResult<FileDoc> {
        match self.dir_or_file_by_id(id).await? {
            IndexDoc::File(f) => Ok(f),
            IndexDoc::Dir(_) => Err(VfsError::not_found(format!("file {id}"))),
        }
    }

    async fn file_by_path(&self, path: &str) -> VfsResult<FileDoc> {
        check_abs_path(path)?;
        let (parent_path, name) = split(path);
        if name.is_empty() {
            return Err(VfsError::not_found(path));
        }
        let parent = self.dir_by_path(parent_path).await?;
        let selector = Selector::equals("dir_id", parent.id.as_str())
            .and(Selector::equals("name", name))
            .and(Selector::equals("type", FILE_TYPE));
        match self.find_one(selector).await? {
            Some(IndexDoc::File(mut f)) => {
                f.fullpath = Some(path.to_string());
                Ok(f)
            }
            _ => Err(VfsError::not_found(path)),
        }
    }

    async fn dir_or_file_by_id(&self, id: &str) -> VfsResult<IndexDoc> {
        let value = self.store.get(doctypes::FILES, id).await?;
        decode(value)
    }

    async fn dir_or_file_by_path(&self, path: &str) -> VfsResult<IndexDoc> {
        match self.dir_by_path(path).await {
            Ok(d) => Ok(IndexDoc::Dir(d)),
            Err(VfsError::NotFound(_)) => Ok(IndexDoc::File(self.file_by_path(path).await?)),
            Err(e) => Err(e),
        }
    }

    async fn dir_batch(&self, dir_id: &str, skip: usize, limit: usize) -> VfsResult<Vec<IndexDoc>> {
        let query = Query::new(Selector::equals("dir_id", dir_id))
            .sort_by("name")
            .skip(skip)
            .limit(limit);
        self.find_docs(&query).await
    }

    async fn dir_length(&self, dir_id: &str) -> VfsResult<usize> {
        let value = self
            .store
            .reduce(doctypes::FILES, &Selector::equals("dir_id", dir_id), &Reduce::Count)
            .await?;
        Ok(as_count(&value)? as usize)
    }

    async fn dir_child_exists(&self, dir_id: &str, name: &str) -> VfsResult<bool> {
        let selector = Selector::equals("dir_id", dir_id).and(Selector::equals("name", name));
        Ok(self.find_one(selector).await?.is_some())
    }

    async fn create_file_doc(&self, doc: &mut FileDoc) -> VfsResult<()> {
        if doc.id.is_empty() {
            doc.id = new_doc_id();
        }
        self.create_named_file_doc(doc).await
    }

    async fn create_named_file_doc(&self, doc: &mut FileDoc) -> VfsResult<()> {
        let rev = self
            .store
            .create(doctypes::FILES, without_rev(encode_file(doc)?))
            .await?;
        doc.rev = rev;
        Ok(())
    }

    async fn create_dir_doc(&self, doc: &mut DirDoc) -> VfsResult<()> {
        if doc.id.is_empty() {
            doc.id = new_doc_id();
        }
        self.create_named_dir_doc(doc).await
    }

    async fn create_named_dir_doc(&self, doc: &mut DirDoc) -> VfsResult<()> {
        let rev = self
            .store
            .create(doctypes::FILES, without_rev(encode_dir(doc)?))
            .await?;
        doc.rev = rev;
        Ok(())
    }

    async fn update_file_doc(&self, old: &FileDoc, new: &mut FileDoc) -> VfsResult<()> {
        new.id = old.id.clone();
        if !old.trashed && new.trashed {
            self.revoke_sharings(&old.id, &old.referenced_by).await?;
        }
        let value = with_rev(encode_file(new)?, &old.rev);
        new.rev = self.store.update(doctypes::FILES, value).await?;
        Ok(())
    }

    async fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> VfsResult<()> {
        new.id = old.id.clone();
        let moved = new.fullpath != old.fullpath;
        if is_reserved_id(&old.id) && (moved || new.dir_id != old.dir_id) {
            return Err(VfsError::forbidden_move(old.fullpath.clone()));
        }
        if moved && (new.dir_id == old.id || is_strictly_under(&new.fullpath, &old.fullpath)) {
            return Err(VfsError::forbidden_move(format!(
                "{} into {}",
                old.fullpath, new.fullpath
            )));
        }

        // The subtree is rewritten before the doc itself; refuse early
        // rather than after touching descendants.
        let current = self.dir_by_id(&old.id).await?;
        if current.rev != old.rev {
            return Err(VfsError::conflict(old.id.clone()));
        }

        let was_trashed = is_in_trash(&old.fullpath);
        let now_trashed = is_in_trash(&new.fullpath);
        if !was_trashed && now_trashed {
            self.revoke_sharings(&old.id, &old.referenced_by).await?;
            self.propagate_trashed(old, true).await?;
        } else if was_trashed && !now_trashed {
            self.propagate_trashed(old, false).await?;
        }

        if moved {
            self.move_dir(&old.fullpath, &new.fullpath).await?;
        }

        let value = with_rev(encode_dir(new)?, &old.rev);
        new.rev = self.store.update(doctypes::FILES, value).await?;
        Ok(())
    }

    async fn delete_file_doc(&self, doc: &FileDoc) -> VfsResult<()> {
        Ok(self.store.delete(doctypes::FILES, &doc.id, &doc.rev).await?)
    }

    async fn delete_dir_doc(&self, doc: &DirDoc) -> VfsResult<()> {
        if is_reserved_id(&doc.id) {
            return Err(VfsError::forbidden_move(doc.fullpath.clone()));
        }
        Ok(self.store.delete(doctypes::FILES, &doc.id, &doc.rev).await?)
    }

    #[tracing::instrument(skip(self, doc), fields(dir = %doc.fullpath), name = "index.delete_subtree")]
    async fn delete_dir_doc_and_content(
        &self,
        doc: &DirDoc,
        only_content: bool,
    ) -> VfsResult<(Vec<FileDoc>, u64)> {
        if !only_content && is_reserved_id(&doc.id) {
            return Err(VfsError::forbidden_move(doc.fullpath.clone()));
        }
        let subdirs = self.subtree_dirs(&doc.fullpath).await?;
        let mut dir_ids = vec![doc.id.clone()];
        dir_ids.extend(subdirs.iter().map(|d| d.id.clone()));
        let files = self.files_in(&dir_ids).await?;
        let total: u64 = files.iter().map(|f| f.size).sum();

        let mut deletes: Vec<(String, String)> =
            files.iter().map(|f| (f.id.clone(), f.rev.clone())).collect();
        // Deepest directories last in path order; delete them first.
        deletes.extend(subdirs.iter().rev().map(|d| (d.id.clone(), d.rev.clone())));
        if !only_content {
            deletes.push((doc.id.clone(), doc.rev.clone()));
        }
        self.bulk_delete_retrying(doctypes::FILES, deletes).await?;
        tracing::debug!(
            path = %doc.fullpath,
            files = files.len(),
            dirs = subdirs.len(),
            bytes = total,
            "deleted directory content"
        );
        Ok((files, total))
    }

    async fn all_versions(&self) -> VfsResult<Vec<Version>> {
        let mut out = Vec::new();
        loop {
            let batch = self
                .store
                .all_docs(doctypes::FILES_VERSIONS, out.len(), MAX_BULK)
                .await?;
            let short = batch.len() < MAX_BULK;
            for value in batch {
                out.push(serde_json::from_value(value)?);
            }
            if short {
                return Ok(out);
            }
        }
    }

    async fn versions_for(&self, file_id: &str) -> VfsResult<Vec<Version>> {
        let rows = self
            .store
            .find(
                doctypes::FILES_VERSIONS,
                &Query::new(Selector::equals("file_id", file_id)),
            )
            .await?;
        let mut versions = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Version>, _>>()?;
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(versions)
    }

    async fn create_version(&self, version: &mut Version) -> VfsResult<()> {
        let value = without_rev(serde_json::to_value(&*version)?);
        version.rev = self.store.create(doctypes::FILES_VERSIONS, value).await?;
        Ok(())
    }

    async fn delete_version(&self, version: &Version) -> VfsResult<()> {
        Ok(self
            .store
            .delete(doctypes::FILES_VERSIONS, &version.id, &version.rev)
            .await?)
    }

    async fn batch_delete_versions(&self, versions: &[Version]) -> VfsResult<()> {
        let docs = versions
            .iter()
            .map(|v| (v.id.clone(), v.rev.clone()))
            .collect();
        self.bulk_delete_retrying(doctypes::FILES_VERSIONS, docs).await
    }

    async fn build_tree(&self, mut visitor: Option<TreeVisitor<'_>>) -> VfsResult<Tree> {
        let mut tree = Tree::new();
        let mut skip = 0;
        loop {
            let batch = self.store.all_docs(doctypes::FILES, skip, MAX_BULK).await?;
            let short = batch.len() < MAX_BULK;
            skip += batch.len();
            for value in batch {
                let conflicts = conflicts_of(&value);
                let explicit_path = value.get("type").and_then(Value::as_str) == Some(FILE_TYPE)
                    && value.get("path").is_some_and(|p| !p.is_null());
                let mut node = TreeFile::new(decode(value)?);
                node.conflicts = conflicts;
                node.has_explicit_path = explicit_path;
                if let Some(visit) = visitor.as_mut() {
                    visit(&node);
                }
                tree.insert(node);
            }
            if short {
                break;
            }
        }
        tracing::debug!(
            nodes = tree.nodes.len(),
            orphans = tree.orphans.len(),
            root = tree.root.is_some(),
            "built index tree"
        );
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_store::MemoryDocStore;
    use nimbus_types::{ROOT_DIR_ID, ROOT_PATH};
    use parking_lot::Mutex;

    async fn setup() -> (Arc<MemoryDocStore>, CouchIndexer) {
        let store = Arc::new(MemoryDocStore::new());
        let indexer = CouchIndexer::new(store.clone());
        indexer.init_index().await.unwrap();
        (store, indexer)
    }

    async fn mkdir(ix: &CouchIndexer, parent: &DirDoc, name: &str) -> DirDoc {
        let mut d = DirDoc::new(name, parent.id.clone(), &parent.fullpath).unwrap();
        ix.create_dir_doc(&mut d).await.unwrap();
        d
    }

    async fn touch(ix: &CouchIndexer, parent: &DirDoc, name: &str, size: u64) -> FileDoc {
        let mut f = FileDoc::new(name, parent.id.clone(), "text/plain")
            .unwrap()
            .with_size(size);
        f.internal_vfs_id = nimbus_types::new_internal_id();
        ix.create_file_doc(&mut f).await.unwrap();
        f
    }

    async fn move_dir(ix: &CouchIndexer, dir: &DirDoc, parent: &DirDoc, name: &str) -> DirDoc {
        let current = ix.dir_by_id(&dir.id).await.unwrap();
        let patch = nimbus_types::DocPatch::move_to(parent.id.clone(), Some(name.to_string()));
        let mut new = nimbus_types::apply_dir_patch(&current, &patch, &parent.fullpath).unwrap();
        ix.update_dir_doc(&current, &mut new).await.unwrap();
        new
    }

    #[tokio::test]
    async fn test_init_index_is_idempotent() {
        let (_, ix) = setup().await;
        ix.init_index().await.unwrap();
        assert_eq!(ix.dir_by_path(ROOT_PATH).await.unwrap().id, ROOT_DIR_ID);
        assert_eq!(ix.dir_by_path(TRASH_DIR_PATH).await.unwrap().id, TRASH_DIR_ID);
    }

    #[tokio::test]
    async fn test_lookups_respect_types() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let docs = mkdir(&ix, &root, "docs").await;
        let f = touch(&ix, &docs, "a.txt", 3).await;

        let found = ix.file_by_path("/docs/a.txt").await.unwrap();
        assert_eq!(found.id, f.id);
        assert_eq!(found.fullpath.as_deref(), Some("/docs/a.txt"));
        assert!(matches!(ix.dir_by_id(&f.id).await, Err(VfsError::NotFound(_))));
        assert!(matches!(ix.file_by_id(&docs.id).await, Err(VfsError::NotFound(_))));
        assert!(ix.dir_or_file_by_path("/docs").await.unwrap().is_dir());
        assert!(!ix.dir_or_file_by_path("/docs/a.txt").await.unwrap().is_dir());
        assert!(matches!(ix.file_by_path("docs/a.txt").await, Err(VfsError::IllegalPath(_))));
        assert!(matches!(ix.file_by_path("/docs/b.txt").await, Err(VfsError::NotFound(_))));
        assert_eq!(ix.file_path(&f).await.unwrap(), "/docs/a.txt");
    }

    #[tokio::test]
    async fn test_children_listing() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let d = mkdir(&ix, &root, "d").await;
        touch(&ix, &d, "c", 1).await;
        touch(&ix, &d, "a", 1).await;
        mkdir(&ix, &d, "b").await;

        let names: Vec<String> = ix
            .dir_children(&d.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(ix.dir_batch(&d.id, 1, 1).await.unwrap()[0].name(), "b");
        assert_eq!(ix.dir_length(&d.id).await.unwrap(), 3);
        assert!(ix.dir_child_exists(&d.id, "b").await.unwrap());
        assert!(!ix.dir_child_exists(&d.id, "z").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let f = touch(&ix, &root, "f", 1).await;
        let mut first = f.clone();
        first.executable = true;
        ix.update_file_doc(&f, &mut first).await.unwrap();
        let mut second = f.clone();
        second.size = 2;
        assert!(matches!(
            ix.update_file_doc(&f, &mut second).await,
            Err(VfsError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_move_dir_rewrites_only_descendants() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let photos = mkdir(&ix, &root, "Photos").await;
        let y2020 = mkdir(&ix, &photos, "2020").await;
        let deep = mkdir(&ix, &y2020, "summer").await;
        let archive = mkdir(&ix, &root, "PhotosArchive").await;
        let dash = mkdir(&ix, &root, "Photos-old").await;
        let target = mkdir(&ix, &root, "Pictures").await;

        move_dir(&ix, &photos, &target, "Photos").await;

        assert_eq!(ix.dir_by_id(&y2020.id).await.unwrap().fullpath, "/Pictures/Photos/2020");
        assert_eq!(
            ix.dir_by_id(&deep.id).await.unwrap().fullpath,
            "/Pictures/Photos/2020/summer"
        );
        assert_eq!(ix.dir_by_id(&archive.id).await.unwrap().fullpath, "/PhotosArchive");
        assert_eq!(ix.dir_by_id(&dash.id).await.unwrap().fullpath, "/Photos-old");
    }

    #[tokio::test]
    async fn test_move_dir_in_small_batches() {
        let store = Arc::new(MemoryDocStore::new());
        let config = VfsConfig {
            move_batch_size: 2,
            ..VfsConfig::default()
        };
        let ix = CouchIndexer::with_config(store, &config);
        ix.init_index().await.unwrap();
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let a = mkdir(&ix, &root, "a").await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(mkdir(&ix, &a, &format!("sub{i}")).await.id);
        }
        move_dir(&ix, &a, &root, "b").await;
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(ix.dir_by_id(id).await.unwrap().fullpath, format!("/b/sub{i}"));
        }
    }

    #[tokio::test]
    async fn test_forbidden_moves() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let a = mkdir(&ix, &root, "a").await;
        let b = mkdir(&ix, &a, "b").await;

        let patch = nimbus_types::DocPatch::move_to(b.id.clone(), None);
        let mut new = nimbus_types::apply_dir_patch(&a, &patch, &b.fullpath).unwrap();
        assert!(matches!(
            ix.update_dir_doc(&a, &mut new).await,
            Err(VfsError::ForbiddenDocMove(_))
        ));

        let trash = ix.dir_by_id(TRASH_DIR_ID).await.unwrap();
        let patch = nimbus_types::DocPatch::move_to(a.id.clone(), None);
        let mut new = nimbus_types::apply_dir_patch(&trash, &patch, &a.fullpath).unwrap();
        assert!(matches!(
            ix.update_dir_doc(&trash, &mut new).await,
            Err(VfsError::ForbiddenDocMove(_))
        ));
    }

    #[tokio::test]
    async fn test_trash_propagation_round_trip() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let trash = ix.dir_by_id(TRASH_DIR_ID).await.unwrap();
        let a = mkdir(&ix, &root, "a").await;
        let b = mkdir(&ix, &a, "b").await;
        let f1 = touch(&ix, &a, "f1", 10).await;
        let f2 = touch(&ix, &b, "f2", 20).await;

        let trashed = move_dir(&ix, &a, &trash, "a").await;
        assert_eq!(trashed.fullpath, "/.cozy_trash/a");
        assert!(ix.file_by_id(&f1.id).await.unwrap().trashed);
        assert!(ix.file_by_id(&f2.id).await.unwrap().trashed);
        assert_eq!(ix.trash_usage().await.unwrap(), 30);

        move_dir(&ix, &trashed, &root, "a").await;
        let f2 = ix.file_by_id(&f2.id).await.unwrap();
        assert!(!f2.trashed);
        assert!(f2.restore_path.is_none());
        assert_eq!(ix.dir_by_id(&b.id).await.unwrap().fullpath, "/a/b");
        assert_eq!(ix.trash_usage().await.unwrap(), 0);
    }

    struct RecordingRevoker(Mutex<Vec<(String, Vec<String>)>>);

    #[async_trait]
    impl SharingRevoker for RecordingRevoker {
        async fn revoke(&self, doc_id: &str, sharing_ids: &[String]) -> VfsResult<()> {
            self.0.lock().push((doc_id.to_string(), sharing_ids.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_trashing_shared_root_revokes() {
        let store = Arc::new(MemoryDocStore::new());
        let revoker = Arc::new(RecordingRevoker(Mutex::new(Vec::new())));
        let ix = CouchIndexer::new(store).with_revoker(revoker.clone());
        ix.init_index().await.unwrap();
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let trash = ix.dir_by_id(TRASH_DIR_ID).await.unwrap();

        let mut shared = DirDoc::new("shared", ROOT_DIR_ID, &root.fullpath).unwrap();
        shared.referenced_by = vec![DocReference::new(doctypes::SHARINGS, "s1")];
        ix.create_dir_doc(&mut shared).await.unwrap();
        move_dir(&ix, &shared, &trash, "shared").await;

        let calls = revoker.0.lock().clone();
        assert_eq!(calls, vec![(shared.id.clone(), vec!["s1".to_string()])]);
    }

    #[tokio::test]
    async fn test_trashing_shared_file_revokes() {
        let store = Arc::new(MemoryDocStore::new());
        let revoker = Arc::new(RecordingRevoker(Mutex::new(Vec::new())));
        let ix = CouchIndexer::new(store).with_revoker(revoker.clone());
        ix.init_index().await.unwrap();
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();

        let mut shared = touch(&ix, &root, "shared.txt", 3).await;
        let mut referenced = shared.clone();
        referenced.referenced_by = vec![DocReference::new(doctypes::SHARINGS, "s1")];
        ix.update_file_doc(&shared, &mut referenced).await.unwrap();
        shared = referenced;

        let mut trashed = shared.clone();
        trashed.dir_id = TRASH_DIR_ID.to_string();
        trashed.trashed = true;
        ix.update_file_doc(&shared, &mut trashed).await.unwrap();

        // Leaving the trash does not revoke again.
        let mut restored = trashed.clone();
        restored.dir_id = ROOT_DIR_ID.to_string();
        restored.trashed = false;
        ix.update_file_doc(&trashed, &mut restored).await.unwrap();

        let calls = revoker.0.lock().clone();
        assert_eq!(calls, vec![(shared.id.clone(), vec!["s1".to_string()])]);
    }

    #[tokio::test]
    async fn test_delete_dir_and_content_retries_transient_failure() {
        let (store, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let a = mkdir(&ix, &root, "a").await;
        let b = mkdir(&ix, &a, "b").await;
        touch(&ix, &a, "x", 5).await;
        touch(&ix, &b, "y", 7).await;
        let keep = touch(&ix, &root, "keep", 1).await;

        store.fail_next_bulk_writes(1);
        let (files, size) = ix.delete_dir_doc_and_content(&a, false).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(size, 12);
        assert!(matches!(ix.dir_by_id(&a.id).await, Err(VfsError::NotFound(_))));
        assert!(matches!(ix.dir_by_id(&b.id).await, Err(VfsError::NotFound(_))));
        assert!(ix.file_by_id(&keep.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_only_content_keeps_dir() {
        let (_, ix) = setup().await;
        let trash = ix.dir_by_id(TRASH_DIR_ID).await.unwrap();
        touch(&ix, &trash, "old", 4).await;
        let (files, size) = ix.delete_dir_doc_and_content(&trash, true).await.unwrap();
        assert_eq!((files.len(), size), (1, 4));
        assert!(ix.dir_by_id(TRASH_DIR_ID).await.is_ok());
        assert!(matches!(
            ix.delete_dir_doc_and_content(&trash, false).await,
            Err(VfsError::ForbiddenDocMove(_))
        ));
    }

    #[tokio::test]
    async fn test_usage_sums() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let f = touch(&ix, &root, "f", 100).await;
        touch(&ix, &root, "g", 50).await;
        let mut v = Version::from_file(&f);
        ix.create_version(&mut v).await.unwrap();

        assert_eq!(ix.files_usage().await.unwrap(), 150);
        assert_eq!(ix.versions_usage().await.unwrap(), 100);
        assert_eq!(ix.disk_usage().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_versions_for_sorts_by_date() {
        let (_, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let f = touch(&ix, &root, "f", 1).await;
        let now = chrono::Utc::now();
        for (internal, mins) in [("zz", 30), ("aa", 10), ("mm", 20)] {
            let mut v = Version::from_file(&f);
            v.id = Version::version_id(&f.id, internal);
            v.internal_vfs_id = internal.into();
            v.created_at = now - chrono::Duration::minutes(mins);
            ix.create_version(&mut v).await.unwrap();
        }
        let got: Vec<String> = ix
            .versions_for(&f.id)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.internal_vfs_id)
            .collect();
        assert_eq!(got, ["zz", "mm", "aa"]);

        let all = ix.all_versions().await.unwrap();
        ix.batch_delete_versions(&all).await.unwrap();
        assert!(ix.versions_for(&f.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_tree_is_idempotent() {
        let (store, ix) = setup().await;
        let root = ix.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let a = mkdir(&ix, &root, "a").await;
        touch(&ix, &a, "f", 9).await;
        store.inject_conflict(doctypes::FILES, &a.id, "1-deadbeef").unwrap();

        let mut visited = 0;
        let mut count = |_: &TreeFile| visited += 1;
        let first = ix.build_tree(Some(&mut count)).await.unwrap();
        let second = ix.build_tree(None).await.unwrap();
        assert_eq!(visited, 4);
        assert_eq!(first.edges(), second.edges());
        assert_eq!(first.root.as_deref(), Some(ROOT_DIR_ID));
        assert_eq!(first.get(&a.id).unwrap().children_size, 9);
        assert_eq!(first.get(&a.id).unwrap().conflicts, vec!["1-deadbeef".to_string()]);
        assert!(first.orphans.is_empty());
    }
}
