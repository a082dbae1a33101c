//! [`StorageBackend`] over an object store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nimbus_store::{ObjectStore, TtlStore};
use nimbus_types::path::is_in_trash;
use nimbus_types::{
    ContentHasher, DirDoc, FileDoc, IndexDoc, Version, new_doc_id, new_internal_id,
};

use super::file::{FileReader, FileWriter, WriteState};
use super::naming::{ObjectNaming, ParsedObject};
use super::StorageBackend;
use crate::config::VfsConfig;
use crate::error::{VfsError, VfsResult};
use crate::extract::ExtractorRegistry;
use crate::fsck::{self, FsckKind, FsckLog, FsckSink, report};
use crate::indexer::{Indexer, Tree};
use crate::lock::{LongOperationLock, VfsLock};
use crate::quota::{cap_crossing, check_available_disk_space, emit_quota_alert};
use crate::versions::detect_versions_to_clean;

/// State shared by a backend and its open write handles.
///
/// `naming` is last so the struct can be unsized to
/// `Shared<dyn ObjectNaming>` for the handles.
pub(crate) struct Shared<N: ?Sized = dyn ObjectNaming> {
    pub(crate) tenant: String,
    pub(crate) indexer: Arc<dyn Indexer>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) ttl_store: Arc<dyn TtlStore>,
    pub(crate) lock: VfsLock,
    pub(crate) extractors: ExtractorRegistry,
    pub(crate) config: VfsConfig,
    pub(crate) naming: N,
}

impl<N: ObjectNaming + ?Sized> Shared<N> {
    pub(crate) fn content_name(&self, file_id: &str, internal_id: &str) -> String {
        self.naming.object_name(file_id, internal_id)
    }

    /// Object names of the current content and every version of a file.
    async fn all_content_names(&self, doc: &FileDoc) -> VfsResult<(Vec<String>, Vec<Version>)> {
        let versions = self.indexer.versions_for(&doc.id).await?;
        let mut names = Vec::with_capacity(versions.len() + 1);
        if !doc.internal_vfs_id.is_empty() {
            names.push(self.content_name(&doc.id, &doc.internal_vfs_id));
        }
        names.extend(
            versions
                .iter()
                .map(|v| self.content_name(&v.file_id, &v.internal_vfs_id)),
        );
        Ok((names, versions))
    }

    /// Keep the superseded content of `old` as a version when versioning
    /// is on, then apply retention. Otherwise drop the old bytes.
    pub(crate) async fn supersede(&self, old: &FileDoc) -> VfsResult<()> {
        if old.internal_vfs_id.is_empty() {
            return Ok(());
        }
        let old_name = self.content_name(&old.id, &old.internal_vfs_id);
        if !self.config.versioning.enabled {
            return self.delete_objects(&[old_name]).await;
        }

        let mut candidate = Version::from_file(old);
        self.indexer.create_version(&mut candidate).await?;
        let olds = self.indexer.versions_for(&old.id).await?;
        let (action, to_clean) = detect_versions_to_clean(
            &candidate,
            &olds,
            self.config.versioning.max_number_to_keep,
            self.config.versioning.min_delay(),
        );
        tracing::debug!(
            file_id = %old.id,
            version = %candidate.id,
            %action,
            reclaimed = to_clean.len(),
            "version retention"
        );
        if to_clean.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = to_clean
            .iter()
            .map(|v| self.content_name(&v.file_id, &v.internal_vfs_id))
            .collect();
        self.delete_objects(&names).await?;
        self.indexer.batch_delete_versions(&to_clean).await
    }

    pub(crate) async fn delete_objects(&self, names: &[String]) -> VfsResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        match self.objects.bulk_delete(names).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(count = names.len(), error = %e, "object delete failed, retrying once");
                Ok(self.objects.bulk_delete(names).await?)
            }
            other => Ok(other?),
        }
    }

    /// Emit the quota alert when usage crossed the 90% line.
    pub(crate) fn alert_on_crossing(&self, before: u64, after: u64) {
        if let Some(exceeded) = cap_crossing(self.config.disk_quota, before, after) {
            emit_quota_alert(&self.tenant, exceeded);
        }
    }

    /// Every file and directory below `dir`, depth first.
    async fn collect_subtree(&self, dir: &DirDoc) -> VfsResult<(Vec<FileDoc>, Vec<DirDoc>)> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut stack = vec![dir.id.clone()];
        while let Some(dir_id) = stack.pop() {
            for child in self.indexer.dir_children(&dir_id).await? {
                match child {
                    IndexDoc::File(f) => files.push(f),
                    IndexDoc::Dir(d) => {
                        stack.push(d.id.clone());
                        dirs.push(d);
                    }
                }
            }
        }
        Ok((files, dirs))
    }

    #[tracing::instrument(skip(self, doc), fields(tenant = %self.tenant, dir = %doc.fullpath), name = "vfs.destroy_subtree")]
    async fn destroy_subtree(&self, doc: &DirDoc, only_content: bool) -> VfsResult<()> {
        let lease = LongOperationLock::acquire(
            &self.lock,
            Arc::clone(&self.ttl_store),
            self.config.lease_ttl(),
        )
        .await?;
        let before = self.indexer.disk_usage().await?;

        let (files, dirs) = self.collect_subtree(doc).await?;
        let mut names = Vec::new();
        let mut versions = Vec::new();
        for f in &files {
            let (n, v) = self.all_content_names(f).await?;
            names.extend(n);
            versions.extend(v);
        }
        names.extend(dirs.iter().filter_map(|d| self.naming.dir_marker(&d.id)));
        if !only_content {
            names.extend(self.naming.dir_marker(&doc.id));
        }
        self.delete_objects(&names).await?;
        self.indexer.batch_delete_versions(&versions).await?;
        let (removed, bytes) = self.indexer.delete_dir_doc_and_content(doc, only_content).await?;

        let after = self.indexer.disk_usage().await?;
        self.alert_on_crossing(before, after);
        tracing::info!(
            tenant = %self.tenant,
            path = %doc.fullpath,
            files = removed.len(),
            bytes,
            only_content,
            "destroyed directory content"
        );
        lease.release().await;
        Ok(())
    }
}

/// Storage backend over an [`ObjectStore`] with naming strategy `N`.
pub struct ObjectBackend<N: ObjectNaming> {
    shared: Arc<Shared<N>>,
}

impl<N: ObjectNaming> ObjectBackend<N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant: impl Into<String>,
        indexer: Arc<dyn Indexer>,
        objects: Arc<dyn ObjectStore>,
        ttl_store: Arc<dyn TtlStore>,
        lock: VfsLock,
        extractors: ExtractorRegistry,
        config: VfsConfig,
        naming: N,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                tenant: tenant.into(),
                indexer,
                objects,
                ttl_store,
                lock,
                extractors,
                config,
                naming,
            }),
        }
    }

    pub fn naming(&self) -> &N {
        &self.shared.naming
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.shared.objects
    }

    fn check_space(&self, used: u64, new_size: Option<u64>, old_size: u64) -> VfsResult<Option<u64>> {
        let c = &self.shared.config;
        let budget = check_available_disk_space(c.disk_quota, used, c.max_file_size, new_size, old_size)?;
        Ok(budget.max_bytes)
    }

    async fn index_content_check(
        &self,
        tree: &Tree,
        sink: FsckSink<'_>,
        fail_fast: bool,
    ) -> VfsResult<()> {
        let s = &self.shared;
        let objects = s.objects.list("").await?;
        let versions: HashSet<String> = s
            .indexer
            .all_versions()
            .await?
            .into_iter()
            .map(|v| v.id)
            .collect();
        let mut seen: HashSet<String> = HashSet::new();

        for obj in objects {
            let Some(parsed) = s.naming.parse(&obj.name) else {
                report(sink, FsckLog::new(FsckKind::MissingInIndex).object(&obj.name), fail_fast)?;
                continue;
            };
            match parsed {
                ParsedObject::DirMarker(dir_id) => match tree.get(&dir_id) {
                    Some(node) if node.is_dir => {}
                    Some(_) => report(
                        sink,
                        FsckLog::new(FsckKind::TypeMismatch)
                            .id(&dir_id)
                            .object(&obj.name)
                            .mismatch("directory", "file"),
                        fail_fast,
                    )?,
                    None => report(
                        sink,
                        FsckLog::new(FsckKind::MissingInIndex).id(&dir_id).object(&obj.name),
                        fail_fast,
                    )?,
                },
                ParsedObject::Content {
                    file_id,
                    internal_id,
                } => match tree.get(&file_id).map(|n| &n.doc) {
                    None => report(
                        sink,
                        FsckLog::new(FsckKind::MissingInIndex).id(&file_id).object(&obj.name),
                        fail_fast,
                    )?,
                    Some(IndexDoc::Dir(_)) => report(
                        sink,
                        FsckLog::new(FsckKind::TypeMismatch)
                            .id(&file_id)
                            .object(&obj.name)
                            .mismatch("file", "directory"),
                        fail_fast,
                    )?,
                    Some(IndexDoc::File(f)) if f.internal_vfs_id == internal_id => {
                        seen.insert(file_id.clone());
                        let hash_differs = matches!(
                            (&f.content_hash, &obj.content_hash),
                            (Some(a), Some(b)) if a != b
                        );
                        if obj.size != f.size {
                            report(
                                sink,
                                FsckLog::new(FsckKind::ContentMismatch)
                                    .id(&file_id)
                                    .object(&obj.name)
                                    .mismatch(f.size.to_string(), obj.size.to_string()),
                                fail_fast,
                            )?;
                        } else if hash_differs {
                            report(
                                sink,
                                FsckLog::new(FsckKind::ContentMismatch)
                                    .id(&file_id)
                                    .object(&obj.name)
                                    .mismatch(
                                        f.content_hash.as_ref().map(|h| h.to_hex()).unwrap_or_default(),
                                        obj.content_hash.as_ref().map(|h| h.to_hex()).unwrap_or_default(),
                                    ),
                                fail_fast,
                            )?;
                        }
                    }
                    Some(IndexDoc::File(_)) => {
                        if !versions.contains(&Version::version_id(&file_id, &internal_id)) {
                            report(
                                sink,
                                FsckLog::new(FsckKind::OrphanVersionContent)
                                    .id(&file_id)
                                    .object(&obj.name),
                                fail_fast,
                            )?;
                        }
                    }
                },
            }
        }

        let mut missing: Vec<&String> = tree.files.iter().filter(|id| !seen.contains(*id)).collect();
        missing.sort();
        for id in missing {
            let mut log = FsckLog::new(FsckKind::MissingInBackend).id(id);
            if let Some(f) = tree.get(id).and_then(|n| n.doc.as_file()) {
                log = log.object(s.content_name(&f.id, &f.internal_vfs_id));
            }
            report(sink, log, fail_fast)?;
        }
        Ok(())
    }
}

#[async_trait]
impl<N: ObjectNaming> StorageBackend for ObjectBackend<N> {
    fn tenant(&self) -> &str {
        &self.shared.tenant
    }

    fn indexer(&self) -> &Arc<dyn Indexer> {
        &self.shared.indexer
    }

    fn lock(&self) -> &VfsLock {
        &self.shared.lock
    }

    fn config(&self) -> &VfsConfig {
        &self.shared.config
    }

    async fn init(&self) -> VfsResult<()> {
        let _guard = self.shared.lock.write().await?;
        self.shared.indexer.init_index().await?;
        tracing::info!(tenant = %self.shared.tenant, "vfs initialized");
        Ok(())
    }

    async fn create_dir(&self, doc: &mut DirDoc) -> VfsResult<()> {
        let s = &self.shared;
        let _guard = s.lock.write().await?;
        if s.indexer.dir_child_exists(&doc.dir_id, &doc.name).await? {
            return Err(VfsError::already_exists(doc.fullpath.clone()));
        }
        if doc.id.is_empty() {
            doc.id = new_doc_id();
        }
        let marker = s.naming.dir_marker(&doc.id);
        if let Some(m) = &marker {
            s.objects.put_marker(m).await?;
        }
        if let Err(e) = s.indexer.create_named_dir_doc(doc).await {
            if let Some(m) = &marker
                && let Err(cleanup) = s.objects.delete(m).await
            {
                tracing::warn!(marker = %m, error = %cleanup, "could not roll back directory marker");
            }
            return Err(e);
        }
        tracing::debug!(id = %doc.id, path = %doc.fullpath, "created directory");
        Ok(())
    }

    async fn create_file(
        &self,
        mut newdoc: FileDoc,
        olddoc: Option<FileDoc>,
        declared_size: Option<u64>,
    ) -> VfsResult<FileWriter> {
        let s = &self.shared;
        let guard = s.lock.write().await?;

        let used = s.indexer.disk_usage().await?;
        let old_size = olddoc.as_ref().map(|o| o.size).unwrap_or(0);
        let max_bytes = self.check_space(used, declared_size, old_size)?;

        let (placeholder, truly_trashed) = match &olddoc {
            Some(old) => {
                newdoc.id = old.id.clone();
                (None, old.trashed)
            }
            None => {
                if s.indexer.dir_child_exists(&newdoc.dir_id, &newdoc.name).await? {
                    return Err(VfsError::already_exists(newdoc.name.clone()));
                }
                let parent = s.indexer.dir_by_id(&newdoc.dir_id).await?;
                let truly_trashed = is_in_trash(&parent.fullpath);
                let mut placeholder = newdoc.clone();
                placeholder.trashed = true;
                placeholder.size = 0;
                placeholder.content_hash = None;
                placeholder.internal_vfs_id = String::new();
                s.indexer.create_file_doc(&mut placeholder).await?;
                newdoc.id = placeholder.id.clone();
                newdoc.created_at = placeholder.created_at;
                (Some(placeholder), truly_trashed)
            }
        };

        let internal_id = new_internal_id();
        newdoc.internal_vfs_id = internal_id.clone();
        let object_name = s.content_name(&newdoc.id, &internal_id);
        let object = match s.objects.create(&object_name, newdoc.content_hash.as_ref()).await {
            Ok(w) => w,
            Err(e) => {
                if let Some(p) = &placeholder
                    && let Err(cleanup) = s.indexer.delete_file_doc(p).await
                {
                    tracing::warn!(file_id = %p.id, error = %cleanup, "could not remove placeholder");
                }
                return Err(e.into());
            }
        };
        drop(guard);

        tracing::debug!(
            file_id = %newdoc.id,
            object = %object_name,
            declared_size,
            max_bytes,
            new = placeholder.is_some(),
            "opened write handle"
        );
        let ctx: Arc<Shared> = self.shared.clone();
        Ok(FileWriter::new(
            ctx,
            WriteState {
                newdoc,
                olddoc,
                placeholder,
                truly_trashed,
                object,
                object_name,
                hasher: ContentHasher::new(),
                extractor: None,
                extractor_checked: false,
                written: 0,
                declared_size,
                max_bytes,
            },
        ))
    }

    async fn copy_file(&self, old: &FileDoc, mut newdoc: FileDoc) -> VfsResult<FileDoc> {
        let s = &self.shared;
        let _guard = s.lock.write().await?;
        let used = s.indexer.disk_usage().await?;
        self.check_space(used, Some(old.size), 0)?;
        if s.indexer.dir_child_exists(&newdoc.dir_id, &newdoc.name).await? {
            return Err(VfsError::already_exists(newdoc.name.clone()));
        }

        if newdoc.id.is_empty() {
            newdoc.id = new_doc_id();
        }
        newdoc.internal_vfs_id = new_internal_id();
        newdoc.size = old.size;
        newdoc.content_hash = old.content_hash.clone();
        newdoc.mime = old.mime.clone();
        newdoc.class = old.class.clone();
        newdoc.executable = old.executable;
        newdoc.metadata = old.metadata.clone();

        let from = s.content_name(&old.id, &old.internal_vfs_id);
        let to = s.content_name(&newdoc.id, &newdoc.internal_vfs_id);
        s.objects.copy(&from, &to).await?;
        if let Err(e) = s.indexer.create_named_file_doc(&mut newdoc).await {
            if let Err(cleanup) = s.objects.delete(&to).await {
                tracing::warn!(object = %to, error = %cleanup, "could not remove orphaned copy");
            }
            return Err(e);
        }
        s.alert_on_crossing(used, used + newdoc.size);
        Ok(newdoc)
    }

    async fn open_file(&self, doc: &FileDoc) -> VfsResult<FileReader> {
        let s = &self.shared;
        let _guard = s.lock.read().await?;
        let name = s.content_name(&doc.id, &doc.internal_vfs_id);
        let inner = s.objects.open(&name).await?;
        Ok(FileReader::new(inner, doc.size))
    }

    async fn open_file_version(&self, doc: &FileDoc, version: &Version) -> VfsResult<FileReader> {
        if version.file_id != doc.id {
            return Err(VfsError::not_found(version.id.clone()));
        }
        let s = &self.shared;
        let _guard = s.lock.read().await?;
        let name = s.content_name(&version.file_id, &version.internal_vfs_id);
        let inner = s.objects.open(&name).await?;
        Ok(FileReader::new(inner, version.size))
    }

    async fn update_file_doc(&self, old: &FileDoc, new: &mut FileDoc) -> VfsResult<()> {
        let s = &self.shared;
        let _guard = s.lock.write().await?;
        if (&old.dir_id, &old.name) != (&new.dir_id, &new.name)
            && s.indexer.dir_child_exists(&new.dir_id, &new.name).await?
        {
            return Err(VfsError::already_exists(new.name.clone()));
        }
        s.indexer.update_file_doc(old, new).await
    }

    async fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> VfsResult<()> {
        let s = &self.shared;
        let _guard = s.lock.write().await?;
        if (&old.dir_id, &old.name) != (&new.dir_id, &new.name)
            && s.indexer.dir_child_exists(&new.dir_id, &new.name).await?
        {
            return Err(VfsError::already_exists(new.fullpath.clone()));
        }
        s.indexer.update_dir_doc(old, new).await
    }

    async fn revert_file_version(&self, doc: &FileDoc, version: &Version) -> VfsResult<FileDoc> {
        let s = &self.shared;
        let _guard = s.lock.write().await?;
        let current = s.indexer.file_by_id(&doc.id).await?;
        if version.file_id != current.id {
            return Err(VfsError::not_found(version.id.clone()));
        }
        let used = s.indexer.disk_usage().await?;
        self.check_space(used, Some(version.size), current.size)?;

        let mut reverted = current.clone();
        reverted.internal_vfs_id = version.internal_vfs_id.clone();
        reverted.size = version.size;
        reverted.content_hash = version.content_hash.clone();
        reverted.metadata = version.metadata.clone();
        reverted.updated_at = Utc::now().max(current.created_at);
        s.indexer.update_file_doc(&current, &mut reverted).await?;
        // Its bytes are current again.
        s.indexer.delete_version(version).await?;
        s.supersede(&current).await?;

        let after = s.indexer.disk_usage().await?;
        s.alert_on_crossing(used, after);
        tracing::info!(file_id = %current.id, version = %version.id, "reverted file version");
        Ok(reverted)
    }

    async fn destroy_file(&self, doc: &FileDoc) -> VfsResult<()> {
        let s = &self.shared;
        let _guard = s.lock.write().await?;
        let before = s.indexer.disk_usage().await?;
        let current = s.indexer.file_by_id(&doc.id).await?;
        let (names, versions) = s.all_content_names(&current).await?;
        s.delete_objects(&names).await?;
        s.indexer.batch_delete_versions(&versions).await?;
        s.indexer.delete_file_doc(&current).await?;
        let after = s.indexer.disk_usage().await?;
        s.alert_on_crossing(before, after);
        tracing::debug!(file_id = %current.id, versions = versions.len(), "destroyed file");
        Ok(())
    }

    async fn destroy_dir_content(&self, doc: &DirDoc) -> VfsResult<()> {
        self.shared.destroy_subtree(doc, true).await
    }

    async fn destroy_dir_and_content(&self, doc: &DirDoc) -> VfsResult<()> {
        self.shared.destroy_subtree(doc, false).await
    }

    async fn check_files(&self, tree: &Tree, sink: FsckSink<'_>, fail_fast: bool) -> VfsResult<()> {
        self.index_content_check(tree, sink, fail_fast).await
    }

    #[tracing::instrument(skip(self, sink), fields(tenant = %self.shared.tenant), name = "vfs.fsck")]
    async fn fsck(&self, sink: FsckSink<'_>, fail_fast: bool) -> VfsResult<()> {
        let s = &self.shared;
        let lease =
            LongOperationLock::acquire(&s.lock, Arc::clone(&s.ttl_store), s.config.lease_ttl())
                .await?;
        let mut counts: HashMap<FsckKind, usize> = HashMap::new();
        let mut counting = |log: FsckLog| {
            *counts.entry(log.kind).or_default() += 1;
            sink(log);
        };
        let result = fsck::run_checks(async {
            let tree = s.indexer.check_index_integrity(&mut counting, fail_fast).await?;
            if tree.root.is_none() {
                return Ok(());
            }
            self.check_files(&tree, &mut counting, fail_fast).await
        })
        .await;
        lease.release().await;
        tracing::info!(
            tenant = %s.tenant,
            findings = counts.values().sum::<usize>(),
            fail_fast,
            "fsck finished"
        );
        result
    }
}
