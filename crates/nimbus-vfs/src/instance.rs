//! Per-tenant session context.
//!
//! An [`Instance`] bundles what one tenant's VFS needs: the stores, the
//! shared lock manager, the extractor registry and the configuration. It
//! replaces process-wide registries; only the quota alert hook is global.

use std::path::Path;
use std::sync::Arc;

use nimbus_store::{
    DocStore, LocalObjectStore, MemoryDocStore, MemoryObjectStore, MemoryTtlStore, ObjectStore,
    SqliteDocStore, TtlStore,
};

use crate::backend::{FlatNaming, ObjectBackend, ShardedNaming, StorageBackend};
use crate::config::{NamingScheme, VfsConfig};
use crate::error::{VfsError, VfsResult};
use crate::extract::ExtractorRegistry;
use crate::indexer::{CouchIndexer, Indexer, SharingRevoker};
use crate::lock::LockManager;
use crate::ops::Vfs;

/// Config file name inside a data directory.
pub const CONFIG_FILE: &str = "nimbus.ron";
/// Index database inside a data directory.
pub const INDEX_FILE: &str = "index.db";
/// Object store root inside a data directory.
pub const OBJECTS_DIR: &str = "objects";

/// Collaborators of one tenant.
#[derive(Clone)]
pub struct Instance {
    tenant: String,
    config: VfsConfig,
    locks: Arc<LockManager>,
    ttl_store: Arc<dyn TtlStore>,
    docs: Arc<dyn DocStore>,
    objects: Arc<dyn ObjectStore>,
    extractors: ExtractorRegistry,
    revoker: Option<Arc<dyn SharingRevoker>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("tenant", &self.tenant)
            .field("config", &self.config)
            .field("extractors", &self.extractors)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub fn builder(tenant: impl Into<String>) -> InstanceBuilder {
        InstanceBuilder::new(tenant)
    }

    /// Everything in memory.
    pub fn in_memory(tenant: impl Into<String>, config: VfsConfig) -> Self {
        Self::builder(tenant).config(config).build()
    }

    /// Persistent instance in `dir`: SQLite index, local object tree and an
    /// optional `nimbus.ron`.
    pub async fn open_local(tenant: impl Into<String>, dir: impl AsRef<Path>) -> VfsResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let config = VfsConfig::load(dir.join(CONFIG_FILE))
            .map_err(|e| VfsError::other(format!("config: {e}")))?;
        let docs = SqliteDocStore::open(dir.join(INDEX_FILE))?;
        let objects = LocalObjectStore::open(dir.join(OBJECTS_DIR)).await?;
        tracing::debug!(dir = %dir.display(), naming = %config.naming, "opened local instance");
        Ok(Self::builder(tenant)
            .config(config)
            .doc_store(Arc::new(docs))
            .object_store(Arc::new(objects))
            .build())
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn doc_store(&self) -> &Arc<dyn DocStore> {
        &self.docs
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn indexer(&self) -> Arc<dyn Indexer> {
        let mut indexer = CouchIndexer::with_config(Arc::clone(&self.docs), &self.config);
        if let Some(r) = &self.revoker {
            indexer = indexer.with_revoker(Arc::clone(r));
        }
        Arc::new(indexer)
    }

    /// The storage backend, with the naming scheme of the config.
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        let indexer = self.indexer();
        let lock = self.locks.vfs_lock(&self.tenant, self.config.lock_timeout());
        let objects = Arc::clone(&self.objects);
        let ttl = Arc::clone(&self.ttl_store);
        let extractors = self.extractors.clone();
        let config = self.config.clone();
        let tenant = self.tenant.clone();
        match self.config.naming {
            NamingScheme::Flat => Arc::new(ObjectBackend::new(
                tenant, indexer, objects, ttl, lock, extractors, config, FlatNaming::new(),
            )),
            NamingScheme::FlatWithDirs => Arc::new(ObjectBackend::new(
                tenant, indexer, objects, ttl, lock, extractors, config, FlatNaming::with_dirs(),
            )),
            NamingScheme::Sharded => Arc::new(ObjectBackend::new(
                tenant, indexer, objects, ttl, lock, extractors, config, ShardedNaming,
            )),
        }
    }

    /// The VFS façade, with root and trash created.
    pub async fn vfs(&self) -> VfsResult<Vfs> {
        let backend = self.backend();
        backend.init().await?;
        Ok(Vfs::new(backend))
    }
}

/// Builder for [`Instance`]. Unset stores default to in-memory ones.
pub struct InstanceBuilder {
    tenant: String,
    config: VfsConfig,
    locks: Option<Arc<LockManager>>,
    ttl_store: Option<Arc<dyn TtlStore>>,
    docs: Option<Arc<dyn DocStore>>,
    objects: Option<Arc<dyn ObjectStore>>,
    extractors: ExtractorRegistry,
    revoker: Option<Arc<dyn SharingRevoker>>,
}

impl InstanceBuilder {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            config: VfsConfig::default(),
            locks: None,
            ttl_store: None,
            docs: None,
            objects: None,
            extractors: ExtractorRegistry::with_defaults(),
            revoker: None,
        }
    }

    pub fn config(mut self, config: VfsConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a lock manager between instances of the same process.
    pub fn lock_manager(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn ttl_store(mut self, store: Arc<dyn TtlStore>) -> Self {
        self.ttl_store = Some(store);
        self
    }

    pub fn doc_store(mut self, store: Arc<dyn DocStore>) -> Self {
        self.docs = Some(store);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(store);
        self
    }

    pub fn extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn sharing_revoker(mut self, revoker: Arc<dyn SharingRevoker>) -> Self {
        self.revoker = Some(revoker);
        self
    }

    pub fn build(self) -> Instance {
        Instance {
            tenant: self.tenant,
            config: self.config,
            locks: self.locks.unwrap_or_default(),
            ttl_store: self.ttl_store.unwrap_or_else(|| Arc::new(MemoryTtlStore::new())),
            docs: self.docs.unwrap_or_else(|| Arc::new(MemoryDocStore::new())),
            objects: self.objects.unwrap_or_else(|| Arc::new(MemoryObjectStore::new())),
            extractors: self.extractors,
            revoker: self.revoker,
        }
    }
}
