//! In-memory object store.

use async_trait::async_trait;
use nimbus_types::{ContentHash, ContentHasher};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::objects::{
    ObjectInfo, ObjectReader, ObjectStore, ObjectWriter, check_expected, check_marker_name,
    check_name,
};

#[derive(Debug, Clone)]
struct Object {
    data: Arc<Vec<u8>>,
    hash: Option<ContentHash>,
}

impl Object {
    fn info(&self, name: &str) -> ObjectInfo {
        ObjectInfo {
            name: name.to_string(),
            size: self.data.len() as u64,
            content_hash: self.hash.clone(),
        }
    }
}

type Objects = Arc<RwLock<BTreeMap<String, Object>>>;

/// In-memory object store. Cloning shares the namespace.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Objects,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a complete object, bypassing the writer (for tests and repairs).
    pub fn put(&self, name: &str, data: &[u8]) {
        self.objects.write().insert(
            name.to_string(),
            Object {
                data: Arc::new(data.to_vec()),
                hash: Some(ContentHash::of(data)),
            },
        );
    }
}

struct MemoryWriter {
    name: String,
    buf: Vec<u8>,
    hasher: ContentHasher,
    expected: Option<ContentHash>,
    objects: Objects,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: &[u8]) -> StoreResult<()> {
        self.hasher.update(chunk);
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo> {
        let this = *self;
        let hash = this.hasher.finalize();
        check_expected(&this.name, this.expected.as_ref(), &hash)?;
        let object = Object {
            data: Arc::new(this.buf),
            hash: Some(hash),
        };
        let info = object.info(&this.name);
        this.objects.write().insert(this.name, object);
        Ok(info)
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create(
        &self,
        name: &str,
        expected_hash: Option<&ContentHash>,
    ) -> StoreResult<Box<dyn ObjectWriter>> {
        check_name(name)?;
        Ok(Box::new(MemoryWriter {
            name: name.to_string(),
            buf: Vec::new(),
            hasher: ContentHasher::new(),
            expected: expected_hash.cloned(),
            objects: Arc::clone(&self.objects),
        }))
    }

    async fn open(&self, name: &str) -> StoreResult<Box<dyn ObjectReader>> {
        let objects = self.objects.read();
        let object = objects.get(name).ok_or_else(|| StoreError::not_found(name))?;
        Ok(Box::new(Cursor::new(object.data.as_ref().clone())))
    }

    async fn stat(&self, name: &str) -> StoreResult<ObjectInfo> {
        let objects = self.objects.read();
        objects
            .get(name)
            .map(|o| o.info(name))
            .ok_or_else(|| StoreError::not_found(name))
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        match self.objects.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(name)),
        }
    }

    async fn bulk_delete(&self, names: &[String]) -> StoreResult<()> {
        let mut objects = self.objects.write();
        for name in names {
            objects.remove(name);
        }
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> StoreResult<()> {
        check_name(to)?;
        let mut objects = self.objects.write();
        let object = objects.get(from).cloned().ok_or_else(|| StoreError::not_found(from))?;
        objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, o)| o.info(name))
            .collect())
    }

    async fn total_size(&self) -> StoreResult<u64> {
        let objects = self.objects.read();
        Ok(objects.values().map(|o| o.data.len() as u64).sum())
    }

    async fn put_marker(&self, name: &str) -> StoreResult<()> {
        check_marker_name(name)?;
        self.objects.write().insert(
            name.to_string(),
            Object {
                data: Arc::new(Vec::new()),
                hash: None,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    #[tokio::test]
    async fn test_write_commit_read() {
        let store = MemoryObjectStore::new();
        let mut w = store.create("f/i", None).await.unwrap();
        w.write(b"hello ").await.unwrap();
        w.write(b"world").await.unwrap();
        let info = w.commit().await.unwrap();
        assert_eq!(info.size, 11);
        assert_eq!(info.content_hash, Some(ContentHash::of(b"hello world")));

        let mut r = store.open("f/i").await.unwrap();
        r.seek(std::io::SeekFrom::Start(6)).await.unwrap();
        let mut s = String::new();
        r.read_to_string(&mut s).await.unwrap();
        assert_eq!(s, "world");
    }

    #[tokio::test]
    async fn test_uncommitted_is_invisible() {
        let store = MemoryObjectStore::new();
        let mut w = store.create("f/i", None).await.unwrap();
        w.write(b"x").await.unwrap();
        assert!(!store.exists("f/i").await.unwrap());
        w.abort().await.unwrap();
        assert!(!store.exists("f/i").await.unwrap());
    }

    #[tokio::test]
    async fn test_expected_hash_mismatch() {
        let store = MemoryObjectStore::new();
        let wrong = ContentHash::of(b"other");
        let mut w = store.create("f/i", Some(&wrong)).await.unwrap();
        w.write(b"data").await.unwrap();
        assert!(matches!(w.commit().await, Err(StoreError::BadRequest(_))));
        assert!(!store.exists("f/i").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_prefix_and_total() {
        let store = MemoryObjectStore::new();
        store.put("a/1", b"xx");
        store.put("a/2", b"yyy");
        store.put("b/1", b"z");
        store.put_marker("d/").await.unwrap();
        let names: Vec<_> = store.list("a/").await.unwrap().into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["a/1", "a/2"]);
        assert_eq!(store.total_size().await.unwrap(), 6);
        assert!(store.stat("d/").await.unwrap().is_dir_marker());
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let store = MemoryObjectStore::new();
        store.put("a/1", b"data");
        store.copy("a/1", "b/1").await.unwrap();
        store.delete("a/1").await.unwrap();
        assert!(matches!(store.delete("a/1").await, Err(StoreError::NotFound(_))));
        assert_eq!(store.stat("b/1").await.unwrap().size, 4);
        store.bulk_delete(&["b/1".into(), "missing".into()]).await.unwrap();
        assert_eq!(store.total_size().await.unwrap(), 0);
    }
}
