//! Object store on the local filesystem.
//!
//! Object `a/b/c` lives at `<root>/a/b/c`. Directory marker `a/` is the
//! file `<root>/a/.dirmarker`. Writes go to `<root>/.tmp/` and are renamed
//! into place on commit, so a crashed upload never leaves a partial object
//! under a real name.

use async_trait::async_trait;
use nimbus_types::{ContentHash, ContentHasher};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{StoreError, StoreResult};
use crate::objects::{
    ObjectInfo, ObjectReader, ObjectStore, ObjectWriter, check_expected, check_marker_name,
    check_name,
};

const TMP_DIR: &str = ".tmp";
const MARKER_FILE: &str = ".dirmarker";

/// Local directory object store.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object name to its file on disk.
    fn resolve(&self, name: &str) -> StoreResult<PathBuf> {
        check_name(name)?;
        let (body, marker) = match name.strip_suffix('/') {
            Some(dir) => (dir, true),
            None => (name, false),
        };
        if body.split('/').next() == Some(TMP_DIR) || body.split('/').any(|s| s == MARKER_FILE) {
            return Err(StoreError::bad_request(format!("reserved object name: {name}")));
        }
        let mut path = self.root.clone();
        path.extend(body.split('/'));
        if marker {
            path.push(MARKER_FILE);
        }
        Ok(path)
    }

    /// Map a file on disk back to its object name.
    fn name_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let segs: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        match segs.split_last() {
            Some((last, dirs)) if last == MARKER_FILE => Some(format!("{}/", dirs.join("/"))),
            Some(_) => Some(segs.join("/")),
            None => None,
        }
    }

    /// Remove empty directories between `path`'s parent and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(&d).await.is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
    }

    async fn info_of(&self, name: String, path: &Path) -> StoreResult<ObjectInfo> {
        if name.ends_with('/') {
            return Ok(ObjectInfo {
                name,
                size: 0,
                content_hash: None,
            });
        }
        let mut file = fs::File::open(path).await?;
        let mut hasher = ContentHasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok(ObjectInfo {
            name,
            size,
            content_hash: Some(hasher.finalize()),
        })
    }

    /// Every object file under the root, excluding the temp area.
    async fn walk(&self) -> StoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if dir == self.root && entry.file_name() == TMP_DIR {
                        continue;
                    }
                    stack.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

fn not_found_as_store(name: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::not_found(name)
        } else {
            StoreError::Io(e)
        }
    }
}

struct LocalWriter {
    name: String,
    target: PathBuf,
    tmp: PathBuf,
    file: Option<fs::File>,
    hasher: ContentHasher,
    size: u64,
    expected: Option<ContentHash>,
}

impl LocalWriter {
    fn file(&mut self) -> StoreResult<&mut fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| StoreError::bad_request("writer already closed"))
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

#[async_trait]
impl ObjectWriter for LocalWriter {
    async fn write(&mut self, chunk: &[u8]) -> StoreResult<()> {
        self.file()?.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<ObjectInfo> {
        let hash = std::mem::take(&mut self.hasher).finalize();
        check_expected(&self.name, self.expected.as_ref(), &hash)?;
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StoreError::bad_request("writer already closed"))?;
        let publish = async {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            if let Some(parent) = self.target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&self.tmp, &self.target).await
        };
        if let Err(e) = publish.await {
            let _ = fs::remove_file(&self.tmp).await;
            return Err(e.into());
        }
        Ok(ObjectInfo {
            name: self.name.clone(),
            size: self.size,
            content_hash: Some(hash),
        })
    }

    async fn abort(mut self: Box<Self>) -> StoreResult<()> {
        if self.file.take().is_some() {
            fs::remove_file(&self.tmp).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn create(
        &self,
        name: &str,
        expected_hash: Option<&ContentHash>,
    ) -> StoreResult<Box<dyn ObjectWriter>> {
        let target = self.resolve(name)?;
        let tmp = self
            .root
            .join(TMP_DIR)
            .join(uuid::Uuid::new_v4().simple().to_string());
        let file = fs::File::create(&tmp).await?;
        Ok(Box::new(LocalWriter {
            name: name.to_string(),
            target,
            tmp,
            file: Some(file),
            hasher: ContentHasher::new(),
            size: 0,
            expected: expected_hash.cloned(),
        }))
    }

    async fn open(&self, name: &str) -> StoreResult<Box<dyn ObjectReader>> {
        let path = self.resolve(name)?;
        let file = fs::File::open(&path).await.map_err(not_found_as_store(name))?;
        Ok(Box::new(file))
    }

    async fn stat(&self, name: &str) -> StoreResult<ObjectInfo> {
        let path = self.resolve(name)?;
        let meta = fs::metadata(&path).await.map_err(not_found_as_store(name))?;
        if !meta.is_file() {
            return Err(StoreError::not_found(name));
        }
        self.info_of(name.to_string(), &path).await
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path).await.map_err(not_found_as_store(name))?;
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    async fn bulk_delete(&self, names: &[String]) -> StoreResult<()> {
        for name in names {
            match self.delete(name).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> StoreResult<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src, &dst).await.map_err(not_found_as_store(from))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        let mut out = Vec::new();
        for path in self.walk().await? {
            let Some(name) = self.name_of(&path) else {
                continue;
            };
            if name.starts_with(prefix) {
                out.push(self.info_of(name, &path).await?);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn total_size(&self) -> StoreResult<u64> {
        let mut total = 0;
        for path in self.walk().await? {
            total += fs::metadata(&path).await?.len();
        }
        Ok(total)
    }

    async fn put_marker(&self, name: &str) -> StoreResult<()> {
        check_marker_name(name)?;
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, b"").await?;
        Ok(())
    }
}
