//! Object store contract.
//!
//! A flat namespace of named blobs. Names are `/`-separated relative paths;
//! a name ending in `/` is a zero-length directory marker, used by naming
//! schemes that model directories in the backend.

use async_trait::async_trait;
use nimbus_types::ContentHash;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::error::{StoreError, StoreResult};

/// What the store knows about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    /// Digest of the content; `None` for directory markers.
    pub content_hash: Option<ContentHash>,
}

impl ObjectInfo {
    pub fn is_dir_marker(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Seekable reader over an object's bytes.
pub trait ObjectReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ObjectReader for T {}

/// Streaming writer for a new object.
///
/// Nothing is visible under the object's name until [`commit`] succeeds.
///
/// [`commit`]: ObjectWriter::commit
#[async_trait]
pub trait ObjectWriter: Send {
    /// Append a chunk.
    async fn write(&mut self, chunk: &[u8]) -> StoreResult<()>;

    /// Publish the object. Fails if an expected hash was given and differs.
    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo>;

    /// Discard everything written.
    async fn abort(self: Box<Self>) -> StoreResult<()>;
}

/// Named blob namespace.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start writing an object. An existing object of the same name is
    /// replaced at commit.
    async fn create(
        &self,
        name: &str,
        expected_hash: Option<&ContentHash>,
    ) -> StoreResult<Box<dyn ObjectWriter>>;

    /// Open an object for reading.
    async fn open(&self, name: &str) -> StoreResult<Box<dyn ObjectReader>>;

    /// Size and hash of one object.
    async fn stat(&self, name: &str) -> StoreResult<ObjectInfo>;

    /// Delete one object. Missing objects are `NotFound`.
    async fn delete(&self, name: &str) -> StoreResult<()>;

    /// Delete many objects; missing ones are skipped.
    async fn bulk_delete(&self, names: &[String]) -> StoreResult<()>;

    /// Copy an object's bytes under a new name.
    async fn copy(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Every object whose name starts with `prefix`, sorted by name.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectInfo>>;

    /// Total bytes held, markers excluded.
    async fn total_size(&self) -> StoreResult<u64>;

    /// Create a directory marker (`name` must end with `/`).
    async fn put_marker(&self, name: &str) -> StoreResult<()>;

    /// True when the object exists.
    async fn exists(&self, name: &str) -> StoreResult<bool> {
        match self.stat(name).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject names that are empty, absolute or contain `.`/`..` segments.
pub(crate) fn check_name(name: &str) -> StoreResult<()> {
    let body = name.strip_suffix('/').unwrap_or(name);
    if body.is_empty()
        || body.starts_with('/')
        || body.split('/').any(|s| s.is_empty() || s == "." || s == "..")
    {
        return Err(StoreError::bad_request(format!("invalid object name: {name:?}")));
    }
    Ok(())
}

pub(crate) fn check_marker_name(name: &str) -> StoreResult<()> {
    if !name.ends_with('/') {
        return Err(StoreError::bad_request(format!("marker name must end with '/': {name:?}")));
    }
    check_name(name)
}

pub(crate) fn check_expected(
    name: &str,
    expected: Option<&ContentHash>,
    actual: &ContentHash,
) -> StoreResult<()> {
    match expected {
        Some(e) if e != actual => Err(StoreError::bad_request(format!(
            "content hash mismatch for {name}: expected {e}, got {actual}"
        ))),
        _ => Ok(()),
    }
}
