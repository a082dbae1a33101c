//! VFS error types.

use std::io;
use thiserror::Error;

use nimbus_store::StoreError;
use nimbus_types::ModelError;

/// VFS error type.
///
/// Validation and precondition kinds are user errors and never retried.
/// [`VfsError::is_transient`] singles out the infrastructure failures a
/// caller may retry.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path or id does not resolve, or resolves to the wrong type.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name collision within a parent.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Quota headroom or size limit would be exceeded.
    #[error("file too big")]
    FileTooBig,

    /// Declared and written sizes disagree.
    #[error("content length does not match the declared size")]
    ContentLengthMismatch,

    /// Declared and computed hashes disagree.
    #[error("content hash does not match the declared hash")]
    InvalidHash,

    /// Invalid file or directory name.
    #[error("illegal file name: {0}")]
    IllegalFilename(String),

    /// Relative or non-cleaned path.
    #[error("illegal path: {0}")]
    IllegalPath(String),

    /// Malformed MIME type.
    #[error("illegal mime type: {0}")]
    IllegalMime(String),

    /// Update timestamp before creation timestamp.
    #[error("illegal time: {0}")]
    IllegalTime(String),

    /// Lost an optimistic-concurrency race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation needs the file out of the trash.
    #[error("file is in the trash")]
    FileInTrash,

    /// Operation needs the file in the trash.
    #[error("file is not in the trash")]
    FileNotInTrash,

    /// The parent directory is in the trash.
    #[error("parent directory is in the trash")]
    ParentInTrash,

    /// Directory still has children.
    #[error("directory not empty: {0}")]
    DirNotEmpty(String),

    /// The store returned an aggregate of an unexpected shape.
    #[error("metadata store returned an unexpected state: {0}")]
    WrongStoreState(String),

    /// Unwinds a fail-fast fsck scan.
    #[error("fsck stopped at first finding")]
    FsckFailFast,

    /// Move of a reserved directory or into its own subtree.
    #[error("forbidden move: {0}")]
    ForbiddenDocMove(String),

    /// Lock not acquired in time.
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// Metadata or object store failure.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create a Conflict error.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create a DirNotEmpty error.
    pub fn dir_not_empty(path: impl Into<String>) -> Self {
        Self::DirNotEmpty(path.into())
    }

    /// Create a WrongStoreState error.
    pub fn wrong_store_state(what: impl Into<String>) -> Self {
        Self::WrongStoreState(what.into())
    }

    /// Create a ForbiddenDocMove error.
    pub fn forbidden_move(what: impl Into<String>) -> Self {
        Self::ForbiddenDocMove(what.into())
    }

    /// Create an IllegalPath error.
    pub fn illegal_path(path: impl Into<String>) -> Self {
        Self::IllegalPath(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for infrastructure failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            VfsError::Store(e) => e.is_transient(),
            VfsError::LockTimeout(_) => true,
            VfsError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// True for errors raised by the metadata layer rather than by content
    /// checks or the object store.
    pub fn is_index_error(&self) -> bool {
        matches!(
            self,
            VfsError::Conflict(_) | VfsError::WrongStoreState(_) | VfsError::Store(_)
        )
    }
}

impl From<StoreError> for VfsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => VfsError::NotFound(what),
            StoreError::Conflict(what) => VfsError::Conflict(what),
            other => VfsError::Store(other),
        }
    }
}

impl From<ModelError> for VfsError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::IllegalFilename(n) => VfsError::IllegalFilename(n),
            ModelError::IllegalPath(p) => VfsError::IllegalPath(p),
            ModelError::IllegalMime(m) => VfsError::IllegalMime(m),
            e @ ModelError::IllegalTime { .. } => VfsError::IllegalTime(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for VfsError {
    fn from(e: serde_json::Error) -> Self {
        VfsError::Store(StoreError::Serialization(e))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::DirNotEmpty(msg) => io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg),
            VfsError::FileTooBig => io::Error::new(io::ErrorKind::StorageFull, "file too big"),
            VfsError::LockTimeout(msg) => io::Error::new(io::ErrorKind::TimedOut, msg),
            VfsError::IllegalFilename(msg)
            | VfsError::IllegalPath(msg)
            | VfsError::IllegalMime(msg)
            | VfsError::IllegalTime(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_vfs_kinds() {
        assert!(matches!(
            VfsError::from(StoreError::not_found("x")),
            VfsError::NotFound(_)
        ));
        assert!(matches!(
            VfsError::from(StoreError::conflict("x")),
            VfsError::Conflict(_)
        ));
        let e = VfsError::from(StoreError::Unavailable("down".into()));
        assert!(e.is_transient());
        assert!(e.is_index_error());
    }

    #[test]
    fn test_user_errors_are_not_transient() {
        for e in [
            VfsError::FileTooBig,
            VfsError::InvalidHash,
            VfsError::IllegalPath("x".into()),
            VfsError::dir_not_empty("/a"),
        ] {
            assert!(!e.is_transient(), "{e}");
        }
    }

    #[test]
    fn test_model_error_conversion() {
        let e: VfsError = ModelError::IllegalFilename("..".into()).into();
        assert!(matches!(e, VfsError::IllegalFilename(_)));
    }
}
