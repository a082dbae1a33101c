//! Entity model for the nimbus virtual file system.
//!
//! This crate holds the persisted shapes of the hierarchy and the rules they
//! obey: reserved ids, name/path/MIME/time validation, content hashing and
//! the sparse patch used to update documents. It has **no internal nimbus
//! dependencies**; the store and VFS crates build on it.
//!
//! # Hierarchy Overview
//!
//! ```text
//! DirDoc (io.cozy.files.root-dir, "/")
//!     └── DirDoc (io.cozy.files.trash-dir, "/.cozy_trash")
//!     └── DirDoc (fullpath authoritative)
//!           └── FileDoc (path derived from the parent chain)
//!                 └── Version (file_id/internal_vfs_id, prior content)
//! ```
//!
//! # Key Types
//!
//! |------------------|-----------------------------------------------|
//! | Type             | Purpose                                       |
//! |------------------|-----------------------------------------------|
//! | [`FileDoc`]      | Leaf document with size, hash, MIME and tags  |
//! | [`DirDoc`]       | Directory document with authoritative path    |
//! | [`IndexDoc`]     | Either of the above, tagged by `type`         |
//! | [`Version`]      | Snapshot of superseded file content           |
//! | [`DocPatch`]     | Sparse update applied over an existing doc    |
//! | [`ContentHash`]  | SHA-256 digest of full content (hex on wire)  |
//! | [`Metadata`]     | Dynamic extractor output, string keyed        |
//! |------------------|-----------------------------------------------|

pub mod disposition;
pub mod error;
pub mod file;
pub mod hash;
pub mod ids;
pub mod mime;
pub mod patch;
pub mod path;
pub mod version;

// Re-export primary types at crate root for convenience.
pub use disposition::content_disposition;
pub use error::{ModelError, ModelResult};
pub use file::{DirDoc, DocReference, FileDoc, IndexDoc, Metadata, normalize_tags};
pub use hash::{ContentHash, ContentHasher};
pub use ids::{
    ROOT_DIR_ID, ROOT_PATH, TRASH_DIR_ID, TRASH_DIR_NAME, TRASH_DIR_PATH, is_reserved_id,
    new_doc_id, new_internal_id,
};
pub use mime::{DEFAULT_CONTENT_TYPE, extract_mime_and_class, guess_mime, validate_mime};
pub use patch::{DocPatch, apply_dir_patch, apply_file_patch};
pub use version::Version;
