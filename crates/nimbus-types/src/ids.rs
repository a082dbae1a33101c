//! Reserved identifiers, doctypes and id generation.
//!
//! Document ids are 32 lowercase hex characters (a UUIDv4 without hyphens),
//! which is the shape the sharded object naming expects. Internal ids are
//! the backend-private handle a file's bytes live under; a fresh one is
//! minted on every content write.

/// Id of the root directory document.
pub const ROOT_DIR_ID: &str = "io.cozy.files.root-dir";

/// Id of the trash directory document.
pub const TRASH_DIR_ID: &str = "io.cozy.files.trash-dir";

/// Name of the trash directory under root.
pub const TRASH_DIR_NAME: &str = ".cozy_trash";

/// Absolute path of the root directory.
pub const ROOT_PATH: &str = "/";

/// Absolute path of the trash directory.
pub const TRASH_DIR_PATH: &str = "/.cozy_trash";

/// Document types stored in the metadata store.
pub mod doctypes {
    /// Files and directories.
    pub const FILES: &str = "io.cozy.files";
    /// Historical content snapshots.
    pub const FILES_VERSIONS: &str = "io.cozy.files.versions";
    /// Sharing relationships (referenced from `referenced_by`).
    pub const SHARINGS: &str = "io.cozy.sharings";
}

/// Length of an internal id in hex characters.
pub const INTERNAL_ID_LEN: usize = 16;

/// Generate a new document id.
pub fn new_doc_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Generate a new internal (backend) id.
pub fn new_internal_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(INTERNAL_ID_LEN);
    id
}

/// True for the root and trash directory ids.
pub fn is_reserved_id(id: &str) -> bool {
    id == ROOT_DIR_ID || id == TRASH_DIR_ID
}
