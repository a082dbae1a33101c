//! Historical content snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::file::{FileDoc, Metadata};
use crate::hash::ContentHash;

/// A retained prior content snapshot of a file.
///
/// The id is `<file id>/<internal id>`: the bytes stay in the backend under
/// the internal id they were written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    pub rev: String,
    pub file_id: String,
    pub internal_vfs_id: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Version {
    /// Build the id of a version.
    pub fn version_id(file_id: &str, internal_id: &str) -> String {
        format!("{file_id}/{internal_id}")
    }

    /// Snapshot the current content of `file`, before it is overwritten.
    ///
    /// The snapshot is dated by the last content update of the file.
    pub fn from_file(file: &FileDoc) -> Self {
        Self {
            id: Self::version_id(&file.id, &file.internal_vfs_id),
            rev: String::new(),
            file_id: file.id.clone(),
            internal_vfs_id: file.internal_vfs_id.clone(),
            size: file.size,
            content_hash: file.content_hash.clone(),
            tags: Vec::new(),
            metadata: file.metadata.clone(),
            created_at: file.updated_at,
        }
    }

    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }
}
