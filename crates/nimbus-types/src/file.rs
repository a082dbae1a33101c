//! File and directory documents.
//!
//! Both shapes serialize to the flat JSON objects kept in the metadata
//! store. [`IndexDoc`] carries the `"type"` discriminator (`"file"` or
//! `"directory"`) so one store query can return a mix of both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ModelResult;
use crate::hash::ContentHash;
use crate::ids::{ROOT_DIR_ID, ROOT_PATH, TRASH_DIR_ID, TRASH_DIR_NAME, TRASH_DIR_PATH};
use crate::mime::extract_mime_and_class;
use crate::path::{check_file_name, join};

/// Dynamic metadata produced by extractors.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A reference from another document to this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocReference {
    pub id: String,
    #[serde(rename = "type")]
    pub doctype: String,
}

impl DocReference {
    pub fn new(doctype: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            doctype: doctype.into(),
        }
    }
}

/// Deduplicate tags, keeping first occurrences and dropping blanks.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// A file: leaf of the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    pub rev: String,
    pub name: String,
    pub dir_id: String,
    /// Cached resolved path. Never authoritative; a stored value is a
    /// denormalized path that fsck reports.
    #[serde(rename = "path", default, skip_serializing_if = "Option::is_none")]
    pub fullpath: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    pub mime: String,
    pub class: String,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<DocReference>,
    #[serde(default)]
    pub internal_vfs_id: String,
}

impl FileDoc {
    /// Create a new, not yet persisted, file document.
    ///
    /// The id is left empty; the indexer assigns one on insert unless the
    /// caller pre-assigns it.
    pub fn new(
        name: impl Into<String>,
        dir_id: impl Into<String>,
        content_type: &str,
    ) -> ModelResult<Self> {
        let name = name.into();
        check_file_name(&name)?;
        let (mime, class) = extract_mime_and_class(content_type);
        let now = Utc::now();
        Ok(Self {
            id: String::new(),
            rev: String::new(),
            name,
            dir_id: dir_id.into(),
            fullpath: None,
            size: 0,
            content_hash: None,
            mime,
            class,
            executable: false,
            trashed: false,
            restore_path: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            referenced_by: Vec::new(),
            internal_vfs_id: String::new(),
        })
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    pub fn is_referenced_by(&self, doctype: &str) -> bool {
        self.referenced_by.iter().any(|r| r.doctype == doctype)
    }
}

/// A directory: internal node of the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    pub rev: String,
    pub name: String,
    #[serde(default)]
    pub dir_id: String,
    #[serde(rename = "path")]
    pub fullpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<DocReference>,
}

impl DirDoc {
    /// Create a new directory document under a parent at `parent_path`.
    pub fn new(
        name: impl Into<String>,
        dir_id: impl Into<String>,
        parent_path: &str,
    ) -> ModelResult<Self> {
        let name = name.into();
        check_file_name(&name)?;
        let now = Utc::now();
        Ok(Self {
            id: String::new(),
            rev: String::new(),
            fullpath: join(parent_path, &name),
            name,
            dir_id: dir_id.into(),
            restore_path: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            referenced_by: Vec::new(),
        })
    }

    /// The root directory document.
    pub fn root() -> Self {
        let now = Utc::now();
        Self {
            id: ROOT_DIR_ID.to_string(),
            rev: String::new(),
            name: String::new(),
            dir_id: String::new(),
            fullpath: ROOT_PATH.to_string(),
            restore_path: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            referenced_by: Vec::new(),
        }
    }

    /// The trash directory document.
    pub fn trash() -> Self {
        let now = Utc::now();
        Self {
            id: TRASH_DIR_ID.to_string(),
            rev: String::new(),
            name: TRASH_DIR_NAME.to_string(),
            dir_id: ROOT_DIR_ID.to_string(),
            fullpath: TRASH_DIR_PATH.to_string(),
            restore_path: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            referenced_by: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_DIR_ID
    }

    pub fn is_referenced_by(&self, doctype: &str) -> bool {
        self.referenced_by.iter().any(|r| r.doctype == doctype)
    }
}

/// Either kind of hierarchy document, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IndexDoc {
    #[serde(rename = "file")]
    File(FileDoc),
    #[serde(rename = "directory")]
    Dir(DirDoc),
}

impl IndexDoc {
    pub fn id(&self) -> &str {
        match self {
            IndexDoc::File(f) => &f.id,
            IndexDoc::Dir(d) => &d.id,
        }
    }

    pub fn rev(&self) -> &str {
        match self {
            IndexDoc::File(f) => &f.rev,
            IndexDoc::Dir(d) => &d.rev,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            IndexDoc::File(f) => &f.name,
            IndexDoc::Dir(d) => &d.name,
        }
    }

    pub fn dir_id(&self) -> &str {
        match self {
            IndexDoc::File(f) => &f.dir_id,
            IndexDoc::Dir(d) => &d.dir_id,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, IndexDoc::Dir(_))
    }

    pub fn as_file(&self) -> Option<&FileDoc> {
        match self {
            IndexDoc::File(f) => Some(f),
            IndexDoc::Dir(_) => None,
        }
    }

    pub fn as_dir(&self) -> Option<&DirDoc> {
        match self {
            IndexDoc::Dir(d) => Some(d),
            IndexDoc::File(_) => None,
        }
    }
}

impl From<FileDoc> for IndexDoc {
    fn from(f: FileDoc) -> Self {
        IndexDoc::File(f)
    }
}

impl From<DirDoc> for IndexDoc {
    fn from(d: DirDoc) -> Self {
        IndexDoc::Dir(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_file_derives_mime_and_class() {
        let f = FileDoc::new("a.pdf", ROOT_DIR_ID, "application/pdf; q=1").unwrap();
        assert_eq!(f.mime, "application/pdf");
        assert_eq!(f.class, "pdf");
        assert!(!f.trashed);
        assert_eq!(f.created_at, f.updated_at);
    }

    #[test]
    fn test_new_rejects_bad_name() {
        assert!(FileDoc::new("a/b", ROOT_DIR_ID, "").is_err());
        assert!(DirDoc::new("..", ROOT_DIR_ID, "/").is_err());
    }

    #[test]
    fn test_dir_fullpath() {
        let d = DirDoc::new("photos", ROOT_DIR_ID, "/").unwrap();
        assert_eq!(d.fullpath, "/photos");
        let sub = DirDoc::new("2024", "x", &d.fullpath).unwrap();
        assert_eq!(sub.fullpath, "/photos/2024");
    }

    #[test]
    fn test_tags_are_unique() {
        let f = FileDoc::new("a", ROOT_DIR_ID, "")
            .unwrap()
            .with_tags(["x", "y", "x", " "].map(String::from));
        assert_eq!(f.tags, vec!["x", "y"]);
    }

    #[test]
    fn test_index_doc_type_tag() {
        let mut f = FileDoc::new("a.txt", ROOT_DIR_ID, "text/plain").unwrap();
        f.id = "abc".into();
        let v = serde_json::to_value(IndexDoc::File(f)).unwrap();
        assert_eq!(v["type"], json!("file"));
        assert_eq!(v["_id"], json!("abc"));
        assert!(v.get("_rev").is_none());
        assert!(v.get("path").is_none());

        let v = serde_json::to_value(IndexDoc::Dir(DirDoc::trash())).unwrap();
        assert_eq!(v["type"], json!("directory"));
        assert_eq!(v["path"], json!(TRASH_DIR_PATH));
        let back: IndexDoc = serde_json::from_value(v).unwrap();
        assert!(back.is_dir());
        assert_eq!(back.id(), TRASH_DIR_ID);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let v = json!({
            "type": "directory", "_id": "d", "_rev": "1-a", "name": "d", "dir_id": ROOT_DIR_ID,
            "path": "/d", "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z", "_conflicts": ["1-b"]
        });
        let doc: IndexDoc = serde_json::from_value(v).unwrap();
        assert_eq!(doc.rev(), "1-a");
    }
}
