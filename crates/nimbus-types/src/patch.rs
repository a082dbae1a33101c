//! Sparse document updates.

use chrono::{DateTime, Utc};

use crate::error::{ModelError, ModelResult};
use crate::file::{DirDoc, FileDoc, normalize_tags};
use crate::hash::ContentHash;
use crate::mime::extract_mime_and_class;
use crate::path::{check_file_name, join};

/// A sparse update request. Unset fields keep the pre-patch value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocPatch {
    pub name: Option<String>,
    pub dir_id: Option<String>,
    /// `Some(None)` clears the restore path.
    pub restore_path: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub executable: Option<bool>,
    pub content_hash: Option<ContentHash>,
    pub class: Option<String>,
    pub mime: Option<String>,
}

impl DocPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn move_to(dir_id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            dir_id: Some(dir_id.into()),
            name,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn check_time(created: DateTime<Utc>, updated: DateTime<Utc>) -> ModelResult<()> {
    if updated < created {
        return Err(ModelError::IllegalTime {
            created: created.to_rfc3339(),
            updated: updated.to_rfc3339(),
        });
    }
    Ok(())
}

/// Apply a patch to a file, producing the new document.
///
/// The cached path is dropped; the indexer recomputes it from the parent.
pub fn apply_file_patch(old: &FileDoc, patch: &DocPatch) -> ModelResult<FileDoc> {
    let mut new = old.clone();
    if let Some(name) = &patch.name {
        check_file_name(name)?;
        new.name = name.clone();
    }
    if let Some(dir_id) = &patch.dir_id {
        new.dir_id = dir_id.clone();
    }
    if let Some(restore_path) = &patch.restore_path {
        new.restore_path = restore_path.clone();
    }
    if let Some(tags) = &patch.tags {
        new.tags = normalize_tags(tags.iter().cloned());
    }
    if let Some(executable) = patch.executable {
        new.executable = executable;
    }
    if let Some(hash) = &patch.content_hash {
        new.content_hash = Some(hash.clone());
    }
    if let Some(mime) = &patch.mime {
        let (mime, class) = extract_mime_and_class(mime);
        new.mime = mime;
        new.class = class;
    }
    if let Some(class) = &patch.class {
        new.class = class.clone();
    }
    new.updated_at = patch.updated_at.unwrap_or(old.updated_at);
    check_time(new.created_at, new.updated_at)?;
    new.fullpath = None;
    Ok(new)
}

/// Apply a patch to a directory whose (possibly new) parent lives at
/// `parent_path`.
pub fn apply_dir_patch(old: &DirDoc, patch: &DocPatch, parent_path: &str) -> ModelResult<DirDoc> {
    let mut new = old.clone();
    if let Some(name) = &patch.name {
        check_file_name(name)?;
        new.name = name.clone();
    }
    if let Some(dir_id) = &patch.dir_id {
        new.dir_id = dir_id.clone();
    }
    if let Some(restore_path) = &patch.restore_path {
        new.restore_path = restore_path.clone();
    }
    if let Some(tags) = &patch.tags {
        new.tags = normalize_tags(tags.iter().cloned());
    }
    new.updated_at = patch.updated_at.unwrap_or(old.updated_at);
    check_time(new.created_at, new.updated_at)?;
    new.fullpath = join(parent_path, &new.name);
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ROOT_DIR_ID;
    use chrono::Duration;

    fn file() -> FileDoc {
        let mut f = FileDoc::new("a.txt", ROOT_DIR_ID, "text/plain")
            .unwrap()
            .with_tags(["keep".to_string()]);
        f.fullpath = Some("/a.txt".into());
        f
    }

    #[test]
    fn test_unset_fields_keep_old_values() {
        let old = file();
        let new = apply_file_patch(&old, &DocPatch::rename("b.txt")).unwrap();
        assert_eq!(new.name, "b.txt");
        assert_eq!(new.tags, old.tags);
        assert_eq!(new.dir_id, old.dir_id);
        assert_eq!(new.updated_at, old.updated_at);
        assert_eq!(new.fullpath, None);
    }

    #[test]
    fn test_mime_patch_rederives_class() {
        let patch = DocPatch {
            mime: Some("application/zip".into()),
            ..Default::default()
        };
        let new = apply_file_patch(&file(), &patch).unwrap();
        assert_eq!(new.class, "zip");
    }

    #[test]
    fn test_updated_before_created_is_illegal() {
        let old = file();
        let patch = DocPatch {
            updated_at: Some(old.created_at - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(matches!(
            apply_file_patch(&old, &patch),
            Err(ModelError::IllegalTime { .. })
        ));
    }

    #[test]
    fn test_restore_path_can_be_cleared() {
        let mut old = file();
        old.restore_path = Some("/".into());
        let patch = DocPatch {
            restore_path: Some(None),
            ..Default::default()
        };
        assert_eq!(apply_file_patch(&old, &patch).unwrap().restore_path, None);
    }

    #[test]
    fn test_dir_patch_recomputes_fullpath() {
        let old = DirDoc::new("a", ROOT_DIR_ID, "/").unwrap();
        let patch = DocPatch::move_to("other", Some("b".into()));
        let new = apply_dir_patch(&old, &patch, "/x").unwrap();
        assert_eq!(new.fullpath, "/x/b");
        assert_eq!(new.dir_id, "other");
    }

    #[test]
    fn test_bad_name_rejected() {
        assert!(apply_file_patch(&file(), &DocPatch::rename("")).is_err());
    }
}
