//! Object naming strategies.
//!
//! An object name is derived from the file id and the internal id of one
//! content write, so every write lands under a fresh name and versions keep
//! their bytes where they were written.

use nimbus_types::ids::INTERNAL_ID_LEN;

/// What an object name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedObject {
    /// Marker of a directory.
    DirMarker(String),
    /// Content of one write of a file.
    Content { file_id: String, internal_id: String },
}

/// Maps documents to object names and back.
pub trait ObjectNaming: Send + Sync + 'static {
    /// Name of the content written under `internal_id` for `file_id`.
    fn object_name(&self, file_id: &str, internal_id: &str) -> String;

    /// Marker object for a directory, when directories are modeled.
    fn dir_marker(&self, dir_id: &str) -> Option<String>;

    /// Inverse of [`object_name`](Self::object_name) and
    /// [`dir_marker`](Self::dir_marker).
    fn parse(&self, name: &str) -> Option<ParsedObject>;
}

/// `<file id>/<internal id>`, optionally with `<dir id>/` markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatNaming {
    pub with_dirs: bool,
}

impl FlatNaming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dirs() -> Self {
        Self { with_dirs: true }
    }
}

fn parse_flat(name: &str) -> Option<ParsedObject> {
    let (file_id, internal_id) = name.split_once('/')?;
    if file_id.is_empty() || internal_id.is_empty() || internal_id.contains('/') {
        return None;
    }
    Some(ParsedObject::Content {
        file_id: file_id.to_string(),
        internal_id: internal_id.to_string(),
    })
}

impl ObjectNaming for FlatNaming {
    fn object_name(&self, file_id: &str, internal_id: &str) -> String {
        format!("{file_id}/{internal_id}")
    }

    fn dir_marker(&self, dir_id: &str) -> Option<String> {
        self.with_dirs.then(|| format!("{dir_id}/"))
    }

    fn parse(&self, name: &str) -> Option<ParsedObject> {
        if let Some(dir_id) = name.strip_suffix('/') {
            return (self.with_dirs && !dir_id.is_empty() && !dir_id.contains('/'))
                .then(|| ParsedObject::DirMarker(dir_id.to_string()));
        }
        parse_flat(name)
    }
}

/// `<id[0..22]>/<id[22..27]>/<id[27..]>/<internal id>` for 32-char ids.
///
/// Other ids fall back to the flat layout. Directories are not modeled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardedNaming;

const SHARDED_ID_LEN: usize = 32;

impl ObjectNaming for ShardedNaming {
    fn object_name(&self, file_id: &str, internal_id: &str) -> String {
        if file_id.len() == SHARDED_ID_LEN && file_id.is_ascii() {
            format!(
                "{}/{}/{}/{internal_id}",
                &file_id[..22],
                &file_id[22..27],
                &file_id[27..]
            )
        } else {
            format!("{file_id}/{internal_id}")
        }
    }

    fn dir_marker(&self, _dir_id: &str) -> Option<String> {
        None
    }

    fn parse(&self, name: &str) -> Option<ParsedObject> {
        let parts: Vec<&str> = name.split('/').collect();
        match parts.as_slice() {
            [a, b, c, internal]
                if a.len() == 22 && b.len() == 5 && c.len() == SHARDED_ID_LEN - 27 && !internal.is_empty() =>
            {
                Some(ParsedObject::Content {
                    file_id: format!("{a}{b}{c}"),
                    internal_id: internal.to_string(),
                })
            }
            [_, _] => parse_flat(name),
            _ => None,
        }
    }
}

/// True when `internal_id` has the shape the backend mints.
pub fn is_internal_id(internal_id: &str) -> bool {
    internal_id.len() == INTERNAL_ID_LEN && internal_id.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_flat() {
        let n = FlatNaming::new();
        assert_eq!(n.object_name("f", "i"), "f/i");
        assert_eq!(n.dir_marker("d"), None);
        assert_eq!(
            n.parse("f/i"),
            Some(ParsedObject::Content {
                file_id: "f".into(),
                internal_id: "i".into()
            })
        );
        assert_eq!(n.parse("d/"), None);
        assert_eq!(n.parse("a/b/c"), None);
    }

    #[test]
    fn test_flat_with_dirs() {
        let n = FlatNaming::with_dirs();
        assert_eq!(n.dir_marker("d").as_deref(), Some("d/"));
        assert_eq!(n.parse("d/"), Some(ParsedObject::DirMarker("d".into())));
    }

    #[test]
    fn test_sharded_layout() {
        let n = ShardedNaming;
        let name = n.object_name(ID, "00ff00ff00ff00ff");
        assert_eq!(name, "0123456789abcdef012345/6789a/bcdef/00ff00ff00ff00ff");
        assert_eq!(
            n.parse(&name),
            Some(ParsedObject::Content {
                file_id: ID.into(),
                internal_id: "00ff00ff00ff00ff".into()
            })
        );
    }

    #[test]
    fn test_sharded_falls_back_for_short_ids() {
        let n = ShardedNaming;
        assert_eq!(n.object_name("short", "i"), "short/i");
        assert_eq!(
            n.parse("short/i"),
            Some(ParsedObject::Content {
                file_id: "short".into(),
                internal_id: "i".into()
            })
        );
        assert_eq!(n.parse("a/b/c"), None);
    }

    #[test]
    fn test_internal_id_shape() {
        assert!(is_internal_id(&nimbus_types::new_internal_id()));
        assert!(!is_internal_id("xyz"));
    }
}
