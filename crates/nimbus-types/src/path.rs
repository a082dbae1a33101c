//! Absolute slash-separated paths of the hierarchy.
//!
//! Paths are plain `&str` in cleaned form: they start with `/`, contain no
//! empty, `.` or `..` segment and have no trailing `/` except the root.

use crate::error::{ModelError, ModelResult};
use crate::ids::{ROOT_PATH, TRASH_DIR_PATH};

/// Longest accepted file name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Validate a single file or directory name.
pub fn check_file_name(name: &str) -> ModelResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.len() > MAX_NAME_LEN
        || name.contains(['/', '\0', '\n', '\r'])
    {
        return Err(ModelError::IllegalFilename(name.to_string()));
    }
    Ok(())
}

/// Validate that `path` is absolute and already cleaned.
pub fn check_abs_path(path: &str) -> ModelResult<()> {
    if !path.starts_with('/') || clean(path) != path {
        return Err(ModelError::IllegalPath(path.to_string()));
    }
    Ok(())
}

/// Lexically clean a path, rooting it at `/`.
///
/// `..` never climbs above the root.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return ROOT_PATH.to_string();
    }
    let mut out = String::with_capacity(path.len());
    for p in parts {
        out.push('/');
        out.push_str(p);
    }
    out
}

/// Join a cleaned parent path with a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Split a cleaned path into its parent path and last segment.
///
/// The root splits into `("/", "")`.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => (ROOT_PATH, &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (ROOT_PATH, path),
    }
}

/// True if `path` equals `ancestor` or lies beneath it.
pub fn is_under(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_PATH {
        return path.starts_with('/');
    }
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// True if `path` is strictly beneath `ancestor`.
pub fn is_strictly_under(path: &str, ancestor: &str) -> bool {
    path != ancestor && is_under(path, ancestor)
}

/// True if `path` is the trash directory or inside it.
pub fn is_in_trash(path: &str) -> bool {
    is_under(path, TRASH_DIR_PATH)
}

/// Replace the `old` prefix of `path` with `new`.
///
/// Returns `None` when `path` is not under `old`.
pub fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    if !is_under(path, old) {
        return None;
    }
    let rest = &path[old.len()..];
    if new == ROOT_PATH {
        Some(if rest.is_empty() { ROOT_PATH.to_string() } else { rest.to_string() })
    } else {
        Some(format!("{new}{rest}"))
    }
}
