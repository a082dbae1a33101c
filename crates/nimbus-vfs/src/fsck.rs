//! Consistency checking of the index and the backend.
//!
//! Pass 1 checks the index against itself on a [`Tree`]: conflicts, the
//! reserved root and trash, duplicate names, directory paths, trash flags,
//! orphans and cycles, and versions whose file is gone. Pass 2 (run by the
//! storage backend, which knows its object naming) reconciles the index
//! with the objects actually stored.
//!
//! Findings are never errors. They go to a caller-supplied sink; in
//! fail-fast mode the first finding unwinds the scan with
//! [`VfsError::FsckFailFast`], which [`run_checks`] turns back into success.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use strum::{Display, EnumString};

use nimbus_types::path::{is_in_trash, join};
use nimbus_types::{TRASH_DIR_ID, Version};

use crate::error::{VfsError, VfsResult};
use crate::indexer::tree::Tree;

/// Kind of finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FsckKind {
    IndexConflict,
    IndexMissingRoot,
    IndexMissingTrash,
    IndexDuplicateName,
    IndexBadFullpath,
    IndexFileWithoutParent,
    IndexBadTrashed,
    IndexOrphanTree,
    IndexCycle,
    IndexFileWithPath,
    VersionWithoutFile,
    MissingInIndex,
    MissingInBackend,
    TypeMismatch,
    ContentMismatch,
    OrphanVersionContent,
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsckLog {
    #[serde(rename = "type")]
    pub kind: FsckKind,
    /// Document (or version) id concerned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Backend object concerned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl FsckLog {
    pub fn new(kind: FsckKind) -> Self {
        Self {
            kind,
            id: None,
            path: None,
            object: None,
            expected: None,
            actual: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn object(mut self, name: impl Into<String>) -> Self {
        self.object = Some(name.into());
        self
    }

    pub fn mismatch(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }
}

/// Receives findings as they are produced.
pub type FsckSink<'a> = &'a mut (dyn FnMut(FsckLog) + Send);

/// Hand a finding to the sink, unwinding in fail-fast mode.
pub(crate) fn report(sink: &mut (dyn FnMut(FsckLog) + Send), log: FsckLog, fail_fast: bool) -> VfsResult<()> {
    tracing::debug!(kind = %log.kind, id = ?log.id, "fsck finding");
    sink(log);
    if fail_fast {
        return Err(VfsError::FsckFailFast);
    }
    Ok(())
}

/// Run a check, treating the fail-fast sentinel as a normal stop.
pub async fn run_checks<F>(checks: F) -> VfsResult<()>
where
    F: std::future::Future<Output = VfsResult<()>>,
{
    match checks.await {
        Err(VfsError::FsckFailFast) => Ok(()),
        other => other,
    }
}

/// Pass 1 over a built tree. Flags orphan and cycle nodes in place.
pub fn check_tree_integrity(
    tree: &mut Tree,
    sink: FsckSink<'_>,
    fail_fast: bool,
) -> VfsResult<()> {
    // Conflicts, in a stable order
    let mut conflicted: Vec<_> = tree
        .nodes
        .values()
        .filter(|n| !n.conflicts.is_empty())
        .map(|n| (n.id().to_string(), n.conflicts.join(",")))
        .collect();
    conflicted.sort();
    for (id, revs) in conflicted {
        report(sink, FsckLog::new(FsckKind::IndexConflict).id(id).mismatch("", revs), fail_fast)?;
    }

    let Some(root_id) = tree.root.clone() else {
        return report(sink, FsckLog::new(FsckKind::IndexMissingRoot), fail_fast);
    };

    if !tree.get(TRASH_DIR_ID).is_some_and(|n| n.is_dir) {
        report(sink, FsckLog::new(FsckKind::IndexMissingTrash).id(TRASH_DIR_ID), fail_fast)?;
    }

    // Walk down from the root; whatever is left afterwards is unreachable.
    let mut remaining: HashSet<String> = tree.nodes.keys().cloned().collect();
    remaining.remove(&root_id);
    let mut stack = vec![(root_id, "/".to_string())];
    while let Some((dir_id, dir_path)) = stack.pop() {
        let Some(dir) = tree.get(&dir_id) else {
            continue;
        };
        let mut children = dir.children.clone();
        children.sort();
        let mut names: HashMap<String, String> = HashMap::new();
        for child_id in children {
            if !remaining.remove(&child_id) {
                continue;
            }
            let Some(child) = tree.get(&child_id) else {
                continue;
            };
            let name = child.doc.name().to_string();
            let path = join(&dir_path, &name);
            if let Some(first) = names.insert(name, child_id.clone()) {
                report(
                    sink,
                    FsckLog::new(FsckKind::IndexDuplicateName)
                        .id(&child_id)
                        .path(&path)
                        .mismatch(first, &child_id),
                    fail_fast,
                )?;
            }
            match &child.doc {
                nimbus_types::IndexDoc::Dir(d) => {
                    if d.fullpath != path {
                        report(
                            sink,
                            FsckLog::new(FsckKind::IndexBadFullpath)
                                .id(&child_id)
                                .path(&d.fullpath)
                                .mismatch(&path, &d.fullpath),
                            fail_fast,
                        )?;
                    }
                    stack.push((child_id, path));
                }
                nimbus_types::IndexDoc::File(f) => {
                    if f.trashed != is_in_trash(&path) {
                        report(
                            sink,
                            FsckLog::new(FsckKind::IndexBadTrashed)
                                .id(&child_id)
                                .path(&path)
                                .mismatch(is_in_trash(&path).to_string(), f.trashed.to_string()),
                            fail_fast,
                        )?;
                    }
                    if child.has_explicit_path {
                        report(
                            sink,
                            FsckLog::new(FsckKind::IndexFileWithPath).id(&child_id).path(&path),
                            fail_fast,
                        )?;
                    }
                }
            }
        }
    }

    classify_unreachable(tree, remaining, sink, fail_fast)
}

/// Split unreachable nodes into orphan subtrees and cycles.
fn classify_unreachable(
    tree: &mut Tree,
    remaining: HashSet<String>,
    sink: FsckSink<'_>,
    fail_fast: bool,
) -> VfsResult<()> {
    let mut leftovers: Vec<String> = remaining.iter().cloned().collect();
    leftovers.sort();
    let mut classified: HashSet<String> = HashSet::new();

    for start in leftovers {
        if classified.contains(&start) {
            continue;
        }
        // Climb parent links until leaving the unreachable set or looping.
        let mut chain: Vec<String> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut cur = start.clone();
        let mut cycle: Option<Vec<String>> = None;
        let top = loop {
            if classified.contains(&cur) {
                break None;
            }
            if let Some(&pos) = seen.get(&cur) {
                cycle = Some(chain[pos..].to_vec());
                break None;
            }
            seen.insert(cur.clone(), chain.len());
            chain.push(cur.clone());
            let parent = tree.get(&cur).map(|n| n.doc.dir_id().to_string()).unwrap_or_default();
            let parent_is_dir = tree.get(&parent).is_some_and(|n| n.is_dir);
            if parent_is_dir && remaining.contains(&parent) {
                cur = parent;
            } else {
                break Some(cur);
            }
        };

        let heads: Vec<String> = match (&cycle, top) {
            (Some(members), _) => {
                let mut members = members.clone();
                members.sort();
                for id in &members {
                    if let Some(n) = tree.nodes.get_mut(id) {
                        n.has_cycle = true;
                    }
                    let path = tree.get(id).and_then(|n| n.fullpath()).map(str::to_string);
                    let mut log = FsckLog::new(FsckKind::IndexCycle).id(id);
                    log.path = path;
                    report(sink, log, fail_fast)?;
                }
                members
            }
            (None, Some(top)) => {
                let Some(node) = tree.get(&top) else {
                    continue;
                };
                let kind = if node.is_dir {
                    FsckKind::IndexOrphanTree
                } else {
                    FsckKind::IndexFileWithoutParent
                };
                let mut log = FsckLog::new(kind)
                    .id(&top)
                    .mismatch(node.doc.dir_id(), "");
                log.path = node.fullpath().map(str::to_string);
                report(sink, log, fail_fast)?;
                vec![top]
            }
            // Joined a component classified earlier.
            (None, None) => Vec::new(),
        };

        // Mark the whole component below the heads.
        let mut stack = heads;
        while let Some(id) = stack.pop() {
            if !classified.insert(id.clone()) {
                continue;
            }
            if let Some(n) = tree.nodes.get_mut(&id) {
                n.is_orphan = true;
                stack.extend(n.children.iter().filter(|c| remaining.contains(*c)).cloned());
            }
        }
        for id in chain {
            if let Some(n) = tree.nodes.get_mut(&id) {
                n.is_orphan = true;
            }
            classified.insert(id);
        }
    }
    Ok(())
}

/// Flag versions whose file is not in the index.
pub fn check_versions(
    versions: &[Version],
    files: &HashSet<String>,
    sink: FsckSink<'_>,
    fail_fast: bool,
) -> VfsResult<()> {
    for v in versions {
        if !files.contains(&v.file_id) {
            report(
                sink,
                FsckLog::new(FsckKind::VersionWithoutFile).id(&v.id).mismatch(&v.file_id, ""),
                fail_fast,
            )?;
        }
    }
    Ok(())
}

/// All findings of a run, with counts per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsckReport {
    pub logs: Vec<FsckLog>,
    pub counts: BTreeMap<FsckKind, usize>,
}

impl FsckReport {
    pub fn push(&mut self, log: FsckLog) {
        *self.counts.entry(log.kind).or_default() += 1;
        self.logs.push(log);
    }

    pub fn is_clean(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn count(&self, kind: FsckKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> VfsResult<String> {
        let mut out = String::new();
        for log in &self.logs {
            out.push_str(&serde_json::to_string(log)?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::tree::TreeFile;
    use nimbus_types::{DirDoc, FileDoc, IndexDoc, ROOT_DIR_ID};

    fn dir(id: &str, parent: &str, name: &str, path: &str) -> TreeFile {
        let mut d = DirDoc::new(name, parent, "/").unwrap();
        d.id = id.into();
        d.fullpath = path.into();
        TreeFile::new(IndexDoc::Dir(d))
    }

    fn file(id: &str, parent: &str, name: &str, trashed: bool) -> TreeFile {
        let mut f = FileDoc::new(name, parent, "text/plain").unwrap();
        f.id = id.into();
        f.trashed = trashed;
        TreeFile::new(IndexDoc::File(f))
    }

    fn healthy() -> Tree {
        let mut t = Tree::new();
        t.insert(TreeFile::new(IndexDoc::Dir(DirDoc::root())));
        t.insert(TreeFile::new(IndexDoc::Dir(DirDoc::trash())));
        t.insert(dir("a", ROOT_DIR_ID, "a", "/a"));
        t.insert(file("f", "a", "f.txt", false));
        t.insert(file("t", TRASH_DIR_ID, "old.txt", true));
        t
    }

    fn run(tree: &mut Tree, fail_fast: bool) -> Vec<FsckLog> {
        let mut logs = Vec::new();
        let mut sink = |l: FsckLog| logs.push(l);
        let res = check_tree_integrity(tree, &mut sink, fail_fast);
        if fail_fast {
            assert!(matches!(res, Err(VfsError::FsckFailFast) | Ok(())));
        } else {
            res.unwrap();
        }
        logs
    }

    fn kinds(logs: &[FsckLog]) -> Vec<FsckKind> {
        logs.iter().map(|l| l.kind).collect()
    }

    #[test]
    fn test_healthy_tree_is_clean() {
        assert!(run(&mut healthy(), false).is_empty());
    }

    #[test]
    fn test_missing_root() {
        let mut t = Tree::new();
        t.insert(dir("a", ROOT_DIR_ID, "a", "/a"));
        assert_eq!(kinds(&run(&mut t, false)), vec![FsckKind::IndexMissingRoot]);
    }

    #[test]
    fn test_missing_trash_is_reported() {
        let mut t = Tree::new();
        t.insert(TreeFile::new(IndexDoc::Dir(DirDoc::root())));
        assert_eq!(kinds(&run(&mut t, false)), vec![FsckKind::IndexMissingTrash]);
    }

    #[test]
    fn test_duplicate_names_across_types() {
        let mut t = healthy();
        t.insert(dir("dup", "a", "f.txt", "/a/f.txt"));
        assert_eq!(kinds(&run(&mut t, false)), vec![FsckKind::IndexDuplicateName]);
    }

    #[test]
    fn test_bad_fullpath_and_trashed() {
        let mut t = healthy();
        t.insert(dir("b", "a", "b", "/wrong/b"));
        t.insert(file("g", TRASH_DIR_ID, "g", false));
        let logs = run(&mut t, false);
        let mut k = kinds(&logs);
        k.sort();
        assert_eq!(k, vec![FsckKind::IndexBadFullpath, FsckKind::IndexBadTrashed]);
        let bad = logs.iter().find(|l| l.kind == FsckKind::IndexBadFullpath).unwrap();
        assert_eq!(bad.expected.as_deref(), Some("/a/b"));
        assert_eq!(logs.len(), 2);
    }

    #[test]
    fn test_orphans_and_cycles() {
        let mut t = healthy();
        // orphan subtree: o -> o/child, parent "ghost" missing
        t.insert(dir("o", "ghost", "o", "/ghost/o"));
        t.insert(file("oc", "o", "child", false));
        // file without parent
        t.insert(file("lost", "nowhere", "lost", false));
        // two-node cycle
        t.insert(dir("c1", "c2", "c1", "/c2/c1"));
        t.insert(dir("c2", "c1", "c2", "/c1/c2"));
        let logs = run(&mut t, false);
        let mut k = kinds(&logs);
        k.sort();
        assert_eq!(
            k,
            vec![
                FsckKind::IndexFileWithoutParent,
                FsckKind::IndexOrphanTree,
                FsckKind::IndexCycle,
                FsckKind::IndexCycle,
            ]
        );
        assert!(t.get("oc").unwrap().is_orphan);
        assert!(t.get("c1").unwrap().has_cycle);
        assert!(!t.get("f").unwrap().is_orphan);
    }

    #[test]
    fn test_fail_fast_stops_at_first() {
        let mut t = healthy();
        t.insert(file("lost1", "x", "l1", false));
        t.insert(file("lost2", "y", "l2", false));
        assert_eq!(run(&mut t, true).len(), 1);
    }

    #[tokio::test]
    async fn test_run_checks_swallows_sentinel() {
        assert!(run_checks(async { Err(VfsError::FsckFailFast) }).await.is_ok());
        assert!(run_checks(async { Err(VfsError::FileTooBig) }).await.is_err());
    }

    #[test]
    fn test_versions_without_file() {
        let files: HashSet<String> = ["f".to_string()].into();
        let mut v = nimbus_types::Version::from_file(&{
            let mut f = FileDoc::new("x", ROOT_DIR_ID, "").unwrap();
            f.id = "gone".into();
            f.internal_vfs_id = "i".into();
            f
        });
        v.file_id = "gone".into();
        let mut logs = Vec::new();
        check_versions(&[v], &files, &mut |l: FsckLog| logs.push(l), false).unwrap();
        assert_eq!(kinds(&logs), vec![FsckKind::VersionWithoutFile]);
    }

    #[test]
    fn test_report_counts_and_json_lines() {
        let mut r = FsckReport::default();
        r.push(FsckLog::new(FsckKind::MissingInBackend).id("a"));
        r.push(FsckLog::new(FsckKind::MissingInBackend).id("b"));
        assert_eq!(r.count(FsckKind::MissingInBackend), 2);
        let text = r.to_json_lines().unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("{\"type\":\"missing_in_backend\""));
    }
}
