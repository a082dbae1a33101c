//! In-memory projection of the index, rebuilt for fsck.
//!
//! The tree is an arena: every node lives in one id-keyed table and edges
//! are ids. Nodes whose parent has not been seen (yet, or ever) wait in
//! `orphans`, keyed by the missing parent id, and are reattached when that
//! parent arrives. Scan order therefore does not matter.

use std::collections::{BTreeSet, HashMap, HashSet};

use nimbus_types::{IndexDoc, ROOT_DIR_ID};

/// One document with its tree links.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeFile {
    pub doc: IndexDoc,
    /// Child ids, files and directories alike.
    pub children: Vec<String>,
    /// Sum of the sizes of direct child files.
    pub children_size: u64,
    pub is_dir: bool,
    pub is_orphan: bool,
    pub has_cycle: bool,
    /// The stored file document carries a denormalized path.
    pub has_explicit_path: bool,
    /// Losing revisions the store still holds.
    pub conflicts: Vec<String>,
}

impl TreeFile {
    pub fn new(doc: IndexDoc) -> Self {
        Self {
            is_dir: doc.is_dir(),
            doc,
            children: Vec::new(),
            children_size: 0,
            is_orphan: false,
            has_cycle: false,
            has_explicit_path: false,
            conflicts: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.doc.id()
    }

    /// Stored fullpath of a directory.
    pub fn fullpath(&self) -> Option<&str> {
        self.doc.as_dir().map(|d| d.fullpath.as_str())
    }

    fn size(&self) -> u64 {
        self.doc.as_file().map(|f| f.size).unwrap_or(0)
    }
}

/// The whole hierarchy as one arena.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    /// Id of the root node once seen.
    pub root: Option<String>,
    pub nodes: HashMap<String, TreeFile>,
    /// Child ids keyed by a parent id that is not (yet) a known directory.
    pub orphans: HashMap<String, Vec<String>>,
    /// Every file id in the index.
    pub files: HashSet<String>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, linking it to its parent or parking it as an orphan.
    pub fn insert(&mut self, mut node: TreeFile) {
        let id = node.id().to_string();

        if node.is_dir
            && let Some(children) = self.orphans.remove(&id)
        {
            for child in children {
                if let Some(c) = self.nodes.get(&child) {
                    node.children_size += c.size();
                }
                node.children.push(child);
            }
        }

        if id == ROOT_DIR_ID {
            self.root = Some(id.clone());
        } else {
            let parent_id = node.doc.dir_id().to_string();
            let size = node.size();
            match self.nodes.get_mut(&parent_id) {
                Some(parent) if parent.is_dir => {
                    parent.children.push(id.clone());
                    parent.children_size += size;
                }
                _ => self.orphans.entry(parent_id).or_default().push(id.clone()),
            }
        }

        if !node.is_dir {
            self.files.insert(id.clone());
        }
        self.nodes.insert(id, node);
    }

    pub fn get(&self, id: &str) -> Option<&TreeFile> {
        self.nodes.get(id)
    }

    pub fn root_node(&self) -> Option<&TreeFile> {
        self.root.as_deref().and_then(|id| self.nodes.get(id))
    }

    /// Number of directory nodes.
    pub fn dir_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_dir).count()
    }

    /// Parent/child edges, for structural comparison.
    pub fn edges(&self) -> BTreeSet<(String, String)> {
        self.nodes
            .iter()
            .flat_map(|(id, n)| n.children.iter().map(move |c| (id.clone(), c.clone())))
            .collect()
    }

    /// Orphaned `(missing parent, child)` pairs.
    pub fn orphan_set(&self) -> BTreeSet<(String, String)> {
        self.orphans
            .iter()
            .flat_map(|(p, cs)| cs.iter().map(move |c| (p.clone(), c.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::{DirDoc, FileDoc};

    fn dir(id: &str, parent: &str, path: &str) -> TreeFile {
        let mut d = DirDoc::new(path.rsplit('/').next().unwrap(), parent, "/").unwrap();
        d.id = id.into();
        d.fullpath = path.into();
        TreeFile::new(IndexDoc::Dir(d))
    }

    fn file(id: &str, parent: &str, size: u64) -> TreeFile {
        let mut f = FileDoc::new(id, parent, "text/plain").unwrap().with_size(size);
        f.id = id.into();
        TreeFile::new(IndexDoc::File(f))
    }

    #[test]
    fn test_insert_order_does_not_matter() {
        let nodes = || {
            vec![
                TreeFile::new(IndexDoc::Dir(DirDoc::root())),
                dir("a", ROOT_DIR_ID, "/a"),
                dir("b", "a", "/a/b"),
                file("f1", "b", 3),
                file("f2", "a", 4),
            ]
        };
        let mut forward = Tree::new();
        for n in nodes() {
            forward.insert(n);
        }
        let mut backward = Tree::new();
        for n in nodes().into_iter().rev() {
            backward.insert(n);
        }
        assert_eq!(forward.edges(), backward.edges());
        assert!(backward.orphans.is_empty());
        assert_eq!(backward.root.as_deref(), Some(ROOT_DIR_ID));
        assert_eq!(backward.get("a").unwrap().children_size, 4);
        assert_eq!(backward.get("b").unwrap().children_size, 3);
        assert_eq!(backward.files.len(), 2);
    }

    #[test]
    fn test_missing_parent_stays_orphan() {
        let mut tree = Tree::new();
        tree.insert(TreeFile::new(IndexDoc::Dir(DirDoc::root())));
        tree.insert(file("lost", "ghost", 1));
        assert_eq!(
            tree.orphan_set(),
            BTreeSet::from([("ghost".to_string(), "lost".to_string())])
        );
    }

    #[test]
    fn test_file_as_parent_is_orphan() {
        let mut tree = Tree::new();
        tree.insert(file("f", ROOT_DIR_ID, 1));
        tree.insert(file("g", "f", 1));
        assert!(tree.orphans.contains_key("f"));
        assert!(tree.get("f").unwrap().children.is_empty());
    }
}
