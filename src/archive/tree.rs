//! Lazily built directory tree over a flat entry list.
//!
//! Nodes live in an arena indexed by [`NodeId`]; directories own index lists
//! of their children and a path-keyed map guarantees one node per normalized
//! path. The tree is built in a single pass over the backend the first time
//! it is queried.

use std::collections::HashMap;
use std::io::Read;

use tracing::{debug, warn};

use super::path::{file_name_of, normalize_entry_path, parent_of, strip_segments};
use super::{ArchiveBackend, RawEntry};
use crate::common::{ArchiveFormat, EntryKind, EntryMetadata, ResourceAttributes};
use crate::error::{ArchiverError, Result};

/// Index of a node inside an [`ArchiveTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

const ROOT: NodeId = NodeId(0);

enum NodeKind<H> {
    Directory {
        children: Vec<NodeId>,
        /// Metadata of an explicit directory entry; `None` when synthesized.
        entry: Option<EntryMetadata>,
    },
    Leaf {
        handle: H,
        metadata: EntryMetadata,
    },
}

struct Node<H> {
    /// Normalized archive path, `""` for the root.
    path: String,
    kind: NodeKind<H>,
}

pub struct ArchiveTree<B: ArchiveBackend> {
    backend: B,
    nodes: Vec<Node<B::Handle>>,
    index: HashMap<String, NodeId>,
    problems: Vec<ArchiverError>,
    strip_level: usize,
    built: bool,
    closed: bool,
}

impl<B: ArchiveBackend> ArchiveTree<B> {
    pub fn new(backend: B) -> Self {
        let root = Node {
            path: String::new(),
            kind: NodeKind::Directory { children: Vec::new(), entry: None },
        };
        Self {
            backend,
            nodes: vec![root],
            index: HashMap::new(),
            problems: Vec::new(),
            strip_level: 0,
            built: false,
            closed: false,
        }
    }

    pub fn root_node(&self) -> NodeId {
        ROOT
    }

    pub fn format(&self) -> ArchiveFormat {
        self.backend.format()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn set_strip_level(&mut self, level: usize) {
        self.strip_level = level;
    }

    pub fn strip_level(&self) -> usize {
        self.strip_level
    }

    /// Children of `node` in archive order. The first call enumerates the
    /// whole archive.
    pub fn children(&mut self, node: NodeId) -> Vec<NodeId> {
        self.ensure_built();
        match self.nodes.get(node.0).map(|n| &n.kind) {
            Some(NodeKind::Directory { children, .. }) => children.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_directory(&self, node: NodeId) -> bool {
        matches!(self.nodes.get(node.0).map(|n| &n.kind), Some(NodeKind::Directory { .. }))
    }

    /// Path of `node` with the strip level applied; `""` for the root.
    pub fn full_path(&self, node: NodeId) -> String {
        self.nodes
            .get(node.0)
            .map(|n| strip_segments(&n.path, self.strip_level).to_string())
            .unwrap_or_default()
    }

    /// Display name of `node`: the last segment of its stripped path, `/` for
    /// the root.
    pub fn label(&self, node: NodeId) -> String {
        if node == ROOT {
            return "/".to_string();
        }
        file_name_of(&self.full_path(node)).to_string()
    }

    /// Normalized archive path of `node`, ignoring the strip level.
    pub fn raw_path(&self, node: NodeId) -> &str {
        self.nodes.get(node.0).map_or("", |n| n.path.as_str())
    }

    pub fn metadata(&self, node: NodeId) -> EntryMetadata {
        let synthesized = EntryMetadata { kind: EntryKind::Directory, size: 0, mode: None, mtime: None };
        match self.nodes.get(node.0).map(|n| &n.kind) {
            Some(NodeKind::Leaf { metadata, .. }) => *metadata,
            Some(NodeKind::Directory { entry: Some(entry), .. }) => *entry,
            _ => synthesized,
        }
    }

    pub fn attributes(&self, node: NodeId) -> Option<ResourceAttributes> {
        self.metadata(node).attributes()
    }

    /// Content of a leaf node. Directories have none. Failures are logged and
    /// reported as `None`; use [`ArchiveTree::try_content`] to get the error.
    pub fn content(&mut self, node: NodeId) -> Option<Box<dyn Read + '_>> {
        let path = self.raw_path(node).to_string();
        match self.try_content(node) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(entry = %path, error = %e, "failed to read archive entry");
                None
            }
        }
    }

    pub fn try_content(&mut self, node: NodeId) -> Result<Option<Box<dyn Read + '_>>> {
        if self.closed {
            return Err(ArchiverError::ArchiveClosed);
        }
        let handle = match self.nodes.get(node.0).map(|n| &n.kind) {
            Some(NodeKind::Leaf { handle, .. }) => handle.clone(),
            _ => return Ok(None),
        };
        self.backend.open_entry(&handle).map(Some)
    }

    /// Looks up a node by raw archive path (normalized, strip level ignored).
    pub fn find(&mut self, path: &str) -> Option<NodeId> {
        self.ensure_built();
        let normalized = normalize_entry_path(path).ok()?;
        if normalized.is_empty() {
            return Some(ROOT);
        }
        self.index.get(&normalized).copied()
    }

    /// Every node except the root in depth-first pre-order.
    pub fn walk(&mut self) -> Vec<NodeId> {
        self.ensure_built();
        let mut out = Vec::with_capacity(self.nodes.len().saturating_sub(1));
        let mut stack: Vec<NodeId> = self.child_ids(ROOT).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.child_ids(id).iter().rev().copied());
        }
        out
    }

    /// Entries that were left out of the tree and why.
    pub fn problems(&mut self) -> &[ArchiverError] {
        self.ensure_built();
        &self.problems
    }

    /// Moves the collected problems out of the tree.
    pub fn take_problems(&mut self) -> Vec<ArchiverError> {
        self.ensure_built();
        std::mem::take(&mut self.problems)
    }

    /// Releases the archive handle. Returns `false` when releasing failed;
    /// closing an already closed tree is a no-op that returns `true`.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return true;
        }
        self.closed = true;
        match self.backend.close() {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.backend.archive_path().display(), error = %e, "failed to close archive");
                false
            }
        }
    }

    fn child_ids(&self, node: NodeId) -> &[NodeId] {
        match self.nodes.get(node.0).map(|n| &n.kind) {
            Some(NodeKind::Directory { children, .. }) => children,
            _ => &[],
        }
    }

    fn ensure_built(&mut self) {
        if self.built {
            return;
        }
        self.built = true;

        let mut raw = Vec::new();
        let mut failures = Vec::new();
        let scanned = self.backend.scan(&mut |entry| match entry {
            Ok(entry) => raw.push(entry),
            Err(e) => failures.push(e),
        });
        if let Err(e) = scanned {
            failures.push(e);
        }
        for e in failures {
            warn!(error = %e, "skipping unreadable archive entry");
            self.problems.push(e);
        }
        for entry in raw {
            if let Err(e) = self.insert(entry) {
                if e.is_security_violation() {
                    warn!(error = %e, "security: entry escapes archive root");
                } else {
                    warn!(error = %e, "skipping archive entry");
                }
                self.problems.push(e);
            }
        }
        debug!(
            path = %self.backend.archive_path().display(),
            nodes = self.nodes.len(),
            problems = self.problems.len(),
            "built archive tree"
        );
    }

    fn insert(&mut self, entry: RawEntry<B::Handle>) -> Result<()> {
        let path = normalize_entry_path(&entry.path)?;
        let is_dir = entry.metadata.kind.is_dir();
        if path.is_empty() {
            if is_dir {
                if let NodeKind::Directory { entry: slot, .. } = &mut self.nodes[ROOT.0].kind {
                    *slot = Some(entry.metadata);
                }
            }
            return Ok(());
        }

        if let Some(&existing) = self.index.get(&path) {
            return match (&mut self.nodes[existing.0].kind, is_dir) {
                (NodeKind::Directory { entry: slot, .. }, true) => {
                    *slot = Some(entry.metadata);
                    Ok(())
                }
                (NodeKind::Leaf { handle, metadata }, false) => {
                    debug!(entry = %path, "duplicate entry replaces earlier one");
                    *handle = entry.handle;
                    *metadata = entry.metadata;
                    Ok(())
                }
                _ => Err(ArchiverError::PathConflict { entry: path }),
            };
        }

        let parent = self.ensure_directory(parent_of(&path))?;
        let kind = if is_dir {
            NodeKind::Directory { children: Vec::new(), entry: Some(entry.metadata) }
        } else {
            NodeKind::Leaf { handle: entry.handle, metadata: entry.metadata }
        };
        self.add_node(parent, path, kind);
        Ok(())
    }

    /// Returns the directory node for `path`, creating it and any missing
    /// ancestors.
    fn ensure_directory(&mut self, path: &str) -> Result<NodeId> {
        let mut missing = Vec::new();
        let mut cursor = path;
        let mut parent = ROOT;
        while !cursor.is_empty() {
            if let Some(&id) = self.index.get(cursor) {
                if !self.is_directory(id) {
                    return Err(ArchiverError::PathConflict { entry: cursor.to_string() });
                }
                parent = id;
                break;
            }
            missing.push(cursor);
            cursor = parent_of(cursor);
        }
        for dir in missing.into_iter().rev() {
            parent = self.add_node(
                parent,
                dir.to_string(),
                NodeKind::Directory { children: Vec::new(), entry: None },
            );
        }
        Ok(parent)
    }

    fn add_node(&mut self, parent: NodeId, path: String, kind: NodeKind<B::Handle>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(path.clone(), id);
        self.nodes.push(Node { path, kind });
        if let NodeKind::Directory { children, .. } = &mut self.nodes[parent.0].kind {
            children.push(id);
        }
        id
    }
}

impl<B: ArchiveBackend> Drop for ArchiveTree<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};

    /// In-memory backend: entries are `(name, kind, body)`.
    struct MemoryBackend {
        path: PathBuf,
        entries: Vec<(String, EntryKind, Vec<u8>)>,
        closes: usize,
    }

    impl MemoryBackend {
        fn new(entries: &[(&str, EntryKind, &str)]) -> Self {
            Self {
                path: PathBuf::from("memory.tar"),
                entries: entries
                    .iter()
                    .map(|(n, k, b)| (n.to_string(), *k, b.as_bytes().to_vec()))
                    .collect(),
                closes: 0,
            }
        }
    }

    impl ArchiveBackend for MemoryBackend {
        type Handle = usize;

        fn archive_path(&self) -> &Path {
            &self.path
        }

        fn format(&self) -> ArchiveFormat {
            ArchiveFormat::Tar
        }

        fn scan(&mut self, visit: &mut dyn FnMut(Result<RawEntry<usize>>)) -> Result<()> {
            for (i, (name, kind, body)) in self.entries.iter().enumerate() {
                visit(Ok(RawEntry {
                    path: name.clone(),
                    metadata: EntryMetadata { kind: *kind, size: body.len() as u64, mode: Some(0o640), mtime: Some(1) },
                    handle: i,
                }));
            }
            Ok(())
        }

        fn open_entry(&mut self, handle: &usize) -> Result<Box<dyn Read + '_>> {
            Ok(Box::new(Cursor::new(self.entries[*handle].2.clone())))
        }

        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    use EntryKind::{Directory as D, File as F};

    fn labels<B: ArchiveBackend>(tree: &mut ArchiveTree<B>, node: NodeId) -> Vec<String> {
        tree.children(node).into_iter().map(|c| tree.label(c)).collect()
    }

    #[test]
    fn synthesizes_missing_directories_once() {
        let mut tree = ArchiveTree::new(MemoryBackend::new(&[
            ("a/b/c.txt", F, "c"),
            ("a/b/d.txt", F, "d"),
            ("a/", D, ""),
            ("a/e.txt", F, "e"),
        ]));
        let root = tree.root_node();
        assert_eq!(labels(&mut tree, root), ["a"]);
        let a = tree.find("a").unwrap();
        assert_eq!(labels(&mut tree, a), ["b", "e.txt"]);
        let b = tree.find("./a/b/").unwrap();
        assert_eq!(labels(&mut tree, b), ["c.txt", "d.txt"]);
        assert_eq!(tree.metadata(a).mode, Some(0o640));
        assert_eq!(tree.metadata(b).mode, None);
        assert_eq!(tree.walk().len(), 5);
    }

    #[test]
    fn strip_level_applies_to_paths_and_labels() {
        let mut tree = ArchiveTree::new(MemoryBackend::new(&[("top/sub/f.txt", F, "x")]));
        let f = tree.find("top/sub/f.txt").unwrap();
        let top = tree.find("top").unwrap();
        tree.set_strip_level(1);
        assert_eq!(tree.full_path(f), "sub/f.txt");
        assert_eq!(tree.full_path(top), "top");
        assert_eq!(tree.label(f), "f.txt");
        tree.set_strip_level(5);
        assert_eq!(tree.full_path(f), "top/sub/f.txt");
    }

    #[test]
    fn escaping_and_conflicting_entries_are_reported() {
        let mut tree = ArchiveTree::new(MemoryBackend::new(&[
            ("../../etc/passwd", F, "root"),
            ("x", F, "file"),
            ("x/y", F, "under a file"),
            ("ok.txt", F, "ok"),
        ]));
        let root = tree.root_node();
        assert_eq!(labels(&mut tree, root), ["x", "ok.txt"]);
        let problems = tree.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].is_security_violation());
        assert!(matches!(problems[1], ArchiverError::PathConflict { .. }));
    }

    #[test]
    fn duplicate_leaf_keeps_last_content() {
        let mut tree = ArchiveTree::new(MemoryBackend::new(&[("f", F, "old"), ("f", F, "new")]));
        let f = tree.find("f").unwrap();
        let mut body = String::new();
        tree.content(f).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "new");
        let root = tree.root_node();
        assert_eq!(tree.children(root).len(), 1);
        assert!(tree.content(root).is_none());
    }

    #[test]
    fn close_is_idempotent_and_blocks_content() {
        let mut tree = ArchiveTree::new(MemoryBackend::new(&[("f", F, "x")]));
        let f = tree.find("f").unwrap();
        assert!(tree.close());
        assert!(tree.close());
        assert_eq!(tree.backend().closes, 1);
        assert!(matches!(tree.try_content(f), Err(ArchiverError::ArchiveClosed)));
    }
}
