//! The shadow tree: an in-memory mirror of the sandbox's directory structure
//! used to render a file browser.
//!
//! Nodes carry no content, only shape. Every mutation produces a new root
//! that shares all untouched subtrees with the previous one, so snapshots
//! handed out to readers stay valid and never change underneath them.

use std::{
    collections::{btree_map, BTreeMap},
    fmt::Write,
    sync::{Arc, RwLock},
    time::Duration,
};

use sandbox::EntryKind;
use thiserror::Error;

use crate::{
    debounce::Debouncer,
    subscription::{ListenerId, Listeners},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("invalid path {path:?}: paths must be non-empty, '/'-separated and have no empty segments")]
    InvalidPath { path: String },

    #[error("cannot add {path:?}: {segment:?} is a file")]
    NotADirectory { path: String, segment: String },

    #[error("no entry exists at {path:?}")]
    NotFound { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsNode {
    File,
    Directory(FsDir),
}

impl FsNode {
    pub fn kind(&self) -> EntryKind {
        match self {
            FsNode::File => EntryKind::File,
            FsNode::Directory(_) => EntryKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FsNode::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FsNode::Directory(_))
    }

    pub fn as_dir(&self) -> Option<&FsDir> {
        match self {
            FsNode::Directory(dir) => Some(dir),
            FsNode::File => None,
        }
    }
}

impl From<EntryKind> for FsNode {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => FsNode::File,
            EntryKind::Directory => FsNode::Directory(FsDir::default()),
        }
    }
}

/// A directory in the shadow tree. Cloning is O(1): children are reference
/// counted and only copied when a clone is mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsDir {
    children: Arc<BTreeMap<String, FsNode>>,
}

/// Number of files and directories below a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCounts {
    pub files: usize,
    pub directories: usize,
}

impl FsDir {
    pub fn get(&self, name: &str) -> Option<&FsNode> {
        self.children.get(name)
    }

    /// Looks up a node by its full path below this directory. Invalid paths
    /// simply aren't found.
    pub fn lookup(&self, path: &str) -> Option<&FsNode> {
        let segments = split_segments(path).ok()?;
        let (last, ancestors) = segments.split_last()?;

        let mut dir = self;
        for segment in ancestors {
            dir = dir.get(segment)?.as_dir()?;
        }

        dir.get(last)
    }

    pub fn children(&self) -> btree_map::Iter<'_, String, FsNode> {
        self.children.iter()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn counts(&self) -> TreeCounts {
        let mut counts = TreeCounts::default();

        for node in self.children.values() {
            match node {
                FsNode::File => counts.files += 1,
                FsNode::Directory(dir) => {
                    let inner = dir.counts();
                    counts.files += inner.files;
                    counts.directories += inner.directories + 1;
                }
            }
        }

        counts
    }

    /// Every path below this directory, directories included, in depth-first
    /// alphabetical order.
    pub fn paths(&self) -> Vec<String> {
        let mut output = Vec::new();
        self.collect_paths("", &mut output);
        output
    }

    fn collect_paths(&self, prefix: &str, output: &mut Vec<String>) {
        for (name, node) in self.children() {
            let path = sandbox::join_path(prefix, name);
            output.push(path.clone());

            if let FsNode::Directory(dir) = node {
                dir.collect_paths(&path, output);
            }
        }
    }

    /// Renders the tree as indented text, directories before files and each
    /// group sorted by name.
    pub fn render(&self) -> String {
        let mut output = String::new();
        self.render_into(0, &mut output);
        output
    }

    fn render_into(&self, depth: usize, output: &mut String) {
        let dirs = self.children().filter(|(_, node)| node.is_dir());
        let files = self.children().filter(|(_, node)| node.is_file());

        for (name, node) in dirs.chain(files) {
            let indent = "  ".repeat(depth);

            match node {
                FsNode::Directory(dir) => {
                    let _ = writeln!(output, "{}{}/", indent, name);
                    dir.render_into(depth + 1, output);
                }
                FsNode::File => {
                    let _ = writeln!(output, "{}{}", indent, name);
                }
            }
        }
    }

    fn children_mut(&mut self) -> &mut BTreeMap<String, FsNode> {
        Arc::make_mut(&mut self.children)
    }
}

fn split_segments(path: &str) -> Result<Vec<&str>, TreeError> {
    let segments: Vec<&str> = path.split('/').collect();

    if path.is_empty() || segments.iter().any(|segment| segment.is_empty()) {
        return Err(TreeError::InvalidPath {
            path: path.to_owned(),
        });
    }

    Ok(segments)
}

fn insert(dir: &mut FsDir, segments: &[&str], node: FsNode, path: &str) -> Result<(), TreeError> {
    let (name, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            return Err(TreeError::InvalidPath {
                path: path.to_owned(),
            })
        }
    };

    let children = dir.children_mut();

    if rest.is_empty() {
        children.insert((*name).to_owned(), node);
        return Ok(());
    }

    let child = children
        .entry((*name).to_owned())
        .or_insert_with(|| FsNode::Directory(FsDir::default()));

    match child {
        FsNode::Directory(child_dir) => insert(child_dir, rest, node, path),
        FsNode::File => Err(TreeError::NotADirectory {
            path: path.to_owned(),
            segment: (*name).to_owned(),
        }),
    }
}

fn remove(dir: &mut FsDir, segments: &[&str], path: &str) -> Result<FsNode, TreeError> {
    let not_found = || TreeError::NotFound {
        path: path.to_owned(),
    };

    let (name, rest) = segments.split_first().ok_or_else(not_found)?;

    // Checking before make_mut avoids copying the path for a doomed removal.
    if !dir.children.contains_key(*name) {
        return Err(not_found());
    }

    let children = dir.children_mut();

    if rest.is_empty() {
        return children.remove(*name).ok_or_else(not_found);
    }

    match children.get_mut(*name) {
        Some(FsNode::Directory(child_dir)) => remove(child_dir, rest, path),
        _ => Err(not_found()),
    }
}

/// Shared, observable shadow tree.
///
/// Every mutation, `clear` included, schedules a debounced notification to
/// subscribers. The notification carries no payload; subscribers call
/// `snapshot` to see the new state.
pub struct FsTree {
    root: RwLock<FsDir>,
    listeners: Arc<Listeners<()>>,
    debouncer: Debouncer,
}

impl FsTree {
    pub fn new(debounce: Duration) -> Self {
        let listeners = Arc::new(Listeners::new());

        let to_notify = Arc::clone(&listeners);
        let debouncer = Debouncer::new("FsTree", debounce, move || {
            log::trace!("Notifying {} shadow tree listener(s)", to_notify.len());
            to_notify.notify(&());
        });

        Self {
            root: RwLock::new(FsDir::default()),
            listeners,
            debouncer,
        }
    }

    /// Inserts a file or an empty directory at `path`, creating missing
    /// ancestors. An existing entry at `path` is replaced.
    pub fn add(&self, path: &str, kind: EntryKind) -> Result<(), TreeError> {
        let segments = split_segments(path)?;

        {
            let mut root = self.root.write().unwrap();
            let mut new_root = root.clone();
            insert(&mut new_root, &segments, FsNode::from(kind), path)?;
            *root = new_root;
        }

        log::trace!("Shadow tree: added {:?} {}", kind, path);
        self.debouncer.schedule();

        Ok(())
    }

    /// Removes the entry at `path` and everything below it.
    pub fn remove(&self, path: &str) -> Result<(), TreeError> {
        let segments = split_segments(path)?;

        {
            let mut root = self.root.write().unwrap();
            let mut new_root = root.clone();
            remove(&mut new_root, &segments, path)?;
            *root = new_root;
        }

        log::trace!("Shadow tree: removed {}", path);
        self.debouncer.schedule();

        Ok(())
    }

    /// Never fails: a missing ancestor, a file ancestor or an invalid path
    /// all mean the entry doesn't exist.
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<FsNode> {
        self.root.read().unwrap().lookup(path).cloned()
    }

    pub fn snapshot(&self) -> FsDir {
        self.root.read().unwrap().clone()
    }

    pub fn clear(&self) {
        *self.root.write().unwrap() = FsDir::default();

        log::trace!("Shadow tree: cleared");
        self.debouncer.schedule();
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.subscribe(move |_| listener())
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}
