use std::collections::{btree_map, BTreeMap};
use std::io;

use serde::{Deserialize, Serialize};

use crate::{join_path, SandboxBackend};

/// A tree of files and directories that can be mounted into a sandbox in one
/// go.
///
/// Serializes to the nested `{ "name": { "file": { "contents": ... } } }` /
/// `{ "name": { "directory": { ... } } }` shape used to describe projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountTree {
    entries: BTreeMap<String, MountEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MountEntry {
    File { contents: FileContents },
    Directory(MountTree),
}

/// Contents of a mounted file. Text stays text so that mount trees remain
/// readable when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContents {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContents {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContents::Text(text) => text.as_bytes(),
            FileContents::Binary(bytes) => bytes,
        }
    }

    /// Text files stay text; anything that isn't valid UTF-8 is kept as raw
    /// bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => FileContents::Text(text),
            Err(err) => FileContents::Binary(err.into_bytes()),
        }
    }
}

impl From<&str> for FileContents {
    fn from(value: &str) -> Self {
        FileContents::Text(value.to_owned())
    }
}

impl From<String> for FileContents {
    fn from(value: String) -> Self {
        FileContents::Text(value)
    }
}

impl From<Vec<u8>> for FileContents {
    fn from(value: Vec<u8>) -> Self {
        FileContents::from_bytes(value)
    }
}

impl MountTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: MountEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn insert_file(&mut self, name: impl Into<String>, contents: impl Into<FileContents>) {
        self.insert(
            name,
            MountEntry::File {
                contents: contents.into(),
            },
        );
    }

    /// Returns the directory called `name`, creating it (or replacing a file
    /// of that name) if needed.
    pub fn insert_dir(&mut self, name: impl Into<String>) -> &mut MountTree {
        let entry = self
            .entries
            .entry(name.into())
            .or_insert_with(|| MountEntry::Directory(MountTree::new()));

        if let MountEntry::File { .. } = entry {
            *entry = MountEntry::Directory(MountTree::new());
        }

        match entry {
            MountEntry::Directory(tree) => tree,
            MountEntry::File { .. } => unreachable!("entry was just replaced with a directory"),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MountEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, MountEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of files anywhere in the tree.
    pub fn file_count(&self) -> usize {
        self.entries
            .values()
            .map(|entry| match entry {
                MountEntry::File { .. } => 1,
                MountEntry::Directory(tree) => tree.file_count(),
            })
            .sum()
    }
}

impl<'a> IntoIterator for &'a MountTree {
    type Item = (&'a String, &'a MountEntry);
    type IntoIter = btree_map::Iter<'a, String, MountEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub(crate) fn write_tree(
    backend: &mut dyn SandboxBackend,
    dir: &str,
    tree: &MountTree,
) -> io::Result<()> {
    for (name, entry) in tree {
        let path = join_path(dir, name);

        match entry {
            MountEntry::File { contents } => backend.write(&path, contents.as_bytes())?,
            MountEntry::Directory(children) => {
                backend.create_dir_all(&path)?;
                write_tree(backend, &path, children)?;
            }
        }
    }

    Ok(())
}
