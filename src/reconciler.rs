//! Turns raw sandbox change notifications into shadow tree, editor model and
//! extra lib mutations.
//!
//! Notifications only say *that* something happened at a path, and `rename`
//! covers creation, removal and renaming alike. The reconciler finds out what
//! actually happened by re-reading the sandbox, which also makes every step
//! safe to repeat: replaying a notification against the same sandbox state
//! changes nothing.

use std::sync::Arc;

use anyhow::Context;
use sandbox::{join_path, split_path, EntryKind, FsEvent, FsEventKind, IoResultExt, Sandbox};

use crate::{
    config::SessionConfig,
    extra_libs::ExtraLibs,
    fs_tree::{FsTree, TreeCounts},
    models::EditorModels,
};

/// What a single reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An open model got the file's new contents.
    ContentUpdated,
    FileAdded,
    /// A directory was added along with everything below it.
    DirectoryAdded { files: usize, directories: usize },
    Removed,
    /// The shadow tree and models already matched the sandbox.
    Unchanged,
    /// The path's parent no longer exists. A notification for the parent
    /// takes care of it.
    Stale,
    /// The path is inside the dependency directory and doesn't matter.
    Ignored,
    ExtraLibUpdated,
    ExtraLibRemoved,
}

/// What listing a path's parent directory said about the path.
enum Presence {
    Absent,
    File,
    Directory,
    /// The parent itself is gone.
    Stale,
}

pub struct Reconciler {
    sandbox: Arc<Sandbox>,
    tree: Arc<FsTree>,
    models: Arc<dyn EditorModels>,
    extra_libs: Arc<ExtraLibs>,
    config: SessionConfig,
}

impl Reconciler {
    pub fn new(
        sandbox: Arc<Sandbox>,
        tree: Arc<FsTree>,
        models: Arc<dyn EditorModels>,
        extra_libs: Arc<ExtraLibs>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sandbox,
            tree,
            models,
            extra_libs,
            config,
        }
    }

    pub fn reconcile(&self, event: &FsEvent) -> anyhow::Result<Outcome> {
        let path = event.path.as_str();

        let outcome = if path.is_empty() {
            Outcome::Ignored
        } else if self.config.is_dependency_path(path) {
            self.reconcile_dependency(event.kind, path)?
        } else {
            match event.kind {
                FsEventKind::Change => self.on_changed(path)?,
                FsEventKind::Rename => match self.presence(path)? {
                    Presence::Absent => self.on_removed(path)?,
                    Presence::File => self.on_file_created(path)?,
                    Presence::Directory => self.on_dir_created(path)?,
                    Presence::Stale => Outcome::Stale,
                },
            }
        };

        log::debug!("{} {}: {:?}", event.kind, path, outcome);
        Ok(outcome)
    }

    fn presence(&self, path: &str) -> anyhow::Result<Presence> {
        let (parent, name) = split_path(path);

        let entries = self
            .sandbox
            .read_dir(parent)
            .with_not_found()
            .with_context(|| format!("Could not list parent directory of {}", path))?;

        let entries = match entries {
            Some(entries) => entries,
            None => return Ok(Presence::Stale),
        };

        Ok(match entries.iter().find(|entry| entry.name() == name) {
            None => Presence::Absent,
            Some(entry) if entry.is_file() => Presence::File,
            Some(_) => Presence::Directory,
        })
    }

    /// Reads a file as text. `None` means it disappeared before we got to
    /// it. Non UTF-8 content is decoded lossily, like an editor would.
    fn read_text(&self, path: &str) -> anyhow::Result<Option<String>> {
        let contents = self
            .sandbox
            .read(path)
            .with_not_found()
            .with_context(|| format!("Could not read {}", path))?;

        Ok(contents.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn on_changed(&self, path: &str) -> anyhow::Result<Outcome> {
        if !self.models.model_exists(path) {
            return Ok(Outcome::Unchanged);
        }

        let content = match self.read_text(path)? {
            Some(content) => content,
            None => return Ok(Outcome::Stale),
        };

        self.models.update_model(path, &content)?;
        Ok(Outcome::ContentUpdated)
    }

    fn on_removed(&self, path: &str) -> anyhow::Result<Outcome> {
        self.models.dispose_models(path);

        // A dependency directory somewhere below `path` went with it.
        let had_libs = self.extra_libs.contains_under(path);
        if had_libs {
            self.extra_libs.remove(path);
        }

        if !self.tree.exists(path) {
            return Ok(if had_libs {
                Outcome::ExtraLibRemoved
            } else {
                Outcome::Unchanged
            });
        }

        self.tree.remove(path)?;
        Ok(Outcome::Removed)
    }

    fn on_file_created(&self, path: &str) -> anyhow::Result<Outcome> {
        if self.tree.exists(path) {
            return Ok(Outcome::Unchanged);
        }

        let content = match self.read_text(path)? {
            Some(content) => content,
            None => return Ok(Outcome::Stale),
        };

        self.models.create_model(path, &content);
        self.tree.add(path, EntryKind::File)?;

        Ok(Outcome::FileAdded)
    }

    fn on_dir_created(&self, path: &str) -> anyhow::Result<Outcome> {
        if self.tree.exists(path) {
            return Ok(Outcome::Unchanged);
        }

        self.tree.add(path, EntryKind::Directory)?;
        let counts = self.sync_dir(path)?;

        Ok(Outcome::DirectoryAdded {
            files: counts.files,
            directories: counts.directories,
        })
    }

    /// Mirrors everything below `base` into the tree and opens models for
    /// every file, skipping dependency directories.
    fn sync_dir(&self, base: &str) -> anyhow::Result<TreeCounts> {
        let mut counts = TreeCounts::default();

        let entries = self
            .sandbox
            .read_dir(base)
            .with_not_found()
            .with_context(|| format!("Could not list directory {}", base))?;

        let entries = match entries {
            Some(entries) => entries,
            None => return Ok(counts),
        };

        for entry in entries {
            let path = join_path(base, entry.name());

            if entry.name() == self.config.dependency_dir {
                let libs = self.sync_declarations(&path)?;
                log::trace!("Registered {} declaration(s) from {}", libs, path);
                continue;
            }

            if entry.is_dir() {
                self.tree.add(&path, EntryKind::Directory)?;
                counts.directories += 1;

                let inner = self.sync_dir(&path)?;
                counts.files += inner.files;
                counts.directories += inner.directories;
            } else if let Some(content) = self.read_text(&path)? {
                self.models.create_model(&path, &content);
                self.tree.add(&path, EntryKind::File)?;
                counts.files += 1;
            }
        }

        Ok(counts)
    }

    /// Registers every declaration file below a dependency directory as an
    /// extra lib. Nothing under it reaches the tree or the models.
    fn sync_declarations(&self, base: &str) -> anyhow::Result<usize> {
        let entries = self
            .sandbox
            .read_dir(base)
            .with_not_found()
            .with_context(|| format!("Could not list directory {}", base))?;

        let mut registered = 0;

        for entry in entries.unwrap_or_default() {
            let path = join_path(base, entry.name());

            if entry.is_dir() {
                registered += self.sync_declarations(&path)?;
            } else if self.config.is_declaration_file(&path) {
                if let Some(content) = self.read_text(&path)? {
                    self.extra_libs.replace(&path, content);
                    registered += 1;
                }
            }
        }

        Ok(registered)
    }

    /// Dependency directories are huge and effectively read-only, so the only
    /// thing kept from them are declaration files, as extra libs.
    fn reconcile_dependency(&self, kind: FsEventKind, path: &str) -> anyhow::Result<Outcome> {
        if !self.config.is_declaration_file(path) {
            // Removing a package (or the whole dependency directory) has to
            // take its declarations with it.
            if kind == FsEventKind::Rename && self.extra_libs.contains_under(path) {
                if let Presence::Absent = self.presence(path)? {
                    self.extra_libs.remove(path);
                    return Ok(Outcome::ExtraLibRemoved);
                }
            }

            return Ok(Outcome::Ignored);
        }

        let presence = match kind {
            FsEventKind::Change => Presence::File,
            FsEventKind::Rename => self.presence(path)?,
        };

        match presence {
            Presence::File => match self.read_text(path)? {
                Some(content) => {
                    self.extra_libs.replace(path, content);
                    Ok(Outcome::ExtraLibUpdated)
                }
                None => Ok(Outcome::Stale),
            },
            Presence::Absent => {
                self.extra_libs.remove(path);
                Ok(Outcome::ExtraLibRemoved)
            }
            Presence::Directory => Ok(Outcome::Ignored),
            Presence::Stale => Ok(Outcome::Stale),
        }
    }
}
