//! Builds mount trees from the places a project can come from: nothing, a
//! local directory, or a GitHub repository.

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};

use anyhow::{bail, Context};
use sandbox::{FileContents, MountTree};
use thiserror::Error;
use walkdir::WalkDir;

const GITHUB_PREFIX: &str = "https://github.com/";

#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "Invalid Git URL '{url}'. Expected https://github.com/<owner>/<repo>[/tree/<branch>[/<path>]]"
)]
pub struct GitUrlError {
    url: String,
}

/// A GitHub repository, optionally narrowed down to a branch and a directory
/// inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub repo_url: String,
    pub branch: Option<String>,
    /// Directory inside the repository, without leading or trailing slashes.
    /// Empty for the repository root.
    pub path: String,
}

/// Parses `https://github.com/<owner>/<repo>[/tree/<branch>[/<path>]]`.
pub fn parse_git_url(url: &str) -> Result<GitSource, GitUrlError> {
    let invalid = || GitUrlError {
        url: url.to_owned(),
    };

    let rest = url.strip_prefix(GITHUB_PREFIX).ok_or_else(invalid)?;
    let mut parts = rest.splitn(3, '/');

    let owner = parts.next().filter(|part| !part.is_empty()).ok_or_else(invalid)?;
    let repo = parts.next().filter(|part| !part.is_empty()).ok_or_else(invalid)?;
    let repo_url = format!("{}{}/{}", GITHUB_PREFIX, owner, repo);

    let tail = match parts.next() {
        Some(tail) => tail,
        None => {
            return Ok(GitSource {
                repo_url,
                branch: None,
                path: String::new(),
            })
        }
    };

    let after_tree = tail.strip_prefix("tree/").ok_or_else(invalid)?;
    let (branch, path) = match after_tree.find('/') {
        Some(index) => (&after_tree[..index], &after_tree[index..]),
        None => (after_tree, ""),
    };

    if branch.is_empty() {
        return Err(invalid());
    }

    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);

    if path.split('/').any(|segment| segment == "..") {
        return Err(invalid());
    }

    Ok(GitSource {
        repo_url,
        branch: Some(branch.to_owned()),
        path: path.to_owned(),
    })
}

/// Where the project being mounted comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    Empty,
    Git(GitSource),
    Local(PathBuf),
}

impl MountSource {
    pub fn parse(source: &str) -> Result<Self, GitUrlError> {
        if source == "empty" {
            Ok(MountSource::Empty)
        } else if source.starts_with(GITHUB_PREFIX) {
            Ok(MountSource::Git(parse_git_url(source)?))
        } else {
            Ok(MountSource::Local(PathBuf::from(source)))
        }
    }

    pub fn load(&self) -> anyhow::Result<MountTree> {
        match self {
            MountSource::Empty => Ok(MountTree::new()),
            MountSource::Local(path) => tree_from_dir(path),
            MountSource::Git(source) => clone_git(source),
        }
    }
}

impl FromStr for MountSource {
    type Err = GitUrlError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

impl fmt::Display for MountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountSource::Empty => write!(f, "empty workspace"),
            MountSource::Local(path) => write!(f, "{}", path.display()),
            MountSource::Git(source) => {
                write!(f, "{}", source.repo_url)?;
                if let Some(branch) = &source.branch {
                    write!(f, " ({})", branch)?;
                }
                if !source.path.is_empty() {
                    write!(f, " /{}", source.path)?;
                }
                Ok(())
            }
        }
    }
}

/// Reads a directory from disk into a mount tree, skipping `.git`. Files
/// that are valid UTF-8 are kept as text, anything else as bytes.
pub fn tree_from_dir(root: &Path) -> anyhow::Result<MountTree> {
    let metadata = fs_err::metadata(root)?;
    if !metadata.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let mut tree = MountTree::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.with_context(|| format!("Could not read {}", root.display()))?;

        let relative = entry.path().strip_prefix(root)?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect();

        let segments = match segments {
            Some(segments) => segments,
            None => {
                log::warn!("Skipping path with a non UTF-8 name: {}", relative.display());
                continue;
            }
        };

        let (name, ancestors) = match segments.split_last() {
            Some(split) => split,
            None => continue,
        };

        let parent = ancestors
            .iter()
            .fold(&mut tree, |dir, segment| dir.insert_dir(*segment));

        let file_type = entry.file_type();
        if file_type.is_dir() {
            parent.insert_dir(*name);
        } else if file_type.is_file() {
            let contents = fs_err::read(entry.path())?;
            parent.insert_file(*name, FileContents::from_bytes(contents));
        } else {
            log::debug!("Skipping {}, which is neither a file nor a directory", relative.display());
        }
    }

    log::debug!("Read {} file(s) from {}", tree.file_count(), root.display());
    Ok(tree)
}

/// Shallow-clones a repository with the `git` CLI and reads it, or the
/// requested directory inside it, into a mount tree.
pub fn clone_git(source: &GitSource) -> anyhow::Result<MountTree> {
    let temp_dir = tempfile::Builder::new()
        .prefix("burrow-clone-")
        .tempdir()
        .context("Could not create a temporary directory to clone into")?;
    let repo_dir = temp_dir.path().join("repo");

    let mut command = Command::new("git");
    command.args(["clone", "--depth", "1", "--single-branch"]);
    if let Some(branch) = &source.branch {
        command.args(["--branch", branch]);
    }
    command.arg(&source.repo_url).arg(&repo_dir);

    log::info!("Cloning {}...", source.repo_url);

    let output = command.output().context("Failed to run git clone")?;
    if !output.status.success() {
        bail!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let root = if source.path.is_empty() {
        repo_dir
    } else {
        repo_dir.join(&source.path)
    };

    tree_from_dir(&root)
        .with_context(|| format!("Could not read '{}' from {}", source.path, source.repo_url))
}
