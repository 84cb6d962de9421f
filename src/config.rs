use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TREE_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_EXTRA_LIBS_DEBOUNCE_MS: u64 = 1000;
pub const DEFAULT_DEPENDENCY_DIR: &str = "node_modules";
pub const DEFAULT_DECLARATION_SUFFIX: &str = ".d.ts";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Config file {} is not valid JSON5: {message}", .path.display())]
    Syntax { path: PathBuf, message: String },

    #[error("Config file {} has invalid contents: {source}", .path.display())]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a session, loaded from an optional JSON5 file. Every field
/// has a default, so an empty object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Quiet period before shadow tree listeners are notified.
    pub tree_debounce_ms: u64,

    /// Quiet period before extra libs are pushed to the type checker.
    pub extra_libs_debounce_ms: u64,

    /// Name of the directory that holds installed dependencies. Paths going
    /// through it never reach the shadow tree or editor models.
    pub dependency_dir: String,

    /// Files in the dependency directory with this suffix become extra libs.
    pub declaration_suffix: String,

    /// Whether to reconcile every top-level entry after mounting, so that
    /// content that was already in the sandbox shows up too.
    pub sync_root_on_mount: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tree_debounce_ms: DEFAULT_TREE_DEBOUNCE_MS,
            extra_libs_debounce_ms: DEFAULT_EXTRA_LIBS_DEBOUNCE_MS,
            dependency_dir: DEFAULT_DEPENDENCY_DIR.to_owned(),
            declaration_suffix: DEFAULT_DECLARATION_SUFFIX.to_owned(),
            sync_root_on_mount: true,
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs_err::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let value: serde_json::Value =
            json5::from_str(&contents).map_err(|err| ConfigError::Syntax {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let config: SessionConfig =
            serde_json::from_value(value).map_err(|source| ConfigError::Schema {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        log::debug!("Loaded config from {}: {:?}", path.display(), config);

        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tree_debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "treeDebounceMs must be greater than zero".to_owned(),
            ));
        }

        if self.extra_libs_debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "extraLibsDebounceMs must be greater than zero".to_owned(),
            ));
        }

        let dir = &self.dependency_dir;
        if dir.is_empty() || dir.contains('/') || dir == "." || dir == ".." {
            return Err(ConfigError::Invalid(format!(
                "dependencyDir must be a single directory name, got {:?}",
                dir
            )));
        }

        if self.declaration_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "declarationSuffix must not be empty".to_owned(),
            ));
        }

        Ok(())
    }

    pub fn tree_debounce(&self) -> Duration {
        Duration::from_millis(self.tree_debounce_ms)
    }

    pub fn extra_libs_debounce(&self) -> Duration {
        Duration::from_millis(self.extra_libs_debounce_ms)
    }

    /// Whether any segment of `path` is the dependency directory.
    pub fn is_dependency_path(&self, path: &str) -> bool {
        path.split('/').any(|segment| segment == self.dependency_dir)
    }

    pub fn is_declaration_file(&self, path: &str) -> bool {
        path.ends_with(&self.declaration_suffix)
    }
}
