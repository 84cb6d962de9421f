//! Editor buffers ("models") for open files.
//!
//! The text-editing widget itself lives outside Burrow. `EditorModels` is the
//! boundary the reconciler talks to, and `ModelStore` is an in-memory
//! implementation that the CLI and tests use.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("no model is open for {path:?}")]
    NoModel { path: String },
}

pub trait EditorModels: Send + Sync {
    /// Opens a model for `path`, replacing any existing one.
    fn create_model(&self, path: &str, content: &str);

    /// Sets the content of the model for `path`. Does nothing if the content
    /// is unchanged.
    fn update_model(&self, path: &str, content: &str) -> Result<(), ModelError>;

    /// Disposes the model for `path` and every model below `path/`.
    fn dispose_models(&self, path: &str);

    fn model_exists(&self, path: &str) -> bool;

    fn clear_models(&self);
}

/// Returns whether `candidate` is `path` itself or lies below it.
pub fn is_same_or_descendant(candidate: &str, path: &str) -> bool {
    candidate
        .strip_prefix(path)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    content: String,
    version: u64,
}

impl Model {
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Bumped every time the content changes.
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Default)]
pub struct ModelStore {
    models: Mutex<HashMap<String, Model>>,
}

impl ModelStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, path: &str) -> Option<Model> {
        self.models.lock().unwrap().get(path).cloned()
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.get(path).map(|model| model.content)
    }

    /// Paths of every open model, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.models.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.models.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EditorModels for ModelStore {
    fn create_model(&self, path: &str, content: &str) {
        log::trace!("Opening model {}", path);

        self.models.lock().unwrap().insert(
            path.to_owned(),
            Model {
                content: content.to_owned(),
                version: 1,
            },
        );
    }

    fn update_model(&self, path: &str, content: &str) -> Result<(), ModelError> {
        let mut models = self.models.lock().unwrap();

        let model = models.get_mut(path).ok_or_else(|| ModelError::NoModel {
            path: path.to_owned(),
        })?;

        if model.content != content {
            log::trace!("Updating model {}", path);
            model.content = content.to_owned();
            model.version += 1;
        }

        Ok(())
    }

    fn dispose_models(&self, path: &str) {
        let mut models = self.models.lock().unwrap();
        let before = models.len();

        models.retain(|model_path, _| !is_same_or_descendant(model_path, path));

        let disposed = before - models.len();
        if disposed > 0 {
            log::trace!("Disposed {} model(s) at {}", disposed, path);
        }
    }

    fn model_exists(&self, path: &str) -> bool {
        self.models.lock().unwrap().contains_key(path)
    }

    fn clear_models(&self) {
        self.models.lock().unwrap().clear();
    }
}
