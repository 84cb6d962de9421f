//! Declaration files handed to the type checker as auxiliary sources.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use indexmap::IndexMap;
use serde::Serialize;

use crate::debounce::Debouncer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraLib {
    pub content: String,
    /// Sandbox path as a `file:///` URI.
    pub file_path: String,
}

/// Turns a sandbox path into the URI form the type checker keys libs by.
pub fn lib_uri(path: &str) -> String {
    format!("file:///{}", path.trim_start_matches('/'))
}

/// Receives the full set of extra libs whenever it changes.
pub trait ExtraLibSink: Send + Sync {
    fn set_extra_libs(&self, libs: Vec<ExtraLib>);
}

/// Sink that only logs what would have been sent to a type checker.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl ExtraLibSink for LoggingSink {
    fn set_extra_libs(&self, libs: Vec<ExtraLib>) {
        log::debug!("Setting {} extra lib(s)", libs.len());

        for lib in &libs {
            log::trace!("  {} ({} bytes)", lib.file_path, lib.content.len());
        }
    }
}

type LibMap = IndexMap<String, ExtraLib>;

/// Registry of extra libs. Every change schedules a debounced push of the
/// whole set to the sink, since the type checker restarts its work on each
/// push.
pub struct ExtraLibs {
    libs: Arc<Mutex<LibMap>>,
    sink: Arc<dyn ExtraLibSink>,
    debouncer: Debouncer,
}

impl ExtraLibs {
    pub fn new(sink: Arc<dyn ExtraLibSink>, debounce: Duration) -> Self {
        let libs = Arc::new(Mutex::new(LibMap::new()));

        let to_push = Arc::clone(&libs);
        let push_sink = Arc::clone(&sink);
        let debouncer = Debouncer::new("ExtraLibs", debounce, move || {
            push(&to_push, push_sink.as_ref());
        });

        Self {
            libs,
            sink,
            debouncer,
        }
    }

    pub fn add(&self, content: impl Into<String>, path: &str) {
        let uri = lib_uri(path);

        self.libs.lock().unwrap().insert(
            uri.clone(),
            ExtraLib {
                content: content.into(),
                file_path: uri,
            },
        );

        self.debouncer.schedule();
    }

    /// Removes the lib at `path` and anything below it, then adds `content`
    /// at `path`.
    pub fn replace(&self, path: &str, content: impl Into<String>) {
        self.remove(path);
        self.add(content, path);
    }

    /// Removes the lib at `path` and every lib below `path/`.
    pub fn remove(&self, path: &str) {
        let uri = lib_uri(path);
        let prefix = format!("{}/", uri);

        self.libs
            .lock()
            .unwrap()
            .retain(|key, _| key != &uri && !key.starts_with(&prefix));

        self.debouncer.schedule();
    }

    pub fn clear(&self) {
        self.libs.lock().unwrap().clear();
        self.debouncer.schedule();
    }

    /// Pushes the current set to the sink right away.
    pub fn flush(&self) {
        push(&self.libs, self.sink.as_ref());
    }

    /// Whether there is a lib at `path` or below it.
    pub fn contains_under(&self, path: &str) -> bool {
        let uri = lib_uri(path);
        let prefix = format!("{}/", uri);

        self.libs
            .lock()
            .unwrap()
            .keys()
            .any(|key| key == &uri || key.starts_with(&prefix))
    }

    pub fn get(&self, path: &str) -> Option<ExtraLib> {
        self.libs.lock().unwrap().get(&lib_uri(path)).cloned()
    }

    /// Current libs in insertion order.
    pub fn libs(&self) -> Vec<ExtraLib> {
        self.libs.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.libs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push(libs: &Mutex<LibMap>, sink: &dyn ExtraLibSink) {
    let snapshot: Vec<ExtraLib> = libs.lock().unwrap().values().cloned().collect();
    sink.set_extra_libs(snapshot);
}
