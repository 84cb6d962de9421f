use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use sandbox::{FsEvent, MountTree, Sandbox};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    change_queue::ChangeQueue,
    config::{ConfigError, SessionConfig},
    extra_libs::{ExtraLibSink, ExtraLibs},
    fs_tree::FsTree,
    models::{EditorModels, ModelError},
    preview_ports::PreviewPorts,
    reconciler::Reconciler,
};

/// How long teardown waits for a reconciliation in flight to finish.
const TEARDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A randomly generated ID for a session, so that anything holding on to
/// state from an older session can tell it apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Io {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Model {
        #[from]
        source: ModelError,
    },

    #[error(transparent)]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("The session has been torn down")]
    TornDown,
}

/// Everything that belongs to one mounted project: the sandbox, the shadow
/// tree mirroring it, open editor models, extra libs and preview ports.
///
/// Sandbox change notifications are turned into reconciliation tasks and run
/// one at a time on the session's change queue. UI actions such as creating
/// or renaming files go to the sandbox, and the shadow tree learns about them
/// through the resulting notifications, like any other change.
///
/// A session is torn down explicitly with `teardown`, or when dropped.
pub struct Session {
    /// Runs reconciliation tasks. Shut down first during teardown so that
    /// nothing queued runs against a sandbox that is going away.
    change_queue: Arc<ChangeQueue>,

    /// When the session was started. Used only for user-facing diagnostics.
    start_time: Instant,

    session_id: SessionId,
    config: SessionConfig,

    sandbox: Arc<Sandbox>,
    tree: Arc<FsTree>,
    ports: Arc<PreviewPorts>,
    models: Arc<dyn EditorModels>,
    extra_libs: Arc<ExtraLibs>,
    reconciler: Arc<Reconciler>,

    torn_down: AtomicBool,
}

impl Session {
    /// Starts a session on `sandbox`: builds every component and subscribes
    /// to the sandbox's change and port notifications.
    pub fn start(
        sandbox: Arc<Sandbox>,
        config: SessionConfig,
        models: Arc<dyn EditorModels>,
        extra_lib_sink: Arc<dyn ExtraLibSink>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let session_id = SessionId::new();
        log::trace!("Starting session {}", session_id);

        let tree = Arc::new(FsTree::new(config.tree_debounce()));
        let ports = Arc::new(PreviewPorts::new());
        let extra_libs = Arc::new(ExtraLibs::new(
            extra_lib_sink,
            config.extra_libs_debounce(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&sandbox),
            Arc::clone(&tree),
            Arc::clone(&models),
            Arc::clone(&extra_libs),
            config.clone(),
        ));

        let change_queue = Arc::new(ChangeQueue::start());

        {
            let change_queue = Arc::clone(&change_queue);
            let reconciler = Arc::clone(&reconciler);

            sandbox.watch(Box::new(move |event| {
                enqueue_reconcile(&change_queue, &reconciler, event);
            }))?;
        }

        {
            let ports = Arc::clone(&ports);
            sandbox.on_port(Box::new(move |event| ports.handle_port_event(&event)));
        }

        Ok(Self {
            change_queue,
            start_time: Instant::now(),
            session_id,
            config,
            sandbox,
            tree,
            ports,
            models,
            extra_libs,
            reconciler,
            torn_down: AtomicBool::new(false),
        })
    }

    /// Writes `tree` into the sandbox root. The shadow tree catches up
    /// through the queue like it does for any other change.
    pub fn mount(&self, tree: &MountTree) -> Result<(), SessionError> {
        self.ensure_live()?;

        log::info!("Mounting {} file(s)", tree.file_count());
        self.sandbox.mount("", tree)?;

        if self.config.sync_root_on_mount {
            self.sync_root()?;
        }

        Ok(())
    }

    /// Queues a reconciliation for every top-level entry of the sandbox, so
    /// that content that got there without a notification shows up. Safe to
    /// call any number of times.
    ///
    /// Returns how many entries were queued.
    pub fn sync_root(&self) -> Result<usize, SessionError> {
        self.ensure_live()?;

        let entries = self.sandbox.read_dir("")?;
        for entry in &entries {
            self.reconcile_later(FsEvent::rename(entry.name()));
        }

        Ok(entries.len())
    }

    /// Queues a reconciliation for an arbitrary event.
    pub fn reconcile_later(&self, event: FsEvent) {
        enqueue_reconcile(&self.change_queue, &self.reconciler, event);
    }

    pub fn create_file(&self, path: &str, contents: &str) -> Result<(), SessionError> {
        self.ensure_live()?;

        let (parent, _) = sandbox::split_path(path);
        if !parent.is_empty() {
            self.sandbox.create_dir_all(parent)?;
        }

        self.sandbox.write(path, contents)?;
        Ok(())
    }

    pub fn create_dir(&self, path: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.sandbox.create_dir_all(path)?;
        Ok(())
    }

    pub fn rename_path(&self, from: &str, to: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.sandbox.rename(from, to)?;
        Ok(())
    }

    pub fn remove_path(&self, path: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.sandbox.remove(path)?;
        Ok(())
    }

    /// Saves an edited buffer: updates its model and writes it back to the
    /// sandbox. The resulting change notification finds the model already up
    /// to date.
    pub fn save_model(&self, path: &str, content: &str) -> Result<(), SessionError> {
        self.ensure_live()?;

        self.models.update_model(path, content)?;
        self.sandbox.write(path, content)?;

        Ok(())
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub fn tree(&self) -> &Arc<FsTree> {
        &self.tree
    }

    pub fn ports(&self) -> &Arc<PreviewPorts> {
        &self.ports
    }

    pub fn models(&self) -> &Arc<dyn EditorModels> {
        &self.models
    }

    pub fn extra_libs(&self) -> &Arc<ExtraLibs> {
        &self.extra_libs
    }

    /// True when no reconciliation is waiting or running.
    pub fn is_idle(&self) -> bool {
        self.change_queue.is_idle()
    }

    /// Blocks until every queued reconciliation has run, or `timeout`
    /// passes. Returns whether the queue went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.change_queue.wait_idle(timeout)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Stops watching the sandbox, invalidates it, abandons queued work and
    /// empties the shadow tree, preview ports, models and extra libs.
    ///
    /// A reconciliation that is already running keeps going against the
    /// invalidated sandbox, fails, and is logged.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        log::debug!(
            "Tearing down session {} after {}",
            self.session_id,
            humantime::format_duration(Duration::from_secs(self.start_time.elapsed().as_secs()))
        );

        if let Err(err) = self.sandbox.unwatch() {
            log::debug!("Error while unwatching sandbox: {}", err);
        }

        self.sandbox.teardown();
        self.change_queue.shutdown();

        // A task in flight may already be past its sandbox reads and about to
        // touch the tree or models, so let it finish before clearing them.
        if !self.change_queue.wait_idle(TEARDOWN_DRAIN_TIMEOUT) {
            log::warn!(
                "Reconciliation still running after {}, clearing session state anyway",
                humantime::format_duration(TEARDOWN_DRAIN_TIMEOUT)
            );
        }

        self.ports.clear();
        self.tree.clear();
        self.models.clear_models();
        self.extra_libs.clear();
        self.extra_libs.flush();
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_torn_down() {
            Err(SessionError::TornDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn enqueue_reconcile(queue: &ChangeQueue, reconciler: &Arc<Reconciler>, event: FsEvent) {
    let label = format!("{} {}", event.kind, event.path);
    let reconciler = Arc::clone(reconciler);

    queue.enqueue(label, move || {
        reconciler.reconcile(&event)?;
        Ok(())
    });
}
