use std::{
    path::PathBuf,
    sync::{Arc, Weak},
    thread,
};

use anyhow::Context;
use clap::Parser;
use sandbox::{Sandbox, StdBackend};

use crate::{
    config::SessionConfig,
    extra_libs::{ExtraLibSink, LoggingSink},
    fs_tree::FsTree,
    import::MountSource,
    models::{EditorModels, ModelStore},
    session::Session,
};

use super::{print_tree, resolve_path, GlobalOptions};

/// Mount a project into a sandbox directory and keep watching it.
#[derive(Debug, Parser)]
pub struct MountCommand {
    /// What to mount: `empty`, a local directory, or a GitHub URL such as
    /// `https://github.com/<owner>/<repo>/tree/<branch>/<path>`.
    pub source: MountSource,

    /// Directory to use as the sandbox. Defaults to a temporary directory that
    /// is removed on exit.
    #[clap(long)]
    pub workdir: Option<PathBuf>,

    /// Path to a session configuration file.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Print the file tree every time it changes.
    #[clap(long)]
    pub print_tree: bool,
}

impl MountCommand {
    pub fn run(self, global: GlobalOptions) -> anyhow::Result<()> {
        let config_path = self.config.as_deref().map(resolve_path);
        let config = SessionConfig::load_or_default(config_path.as_deref())?;

        let mount_tree = self
            .source
            .load()
            .with_context(|| format!("Could not load {}", self.source))?;

        // Held until the process exits so the temporary sandbox stays around.
        let mut _temp_dir = None;
        let root = match &self.workdir {
            Some(workdir) => {
                let workdir = resolve_path(workdir).into_owned();
                fs_err::create_dir_all(&workdir)?;
                workdir
            }
            None => {
                let temp_dir = tempfile::Builder::new()
                    .prefix("burrow-sandbox-")
                    .tempdir()
                    .context("Could not create a temporary sandbox directory")?;
                let path = temp_dir.path().to_path_buf();
                _temp_dir = Some(temp_dir);
                path
            }
        };

        let backend = StdBackend::new(&root)
            .with_context(|| format!("Could not open sandbox at {}", root.display()))?;
        let sandbox = Arc::new(Sandbox::new(backend));

        let models: Arc<dyn EditorModels> = ModelStore::new();
        let sink: Arc<dyn ExtraLibSink> = Arc::new(LoggingSink);
        let session = Session::start(sandbox, config, models, sink)?;
        log::debug!("Session config: {:?}", session.config());

        let tree: Weak<FsTree> = Arc::downgrade(session.tree());
        let print = self.print_tree;
        let color = global.color;
        session.tree().subscribe(move || {
            let tree = match tree.upgrade() {
                Some(tree) => tree,
                None => return,
            };

            let snapshot = tree.snapshot();
            let counts = snapshot.counts();
            log::info!(
                "File tree updated: {} file(s), {} directories",
                counts.files,
                counts.directories
            );

            if print {
                if let Err(err) = print_tree(&snapshot, color) {
                    log::warn!("Could not print the file tree: {}", err);
                }
            }
        });

        session.ports().subscribe(|urls| {
            if urls.is_empty() {
                log::info!("No preview ports open");
            } else {
                log::info!("Preview ports: {}", urls.join(", "));
            }
        });

        session.mount(&mount_tree)?;

        log::info!(
            "Mounted {} into {} (session {})",
            self.source,
            root.display(),
            session.session_id()
        );
        log::info!("Watching for changes. Press Ctrl+C to stop.");

        loop {
            thread::park();
        }
    }
}
