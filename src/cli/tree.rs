use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use sandbox::Sandbox;

use crate::{
    config::SessionConfig,
    extra_libs::{ExtraLibSink, LoggingSink},
    import::MountSource,
    models::{EditorModels, ModelStore},
    session::Session,
};

use super::{print_tree, resolve_path, GlobalOptions};

/// Mount a project into an in-memory sandbox and print the resulting file
/// tree once it settles.
#[derive(Debug, Parser)]
pub struct TreeCommand {
    /// What to mount: `empty`, a local directory, or a GitHub URL.
    pub source: MountSource,

    /// Path to a session configuration file.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// How long to wait for the file tree to settle.
    #[clap(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub timeout: Duration,
}

impl TreeCommand {
    pub fn run(self, global: GlobalOptions) -> anyhow::Result<()> {
        let config_path = self.config.as_deref().map(resolve_path);
        let mut config = SessionConfig::load_or_default(config_path.as_deref())?;
        config.sync_root_on_mount = true;

        let mount_tree = self
            .source
            .load()
            .with_context(|| format!("Could not load {}", self.source))?;

        let sandbox = Arc::new(Sandbox::new_in_memory());
        let models: Arc<dyn EditorModels> = ModelStore::new();
        let sink: Arc<dyn ExtraLibSink> = Arc::new(LoggingSink);
        let session = Session::start(sandbox, config, models, sink)?;

        session.mount(&mount_tree)?;

        if !session.wait_idle(self.timeout) {
            bail!(
                "File tree did not settle within {}",
                humantime::format_duration(self.timeout)
            );
        }

        print_tree(&session.tree().snapshot(), global.color)?;
        session.teardown();

        Ok(())
    }
}
