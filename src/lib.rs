pub mod cli;

pub mod change_queue;
pub mod config;
mod debounce;
pub mod extra_libs;
pub mod fs_tree;
pub mod import;
pub mod logging;
pub mod models;
pub mod preview_ports;
pub mod reconciler;
pub mod session;
mod subscription;

pub use config::{ConfigError, SessionConfig};
pub use extra_libs::{ExtraLib, ExtraLibSink, ExtraLibs, LoggingSink};
pub use fs_tree::{FsDir, FsNode, FsTree, TreeCounts, TreeError};
pub use import::MountSource;
pub use models::{EditorModels, ModelError, ModelStore};
pub use preview_ports::PreviewPorts;
pub use reconciler::{Outcome, Reconciler};
pub use session::{Session, SessionError, SessionId};
pub use subscription::ListenerId;
