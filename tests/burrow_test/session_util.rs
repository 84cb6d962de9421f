use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use libburrow::{EditorModels, ExtraLib, ExtraLibSink, ModelStore, Session, SessionConfig};
use sandbox::Sandbox;

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Collects every set of extra libs pushed to it.
#[derive(Default)]
pub struct RecordingSink {
    pushes: Mutex<Vec<Vec<ExtraLib>>>,
}

impl RecordingSink {
    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Vec<ExtraLib>> {
        self.pushes.lock().unwrap().last().cloned()
    }
}

impl ExtraLibSink for RecordingSink {
    fn set_extra_libs(&self, libs: Vec<ExtraLib>) {
        self.pushes.lock().unwrap().push(libs);
    }
}

/// A session over an in-memory sandbox, with handles on its models and extra
/// lib sink.
pub struct TestSession {
    pub session: Session,
    pub models: Arc<ModelStore>,
    pub sink: Arc<RecordingSink>,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_sandbox(Arc::new(Sandbox::new_in_memory()), test_config())
    }

    pub fn with_sandbox(sandbox: Arc<Sandbox>, config: SessionConfig) -> Self {
        let _ = tracing_subscriber::fmt::try_init();

        let models = ModelStore::new();
        let sink = Arc::new(RecordingSink::default());

        let session = Session::start(
            sandbox,
            config,
            Arc::clone(&models) as Arc<dyn EditorModels>,
            Arc::clone(&sink) as Arc<dyn ExtraLibSink>,
        )
        .expect("Couldn't start session");

        TestSession {
            session,
            models,
            sink,
        }
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        self.session.sandbox()
    }

    /// Waits for every queued reconciliation to finish.
    pub fn settle(&self) {
        assert!(
            self.session.wait_idle(SETTLE_TIMEOUT),
            "session did not settle within {:?}",
            SETTLE_TIMEOUT
        );
    }

    pub fn tree_paths(&self) -> Vec<String> {
        self.session.tree().snapshot().paths()
    }
}

/// Default configuration with short debounce windows so tests stay quick.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        tree_debounce_ms: 20,
        extra_libs_debounce_ms: 20,
        ..SessionConfig::default()
    }
}
