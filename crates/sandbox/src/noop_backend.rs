use std::io;

use crate::{DirEntry, EventSink, Metadata, SandboxBackend};

/// `SandboxBackend` that returns an error on every operation.
///
/// Torn-down sandboxes switch to this backend.
#[non_exhaustive]
pub struct NoopBackend;

impl NoopBackend {
    pub fn new() -> Self {
        Self
    }
}

fn unavailable() -> io::Error {
    io::Error::other("NoopBackend doesn't do anything: the sandbox has been torn down")
}

impl SandboxBackend for NoopBackend {
    fn read(&mut self, _path: &str) -> io::Result<Vec<u8>> {
        Err(unavailable())
    }

    fn write(&mut self, _path: &str, _data: &[u8]) -> io::Result<()> {
        Err(unavailable())
    }

    fn read_dir(&mut self, _path: &str) -> io::Result<Vec<DirEntry>> {
        Err(unavailable())
    }

    fn create_dir_all(&mut self, _path: &str) -> io::Result<()> {
        Err(unavailable())
    }

    fn remove(&mut self, _path: &str) -> io::Result<()> {
        Err(unavailable())
    }

    fn rename(&mut self, _from: &str, _to: &str) -> io::Result<()> {
        Err(unavailable())
    }

    fn metadata(&mut self, _path: &str) -> io::Result<Metadata> {
        Err(unavailable())
    }

    fn watch(&mut self, _sink: &EventSink) -> io::Result<()> {
        Err(unavailable())
    }

    fn unwatch(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Default for NoopBackend {
    fn default() -> Self {
        Self::new()
    }
}
