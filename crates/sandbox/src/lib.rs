/*!
Implementation of the sandboxed project filesystem that Burrow mounts
projects into, with a configurable backend and change notification.

The sandbox is the ground truth that Burrow's shadow tree and editor models
mirror. Consumers never get rich change events from it: a recursive watch
only reports `(kind, path)` pairs, where `kind` is either
[`FsEventKind::Change`] (contents of an existing file changed) or
[`FsEventKind::Rename`] (something was created, removed or renamed at
`path`). Consumers are expected to re-read the sandbox to find out what
actually happened.

## Backends
* `StdBackend`, which uses `std::fs` rooted at a directory and the `notify`
  crate for watching
* `InMemoryFs`, a simple in-memory filesystem that emits notifications
  synchronously, useful for testing and for throwaway sessions
* `NoopBackend`, which always returns errors; a torn-down sandbox switches to
  it so that in-flight work fails instead of touching stale state

All paths are relative, `/`-separated, and have no leading or trailing
slash. The empty string names the sandbox root.
*/

mod in_memory_fs;
mod mount;
mod noop_backend;
mod std_backend;

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, RwLock};

pub use in_memory_fs::InMemoryFs;
pub use mount::{FileContents, MountEntry, MountTree};
pub use noop_backend::NoopBackend;
pub use std_backend::StdBackend;

mod sealed {
    use super::*;

    /// Sealing trait for SandboxBackend.
    pub trait Sealed {}

    impl Sealed for NoopBackend {}
    impl Sealed for StdBackend {}
    impl Sealed for InMemoryFs {}
}

/// Trait that transforms `io::Result<T>` into `io::Result<Option<T>>`.
///
/// `Ok(None)` takes the place of IO errors whose `io::ErrorKind` is `NotFound`.
pub trait IoResultExt<T> {
    fn with_not_found(self) -> io::Result<Option<T>>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_not_found(self) -> io::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Backend that can be used to create a `Sandbox`.
///
/// This trait is sealed and cannot not be implemented outside this crate.
pub trait SandboxBackend: sealed::Sealed + Send + 'static {
    fn read(&mut self, path: &str) -> io::Result<Vec<u8>>;
    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<()>;
    fn read_dir(&mut self, path: &str) -> io::Result<Vec<DirEntry>>;
    fn create_dir_all(&mut self, path: &str) -> io::Result<()>;
    fn remove(&mut self, path: &str) -> io::Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;
    fn metadata(&mut self, path: &str) -> io::Result<Metadata>;

    fn watch(&mut self, sink: &EventSink) -> io::Result<()>;
    fn unwatch(&mut self) -> io::Result<()>;
}

/// Whether a directory entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single child returned by [`Sandbox::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: String,
    kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Sandbox equivalent to [`std::fs::Metadata`][std::fs::Metadata].
///
/// [std::fs::Metadata]: https://doc.rust-lang.org/stable/std/fs/struct.Metadata.html
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub(crate) is_file: bool,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_dir(&self) -> bool {
        !self.is_file
    }
}

/// The two kinds of notification a sandbox watch can raise.
///
/// `Rename` conflates creation, removal and renaming; the watch API cannot
/// tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Change,
    Rename,
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsEventKind::Change => f.write_str("change"),
            FsEventKind::Rename => f.write_str("rename"),
        }
    }
}

/// A raw change notification raised by a sandbox watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: String,
}

impl FsEvent {
    pub fn change(path: impl Into<String>) -> Self {
        Self {
            kind: FsEventKind::Change,
            path: path.into(),
        }
    }

    pub fn rename(path: impl Into<String>) -> Self {
        Self {
            kind: FsEventKind::Rename,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortAction {
    Open,
    Close,
}

/// A network port exposed by a process running inside the sandbox opened or
/// closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEvent {
    pub port: u16,
    pub action: PortAction,
    pub url: String,
}

pub type WatchCallback = Box<dyn Fn(FsEvent) + Send + Sync + 'static>;
pub type PortCallback = Box<dyn Fn(PortEvent) + Send + Sync + 'static>;

/// Shared slot that backends push change notifications into.
///
/// The slot outlives backend swaps, so a sandbox that has been torn down
/// simply stops delivering once its callback is cleared.
#[derive(Clone, Default)]
pub struct EventSink {
    callback: Arc<RwLock<Option<WatchCallback>>>,
}

impl EventSink {
    pub(crate) fn emit(&self, event: FsEvent) {
        log::trace!("sandbox event: {} {}", event.kind, event.path);

        if let Some(callback) = &*self.callback.read().unwrap() {
            callback(event);
        }
    }

    fn set(&self, callback: Option<WatchCallback>) {
        *self.callback.write().unwrap() = callback;
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Joins a sandbox directory path and a child name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Splits a sandbox path into its parent directory (empty for top-level
/// entries) and its final segment.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(index) => (&path[..index], &path[index + 1..]),
        None => ("", path),
    }
}

struct SandboxInner {
    backend: Box<dyn SandboxBackend>,
    torn_down: bool,
}

/// A sandboxed filesystem with a configurable backend.
///
/// All operations on the Sandbox take a lock on the internal backend, so
/// every call observes the filesystem at a single point in time.
pub struct Sandbox {
    inner: Mutex<SandboxInner>,
    events: EventSink,
    ports: RwLock<Option<PortCallback>>,
}

impl Sandbox {
    /// Creates a new `Sandbox` with the given backend.
    pub fn new<B: SandboxBackend>(backend: B) -> Self {
        Self {
            inner: Mutex::new(SandboxInner {
                backend: Box::new(backend),
                torn_down: false,
            }),
            events: EventSink::default(),
            ports: RwLock::new(None),
        }
    }

    /// Creates a new, empty `Sandbox` backed by memory.
    pub fn new_in_memory() -> Self {
        Self::new(InMemoryFs::new())
    }

    /// Read a file from the sandbox.
    ///
    /// Roughly equivalent to [`std::fs::read`][std::fs::read].
    ///
    /// [std::fs::read]: https://doc.rust-lang.org/stable/std/fs/fn.read.html
    #[inline]
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.inner.lock().unwrap().backend.read(path)
    }

    /// Read a file from the sandbox into a string.
    ///
    /// Roughly equivalent to [`std::fs::read_to_string`][std::fs::read_to_string].
    ///
    /// [std::fs::read_to_string]: https://doc.rust-lang.org/stable/std/fs/fn.read_to_string.html
    pub fn read_to_string(&self, path: &str) -> io::Result<String> {
        let contents = self.read(path)?;

        String::from_utf8(contents).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("File was not valid UTF-8: {}", path),
            )
        })
    }

    /// Write a file to the sandbox, replacing its contents if it exists.
    ///
    /// Roughly equivalent to [`std::fs::write`][std::fs::write].
    ///
    /// [std::fs::write]: https://doc.rust-lang.org/stable/std/fs/fn.write.html
    #[inline]
    pub fn write<C: AsRef<[u8]>>(&self, path: &str, contents: C) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .backend
            .write(path, contents.as_ref())
    }

    /// Read all of the children of a directory, sorted by name.
    ///
    /// Roughly equivalent to [`std::fs::read_dir`][std::fs::read_dir].
    ///
    /// [std::fs::read_dir]: https://doc.rust-lang.org/stable/std/fs/fn.read_dir.html
    pub fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = self.inner.lock().unwrap().backend.read_dir(path)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Creates a directory at the provided location, recursively creating
    /// all parent components if they are missing.
    ///
    /// Roughly equivalent to [`std::fs::create_dir_all`][std::fs::create_dir_all].
    ///
    /// [std::fs::create_dir_all]: https://doc.rust-lang.org/stable/std/fs/fn.create_dir_all.html
    #[inline]
    pub fn create_dir_all(&self, path: &str) -> io::Result<()> {
        self.inner.lock().unwrap().backend.create_dir_all(path)
    }

    /// Remove a file, or a directory and all of its descendants.
    #[inline]
    pub fn remove(&self, path: &str) -> io::Result<()> {
        self.inner.lock().unwrap().backend.remove(path)
    }

    /// Move a file or directory to a new location.
    ///
    /// Roughly equivalent to [`std::fs::rename`][std::fs::rename].
    ///
    /// [std::fs::rename]: https://doc.rust-lang.org/stable/std/fs/fn.rename.html
    #[inline]
    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.inner.lock().unwrap().backend.rename(from, to)
    }

    /// Query metadata about the given path.
    #[inline]
    pub fn metadata(&self, path: &str) -> io::Result<Metadata> {
        self.inner.lock().unwrap().backend.metadata(path)
    }

    /// Return whether the given path exists.
    pub fn exists(&self, path: &str) -> io::Result<bool> {
        Ok(self.metadata(path).with_not_found()?.is_some())
    }

    /// Writes every entry of `tree` into the directory at `path`, creating
    /// directories as needed. Existing files are overwritten.
    pub fn mount(&self, path: &str, tree: &MountTree) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if !path.is_empty() {
            inner.backend.create_dir_all(path)?;
        }

        mount::write_tree(inner.backend.as_mut(), path, tree)
    }

    /// Starts a recursive watch on the sandbox root. Every change reported by
    /// the backend is handed to `callback`, possibly from another thread.
    ///
    /// Replaces any previously registered callback.
    pub fn watch(&self, callback: WatchCallback) -> io::Result<()> {
        self.events.set(Some(callback));
        self.inner.lock().unwrap().backend.watch(&self.events)
    }

    /// Stops delivering change notifications.
    pub fn unwatch(&self) -> io::Result<()> {
        self.events.set(None);
        self.inner.lock().unwrap().backend.unwatch()
    }

    /// Registers the callback that receives port lifecycle notifications.
    pub fn on_port(&self, callback: PortCallback) {
        *self.ports.write().unwrap() = Some(callback);
    }

    /// Reports that a process inside the sandbox opened or closed a port.
    ///
    /// Called by whatever hosts the sandbox's processes.
    pub fn announce_port(&self, event: PortEvent) {
        if self.is_torn_down() {
            log::debug!("Ignoring port event for torn-down sandbox: {:?}", event);
            return;
        }

        if let Some(callback) = &*self.ports.read().unwrap() {
            callback(event);
        }
    }

    /// Invalidates this sandbox. Watches and port callbacks are dropped and
    /// the backend is replaced with one that fails every operation, so any
    /// work still holding a handle to this sandbox errors out.
    pub fn teardown(&self) {
        self.events.set(None);
        *self.ports.write().unwrap() = None;

        let mut inner = self.inner.lock().unwrap();
        if inner.torn_down {
            return;
        }

        if let Err(err) = inner.backend.unwatch() {
            log::debug!("Error stopping sandbox watch during teardown: {}", err);
        }

        inner.backend = Box::new(NoopBackend::new());
        inner.torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.lock().unwrap().torn_down
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    fn recording_sandbox() -> (Sandbox, Arc<Mutex<Vec<FsEvent>>>) {
        let sandbox = Sandbox::new_in_memory();
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&events);
        sandbox
            .watch(Box::new(move |event| sink.lock().unwrap().push(event)))
            .unwrap();

        (sandbox, events)
    }

    #[test]
    fn split_and_join_paths() {
        assert_eq!(split_path("src/lib/a.ts"), ("src/lib", "a.ts"));
        assert_eq!(split_path("a.ts"), ("", "a.ts"));
        assert_eq!(join_path("", "a.ts"), "a.ts");
        assert_eq!(join_path("src", "a.ts"), "src/a.ts");
    }

    #[test]
    fn read_dir_is_sorted_and_typed() {
        let sandbox = Sandbox::new_in_memory();
        sandbox.write("b.txt", "b").unwrap();
        sandbox.create_dir_all("a").unwrap();
        sandbox.write("c.txt", "c").unwrap();

        let entries = sandbox.read_dir("").unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry::new("a", EntryKind::Directory),
                DirEntry::new("b.txt", EntryKind::File),
                DirEntry::new("c.txt", EntryKind::File),
            ]
        );
    }

    #[test]
    fn read_to_string_rejects_invalid_utf8() {
        let sandbox = Sandbox::new_in_memory();
        sandbox.write("bin", [0xFF, 0xFE, 0x00, 0x80]).unwrap();

        let err = sandbox.read_to_string("bin").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn with_not_found_maps_missing_paths() {
        let sandbox = Sandbox::new_in_memory();

        assert!(sandbox.metadata("missing").with_not_found().unwrap().is_none());
        assert!(!sandbox.exists("missing").unwrap());
    }

    #[test]
    fn mount_emits_rename_events() {
        let (sandbox, events) = recording_sandbox();

        let mut tree = MountTree::new();
        tree.insert_file("package.json", "{}");
        tree.insert_dir("src").insert_file("index.ts", "export {}");

        sandbox.mount("", &tree).unwrap();

        assert_eq!(
            sandbox.read_to_string("src/index.ts").unwrap(),
            "export {}"
        );

        let events = events.lock().unwrap();
        assert!(events.contains(&FsEvent::rename("package.json")));
        assert!(events.contains(&FsEvent::rename("src")));
        assert!(events.contains(&FsEvent::rename("src/index.ts")));
    }

    #[test]
    fn unwatch_stops_delivery() {
        let (sandbox, events) = recording_sandbox();

        sandbox.write("a.txt", "a").unwrap();
        sandbox.unwatch().unwrap();
        sandbox.write("b.txt", "b").unwrap();

        assert_eq!(*events.lock().unwrap(), vec![FsEvent::rename("a.txt")]);
    }

    #[test]
    fn teardown_fails_later_operations() {
        let (sandbox, events) = recording_sandbox();
        sandbox.write("a.txt", "a").unwrap();

        sandbox.teardown();

        assert!(sandbox.is_torn_down());
        assert!(sandbox.read("a.txt").is_err());
        assert!(sandbox.read_dir("").is_err());
        assert!(sandbox.write("b.txt", "b").is_err());
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn port_events_reach_callback_until_teardown() {
        let sandbox = Sandbox::new_in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        sandbox.on_port(Box::new(move |event| sink.lock().unwrap().push(event)));

        let open = PortEvent {
            port: 5173,
            action: PortAction::Open,
            url: "http://localhost:5173".to_owned(),
        };
        sandbox.announce_port(open.clone());
        sandbox.teardown();
        sandbox.announce_port(open.clone());

        assert_eq!(*seen.lock().unwrap(), vec![open]);
    }
}
