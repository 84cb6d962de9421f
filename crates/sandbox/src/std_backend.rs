use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{
    new_debouncer,
    notify::event::{EventKind, ModifyKind},
    DebounceEventResult, Debouncer, RecommendedCache,
};

use crate::{DirEntry, EntryKind, EventSink, FsEvent, Metadata, SandboxBackend};

/// How long the watcher coalesces raw OS events before reporting them.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(50);

/// `SandboxBackend` that uses `std::fs` rooted at a directory, and the
/// `notify` crate for watching.
pub struct StdBackend {
    root: PathBuf,
    debouncer: Option<Debouncer<notify::RecommendedWatcher, RecommendedCache>>,
}

impl StdBackend {
    /// Creates a backend rooted at `root`, which must be an existing
    /// directory.
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<StdBackend> {
        // Watchers report canonical paths on some platforms, so the root has
        // to be canonical too for events to be made relative again.
        let root = fs_err::canonicalize(root.as_ref())?;

        if !fs_err::metadata(&root)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("sandbox root is not a directory: {}", root.display()),
            ));
        }

        Ok(Self {
            root,
            debouncer: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> io::Result<PathBuf> {
        if path.is_empty() {
            return Ok(self.root.clone());
        }

        let escapes = path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

        if escapes || Path::new(path).is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid sandbox path: {:?}", path),
            ));
        }

        Ok(self.root.join(path))
    }

    fn create_debouncer(
        root: PathBuf,
        sink: EventSink,
    ) -> io::Result<Debouncer<notify::RecommendedWatcher, RecommendedCache>> {
        new_debouncer(
            WATCH_DEBOUNCE,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for fs_event in convert_event(&root, &event.event) {
                            sink.emit(fs_event);
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        if error.paths.is_empty() {
                            log::warn!(
                                "File watcher requested a rescan due to rapid changes. \
                                 Some file events may have been missed."
                            );
                        } else {
                            log::warn!(
                                "File watcher error: {:?} (paths: {:?})",
                                error.kind,
                                error.paths
                            );
                        }
                    }
                }
            },
        )
        .map_err(|err| io::Error::other(format!("could not start file watcher: {:?}", err)))
    }
}

/// Converts a notify event into sandbox notifications.
///
/// Anything that can change the shape of the tree becomes `rename`; only
/// plain content modifications become `change`.
fn convert_event(root: &Path, event: &notify::Event) -> Vec<FsEvent> {
    let make: fn(String) -> FsEvent = match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => FsEvent::rename,

        EventKind::Modify(ModifyKind::Name(_)) => FsEvent::rename,

        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other) => FsEvent::change,

        // Permission and timestamp changes don't affect anything we mirror.
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => return Vec::new(),

        // We can't tell what happened, so make consumers re-read.
        EventKind::Any | EventKind::Other => FsEvent::rename,
    };

    event
        .paths
        .iter()
        .filter_map(|path| relative_path(root, path))
        .map(make)
        .collect()
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            _ => return None,
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

impl SandboxBackend for StdBackend {
    fn read(&mut self, path: &str) -> io::Result<Vec<u8>> {
        fs_err::read(self.full_path(path)?)
    }

    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<()> {
        fs_err::write(self.full_path(path)?, data)
    }

    fn read_dir(&mut self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();

        for entry in fs_err::read_dir(self.full_path(path)?)? {
            let entry = entry?;

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    log::warn!("Skipping entry with a non UTF-8 name: {:?}", name);
                    continue;
                }
            };

            // Follow symlinks so linked directories are listed as directories.
            let kind = if entry.path().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            entries.push(DirEntry::new(name, kind));
        }

        Ok(entries)
    }

    fn create_dir_all(&mut self, path: &str) -> io::Result<()> {
        fs_err::create_dir_all(self.full_path(path)?)
    }

    fn remove(&mut self, path: &str) -> io::Result<()> {
        if path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot remove the sandbox root",
            ));
        }

        let full_path = self.full_path(path)?;

        if fs_err::symlink_metadata(&full_path)?.is_dir() {
            fs_err::remove_dir_all(full_path)
        } else {
            fs_err::remove_file(full_path)
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs_err::rename(self.full_path(from)?, self.full_path(to)?)
    }

    fn metadata(&mut self, path: &str) -> io::Result<Metadata> {
        let inner = fs_err::metadata(self.full_path(path)?)?;

        Ok(Metadata {
            is_file: inner.is_file(),
        })
    }

    fn watch(&mut self, sink: &EventSink) -> io::Result<()> {
        if self.debouncer.is_some() {
            return Ok(());
        }

        let mut debouncer = Self::create_debouncer(self.root.clone(), sink.clone())?;

        debouncer
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|err| io::Error::other(format!("{:?}", err)))?;

        log::info!("Watching sandbox root: {}", self.root.display());
        self.debouncer = Some(debouncer);

        Ok(())
    }

    fn unwatch(&mut self) -> io::Result<()> {
        // Dropping the debouncer stops its watcher and worker threads.
        if self.debouncer.take().is_some() {
            log::info!("Stopped watching sandbox root: {}", self.root.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
    use tempfile::tempdir;

    use crate::{FsEventKind, Sandbox};

    fn event(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        let mut event = notify::Event::new(kind);
        event.paths = paths;
        event
    }

    #[test]
    fn converts_structural_events_to_rename() {
        let root = Path::new("/sandbox");

        let created = event(
            EventKind::Create(CreateKind::File),
            vec![root.join("src/a.ts")],
        );
        assert_eq!(
            convert_event(root, &created),
            vec![FsEvent::rename("src/a.ts")]
        );

        let removed = event(
            EventKind::Remove(RemoveKind::Folder),
            vec![root.join("pkg")],
        );
        assert_eq!(convert_event(root, &removed), vec![FsEvent::rename("pkg")]);

        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![root.join("old.ts"), root.join("new.ts")],
        );
        assert_eq!(
            convert_event(root, &renamed),
            vec![FsEvent::rename("old.ts"), FsEvent::rename("new.ts")]
        );
    }

    #[test]
    fn converts_data_changes_and_drops_metadata() {
        let root = Path::new("/sandbox");

        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            vec![root.join("a.ts")],
        );
        assert_eq!(convert_event(root, &written), vec![FsEvent::change("a.ts")]);

        let touched = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            vec![root.join("a.ts")],
        );
        assert!(convert_event(root, &touched).is_empty());
    }

    #[test]
    fn drops_root_and_foreign_paths() {
        let root = Path::new("/sandbox");

        let foreign = event(
            EventKind::Create(CreateKind::Any),
            vec![PathBuf::from("/elsewhere/a.ts"), root.to_path_buf()],
        );
        assert!(convert_event(root, &foreign).is_empty());
    }

    #[test]
    fn rejects_paths_escaping_the_root() {
        let dir = tempdir().unwrap();
        let mut backend = StdBackend::new(dir.path()).unwrap();

        for path in ["../outside", "a/../../b", "/etc/passwd", "a//b"] {
            let err = backend.read(path).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{}", path);
        }
    }

    #[test]
    fn filesystem_operations_round_trip() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(StdBackend::new(dir.path()).unwrap());

        sandbox.create_dir_all("src/nested").unwrap();
        sandbox.write("src/a.ts", "a").unwrap();
        sandbox.write("src/nested/b.ts", "b").unwrap();

        let entries = sandbox.read_dir("src").unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry::new("a.ts", EntryKind::File),
                DirEntry::new("nested", EntryKind::Directory),
            ]
        );

        sandbox.rename("src/nested", "src/moved").unwrap();
        assert_eq!(sandbox.read_to_string("src/moved/b.ts").unwrap(), "b");

        sandbox.remove("src").unwrap();
        assert!(!sandbox.exists("src").unwrap());
        assert!(!dir.path().join("src").exists());
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs_err::write(&file, "").unwrap();

        let err = StdBackend::new(&file).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotADirectory);
    }

    #[test]
    fn file_events_are_received() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(StdBackend::new(dir.path()).unwrap());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        sandbox
            .watch(Box::new(move |event| sink.lock().unwrap().push(event)))
            .unwrap();

        // Give the watcher time to start
        std::thread::sleep(Duration::from_millis(100));

        fs_err::write(dir.path().join("created.txt"), "hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let seen = events
                .lock()
                .unwrap()
                .iter()
                .any(|event| event.path == "created.txt" && event.kind == FsEventKind::Rename);

            if seen {
                break;
            }

            assert!(
                Instant::now() < deadline,
                "expected a rename event for created.txt, got {:?}",
                events.lock().unwrap()
            );
            std::thread::sleep(Duration::from_millis(20));
        }

        sandbox.unwatch().unwrap();
    }
}
