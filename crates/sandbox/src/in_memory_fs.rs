use std::collections::BTreeMap;
use std::io;

use crate::{join_path, DirEntry, EntryKind, EventSink, FsEvent, Metadata, SandboxBackend};

#[derive(Debug, Clone)]
enum Entry {
    File(Vec<u8>),
    Dir(BTreeMap<String, Entry>),
}

/// In-memory filesystem that can be used as a sandbox backend.
///
/// Notifications are emitted synchronously, on the calling thread, after the
/// mutation that caused them has been applied:
/// * writing to an existing file raises `change`
/// * creating, removing or renaming raises `rename` for every affected path;
///   recursive removal reports descendants before their parent, and a rename
///   reports the old path and then the new one
#[derive(Debug, Default)]
pub struct InMemoryFs {
    root: BTreeMap<String, Entry>,
    sink: Option<EventSink>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, event: FsEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn dir(&self, segments: &[&str], path: &str) -> io::Result<&BTreeMap<String, Entry>> {
        let mut dir = &self.root;

        for segment in segments {
            match dir.get(*segment) {
                Some(Entry::Dir(children)) => dir = children,
                Some(Entry::File(_)) => return Err(not_a_directory(path)),
                None => return Err(not_found(path)),
            }
        }

        Ok(dir)
    }

    fn dir_mut(
        &mut self,
        segments: &[&str],
        path: &str,
    ) -> io::Result<&mut BTreeMap<String, Entry>> {
        let mut dir = &mut self.root;

        for segment in segments {
            match dir.get_mut(*segment) {
                Some(Entry::Dir(children)) => dir = children,
                Some(Entry::File(_)) => return Err(not_a_directory(path)),
                None => return Err(not_found(path)),
            }
        }

        Ok(dir)
    }
}

impl SandboxBackend for InMemoryFs {
    fn read(&mut self, path: &str) -> io::Result<Vec<u8>> {
        let segments = segments(path)?;
        let (name, parent) = segments.split_last().ok_or_else(|| is_a_directory(path))?;

        match self.dir(parent, path)?.get(*name) {
            Some(Entry::File(contents)) => Ok(contents.clone()),
            Some(Entry::Dir(_)) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<()> {
        let segments = segments(path)?;
        let (name, parent) = segments.split_last().ok_or_else(|| is_a_directory(path))?;

        let dir = self.dir_mut(parent, path)?;
        let existed = match dir.get_mut(*name) {
            Some(Entry::File(contents)) => {
                *contents = data.to_vec();
                true
            }
            Some(Entry::Dir(_)) => return Err(is_a_directory(path)),
            None => {
                dir.insert((*name).to_owned(), Entry::File(data.to_vec()));
                false
            }
        };

        if existed {
            self.emit(FsEvent::change(path));
        } else {
            self.emit(FsEvent::rename(path));
        }

        Ok(())
    }

    fn read_dir(&mut self, path: &str) -> io::Result<Vec<DirEntry>> {
        let segments = segments(path)?;

        let entries = self
            .dir(&segments, path)?
            .iter()
            .map(|(name, entry)| {
                let kind = match entry {
                    Entry::File(_) => EntryKind::File,
                    Entry::Dir(_) => EntryKind::Directory,
                };
                DirEntry::new(name.clone(), kind)
            })
            .collect();

        Ok(entries)
    }

    fn create_dir_all(&mut self, path: &str) -> io::Result<()> {
        let segments = segments(path)?;
        let mut created = Vec::new();

        let mut dir = &mut self.root;
        for (index, segment) in segments.iter().enumerate() {
            let entry = dir.entry((*segment).to_owned()).or_insert_with(|| {
                created.push(segments[..=index].join("/"));
                Entry::Dir(BTreeMap::new())
            });

            dir = match entry {
                Entry::Dir(children) => children,
                Entry::File(_) => return Err(not_a_directory(path)),
            };
        }

        for created_path in created {
            self.emit(FsEvent::rename(created_path));
        }

        Ok(())
    }

    fn remove(&mut self, path: &str) -> io::Result<()> {
        let segments = segments(path)?;
        let (name, parent) = segments.split_last().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot remove the sandbox root")
        })?;

        let removed = self
            .dir_mut(parent, path)?
            .remove(*name)
            .ok_or_else(|| not_found(path))?;

        let mut removed_paths = Vec::new();
        collect_descendants(&removed, path, &mut removed_paths);
        removed_paths.push(path.to_owned());

        for removed_path in removed_paths {
            self.emit(FsEvent::rename(removed_path));
        }

        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let from_segments = segments(from)?;
        let to_segments = segments(to)?;

        let (from_name, from_parent) = from_segments.split_last().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot rename the sandbox root")
        })?;
        let (to_name, to_parent) = to_segments.split_last().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot replace the sandbox root")
        })?;

        if from == to {
            return Ok(());
        }

        if to_segments.starts_with(&from_segments) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot move {} into itself ({})", from, to),
            ));
        }

        // Validate both ends before detaching anything.
        match self.dir(from_parent, from)?.get(*from_name) {
            Some(_) => {}
            None => return Err(not_found(from)),
        }
        match self.dir(to_parent, to)?.get(*to_name) {
            Some(Entry::Dir(children)) if !children.is_empty() => {
                return Err(io::Error::new(
                    io::ErrorKind::DirectoryNotEmpty,
                    format!("directory not empty: {}", to),
                ));
            }
            _ => {}
        }

        let entry = self
            .dir_mut(from_parent, from)?
            .remove(*from_name)
            .ok_or_else(|| not_found(from))?;
        self.dir_mut(to_parent, to)?
            .insert((*to_name).to_owned(), entry);

        self.emit(FsEvent::rename(from));
        self.emit(FsEvent::rename(to));

        Ok(())
    }

    fn metadata(&mut self, path: &str) -> io::Result<Metadata> {
        let segments = segments(path)?;

        let Some((name, parent)) = segments.split_last() else {
            return Ok(Metadata { is_file: false });
        };

        match self.dir(parent, path)?.get(*name) {
            Some(Entry::File(_)) => Ok(Metadata { is_file: true }),
            Some(Entry::Dir(_)) => Ok(Metadata { is_file: false }),
            None => Err(not_found(path)),
        }
    }

    fn watch(&mut self, sink: &EventSink) -> io::Result<()> {
        self.sink = Some(sink.clone());
        Ok(())
    }

    fn unwatch(&mut self) -> io::Result<()> {
        self.sink = None;
        Ok(())
    }
}

fn segments(path: &str) -> io::Result<Vec<&str>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid sandbox path: {:?}", path),
        ));
    }

    Ok(segments)
}

fn collect_descendants(entry: &Entry, path: &str, out: &mut Vec<String>) {
    if let Entry::Dir(children) = entry {
        for (name, child) in children {
            let child_path = join_path(path, name);
            collect_descendants(child, &child_path, out);
            out.push(child_path);
        }
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("path not found: {}", path),
    )
}

fn not_a_directory(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotADirectory,
        format!("not a directory: {}", path),
    )
}

fn is_a_directory(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::IsADirectory,
        format!("is a directory: {}", path),
    )
}
