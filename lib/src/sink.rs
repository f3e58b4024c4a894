use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::error::{Chainable, Result};

/// Where compiled items are written.
pub trait Sink: Send + Sync {
    /// Writes `bytes` to `path`, relative to the sink's root, creating parent
    /// directories as needed.
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}

/// Writes into a directory on disk.
#[derive(Debug, Clone)]
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        DirSink { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Sink for DirSink {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).chain_with(|| error! {
                "failed to create output directory",
                "path" => parent.display(),
            })?;
        }

        std::fs::write(&target, bytes).chain_with(|| error! {
            "failed to write output file",
            "path" => target.display(),
        })
    }
}

/// Keeps written files in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: DashMap<PathBuf, Arc<[u8]>>,
    writes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<Arc<[u8]>> {
        self.files.get(path.as_ref()).map(|entry| entry.value().clone())
    }

    /// The file at `path` as text, if it exists and is UTF-8.
    pub fn get_str<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        self.get(path).and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
    }

    /// Every path written so far, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// The number of calls to [`Sink::write()`] so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Sink for MemorySink {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files.insert(path.to_path_buf(), bytes.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_sink_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirSink::new(dir.path());
        sink.write(Path::new("posts/2024/a.html"), b"<p>a</p>").unwrap();
        let written = std::fs::read_to_string(dir.path().join("posts/2024/a.html")).unwrap();
        assert_eq!(written, "<p>a</p>");
    }

    #[test]
    fn memory_sink_counts_writes() {
        let sink = MemorySink::new();
        sink.write(Path::new("b.html"), b"b").unwrap();
        sink.write(Path::new("a.html"), b"a").unwrap();
        sink.write(Path::new("a.html"), b"a2").unwrap();

        assert_eq!(sink.writes(), 3);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.paths(), [PathBuf::from("a.html"), PathBuf::from("b.html")]);
        assert_eq!(sink.get_str("a.html").as_deref(), Some("a2"));
    }
}
