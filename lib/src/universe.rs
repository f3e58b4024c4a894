use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Chainable, Result};
use crate::id::ResourceId;
use crate::item::Body;

/// A content hash, hex encoded.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Fingerprint {
        Fingerprint(blake3::hash(bytes).to_hex().as_str().into())
    }

    /// Hashes `parts` with a separator that cannot appear in UTF-8 text.
    pub fn of_parts<I, S>(parts: I) -> Fingerprint
        where I: IntoIterator<Item = S>, S: AsRef<[u8]>
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part.as_ref());
            hasher.update(&[0xff]);
        }

        Fingerprint(hasher.finalize().to_hex().as_str().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", &self.0[..self.0.len().min(12)])
    }
}

#[derive(Debug, Clone)]
enum Origin {
    File(Arc<Path>),
    Memory(Arc<[u8]>),
}

/// A source content unit: where its raw bytes come from.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    origin: Origin,
}

impl Resource {
    pub fn read(&self) -> Result<Vec<u8>> {
        match &self.origin {
            Origin::Memory(bytes) => Ok(bytes.to_vec()),
            Origin::File(path) => std::fs::read(path).chain_with(|| error! {
                "failed to read resource",
                "resource" => &self.id,
                "path" => path.display(),
            }),
        }
    }

    pub fn read_body(&self) -> Result<Body> {
        self.read().map(Body::from_bytes)
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        match &self.origin {
            Origin::Memory(bytes) => Ok(Fingerprint::of(bytes)),
            Origin::File(_) => self.read().map(|bytes| Fingerprint::of(&bytes)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::File(path) => Some(path),
            Origin::Memory(_) => None,
        }
    }
}

/// The set of resources a build sees, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    resources: BTreeMap<ResourceId, Resource>,
}

impl Universe {
    pub fn new() -> Self {
        Universe::default()
    }

    /// Walks `root` and adds every regular file below it, skipping hidden
    /// files and directories. Ids are paths relative to `root`.
    pub fn scan<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::scan_with(root, |_| true)
    }

    /// Like [`Universe::scan()`] but only keeps ids for which `keep` is true.
    pub fn scan_with<P, F>(root: P, keep: F) -> Result<Self>
        where P: AsRef<Path>, F: Fn(&ResourceId) -> bool
    {
        let root = root.as_ref();
        if !root.is_dir() {
            return err! {
                "content root must be an existing directory",
                "path" => root.display(),
            };
        }

        let walker = jwalk::WalkDir::new(root)
            .skip_hidden(true)
            .follow_links(true)
            .sort(true);

        let mut universe = Universe::new();
        for entry in walker {
            let entry = entry.map_err(|e| error! {
                "failed to walk content directory",
                "root" => root.display(),
                "cause" => e,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path: PathBuf = entry.path();
            let relative = path.strip_prefix(root)
                .map_err(|_| error!("walked path escaped its root", "path" => path.display()))?;

            let id = ResourceId::from_path(relative)?;
            if keep(&id) {
                universe.insert_file(id, path);
            }
        }

        tracing::debug!(root = %root.display(), resources = universe.len(), "scanned content");
        Ok(universe)
    }

    /// Adds an in-memory resource, replacing any resource with the same id.
    pub fn insert<I, B>(&mut self, id: I, bytes: B) -> &mut Self
        where I: Into<ResourceId>, B: Into<Vec<u8>>
    {
        let id = id.into();
        let origin = Origin::Memory(bytes.into().into());
        self.resources.insert(id.clone(), Resource { id, origin });
        self
    }

    /// Adds a resource backed by the file at `path`.
    pub fn insert_file<I, P>(&mut self, id: I, path: P) -> &mut Self
        where I: Into<ResourceId>, P: Into<PathBuf>
    {
        let id = id.into();
        let origin = Origin::File(path.into().into());
        self.resources.insert(id.clone(), Resource { id, origin });
        self
    }

    pub fn remove(&mut self, id: &str) -> Option<Resource> {
        self.resources.remove(id)
    }

    pub fn with<I: Into<ResourceId>, B: Into<Vec<u8>>>(mut self, id: I, bytes: B) -> Self {
        self.insert(id, bytes);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> + '_ {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
