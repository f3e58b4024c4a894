use std::path::Path;
use std::sync::Arc;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compiler::Compiled;
use crate::deps::Tracker;
use crate::error::{Chainable, Result};
use crate::id::ResourceId;
use crate::universe::Fingerprint;

/// What the last successful compilation of a resource saw and produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Name of the rule that compiled the resource.
    pub rule: Arc<str>,
    pub output: Option<Arc<Compiled>>,
}

/// State carried between builds: per-resource entries and the dependency
/// graph of the last build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildCache {
    #[serde(default)]
    pub(crate) entries: BTreeMap<ResourceId, CacheEntry>,
    #[serde(default)]
    pub(crate) graph: Tracker,
}

impl BuildCache {
    pub fn new() -> Self {
        BuildCache::default()
    }

    /// Reads the cache at `path`. A missing file is an empty cache, and so is
    /// an unreadable one, with a warning: the next build recompiles
    /// everything.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<BuildCache> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BuildCache::new()),
            Err(e) => return Err(e).chain_with(|| error! {
                "failed to read build cache",
                "path" => path.display(),
            }),
        };

        match serde_json::from_slice(&bytes) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable build cache");
                Ok(BuildCache::new())
            }
        }
    }

    /// Writes the cache to `path`, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).chain_with(|| error! {
                "failed to create build cache directory",
                "path" => parent.display(),
            })?;
        }

        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json).chain_with(|| error! {
            "failed to write build cache",
            "path" => path.display(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> + '_ {
        self.entries.keys()
    }

    /// The dependency graph recorded by the last build.
    pub fn graph(&self) -> &Tracker {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.graph = Tracker::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::Dependency;
    use crate::item::Item;

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cache.json");

        let id = ResourceId::new("posts/a.md");
        let compiled = Compiled {
            item: Arc::new(Item::new(id.clone(), "<p>a</p>")),
            route: Some("posts/a.html".into()),
            snapshots: BTreeMap::new(),
        };

        let mut cache = BuildCache::new();
        cache.entries.insert(id.clone(), CacheEntry {
            fingerprint: Fingerprint::of(b"a"),
            rule: "match posts/*".into(),
            output: Some(Arc::new(compiled.clone())),
        });

        cache.graph.record(&id, Dependency::Resource("templates/post.html".into()));
        cache.save(&path).unwrap();

        let loaded = BuildCache::load(&path).unwrap();
        let entry = loaded.get("posts/a.md").unwrap();
        assert_eq!(entry.fingerprint, Fingerprint::of(b"a"));
        assert_eq!(entry.output.as_deref(), Some(&compiled));
        assert_eq!(loaded.graph().dependencies(&id).len(), 1);
    }

    #[test]
    fn missing_or_corrupt_caches_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BuildCache::load(dir.path().join("nope.json")).unwrap().is_empty());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert!(BuildCache::load(&corrupt).unwrap().is_empty());
    }
}
