use std::fmt;
use std::borrow::Borrow;
use std::path::{Component, Path};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The stable identifier of a content unit: its `/`-separated path relative to
/// the content root, e.g. `posts/2024-01-05-hello.md`.
///
/// Cloning is cheap. Ordering is lexicographic by the path string, which is
/// the order [`Pattern::select`](crate::Pattern::select) yields.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    /// Normalizes `id`: `\` becomes `/`, leading `./` and `/` are dropped.
    pub fn new<S: AsRef<str>>(id: S) -> ResourceId {
        let id = id.as_ref().replace('\\', "/");
        let mut id = id.as_str();
        loop {
            match id.strip_prefix("./").or_else(|| id.strip_prefix('/')) {
                Some(rest) => id = rest,
                None => break,
            }
        }

        ResourceId(id.into())
    }

    /// The id of the file at `path`, which must be relative and made only of
    /// normal, UTF-8 components.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<ResourceId> {
        let path = path.as_ref();
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(s) => match s.to_str() {
                    Some(s) => segments.push(s),
                    None => return err! {
                        "resource path is not valid UTF-8",
                        "path" => path.display(),
                    },
                },
                Component::CurDir => continue,
                _ => return err! {
                    "resource path must be relative and normalized",
                    "path" => path.display(),
                },
            }
        }

        Ok(ResourceId(segments.join("/").into()))
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last `/`-separated segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit_once('/').map_or(&*self.0, |(_, name)| name)
    }

    /// File name without the final extension.
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// The final extension, if any.
    pub fn extension(&self) -> Option<&str> {
        match self.file_name().rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Everything before the last `/`, or `""` at the root.
    pub fn directory(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(dir, _)| dir)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.split('/')
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        ResourceId::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        ResourceId::new(value)
    }
}

impl From<&ResourceId> for ResourceId {
    fn from(value: &ResourceId) -> Self {
        value.clone()
    }
}

impl PartialEq<str> for ResourceId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ResourceId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceId;

    #[test]
    fn normalization() {
        assert_eq!(ResourceId::new("./posts/a.md"), "posts/a.md");
        assert_eq!(ResourceId::new("/css\\main.css"), "css/main.css");
        assert_eq!(ResourceId::from_path("posts/./a.md").unwrap(), "posts/a.md");
        assert!(ResourceId::from_path("../a.md").is_err());
        assert!(ResourceId::from_path("/etc/passwd").is_err());
    }

    #[test]
    fn name_parts() {
        let id = ResourceId::new("posts/2024-01-05-hello.md");
        assert_eq!(id.file_name(), "2024-01-05-hello.md");
        assert_eq!(id.file_stem(), "2024-01-05-hello");
        assert_eq!(id.extension(), Some("md"));
        assert_eq!(id.directory(), "posts");

        let id = ResourceId::new(".htaccess");
        assert_eq!(id.file_stem(), ".htaccess");
        assert_eq!(id.extension(), None);
        assert_eq!(id.directory(), "");
    }
}
