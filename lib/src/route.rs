use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Chainable, Kind, Result};
use crate::id::ResourceId;

type RouteFn = dyn Fn(&ResourceId) -> Option<String> + Send + Sync;

#[derive(Clone)]
enum Inner {
    Identity,
    SetExtension(Arc<str>),
    Constant(Arc<str>),
    Gsub(regex::Regex, Arc<str>),
    Custom(Arc<RouteFn>),
    Never,
    Compose(Route, Route),
}

/// Maps a [`ResourceId`] to the path, relative to the output directory, its
/// compiled item is written to. Routes are pure: the same id always resolves
/// to the same path.
///
/// ```rust
/// use quire::{Route, ResourceId};
///
/// let id = ResourceId::new("posts/hello.md");
/// let route = Route::set_extension("html");
/// assert_eq!(route.resolve(&id).unwrap().to_str(), Some("posts/hello.html"));
///
/// let route = Route::gsub("^posts/", "blog/").unwrap().then(route);
/// assert_eq!(route.resolve(&id).unwrap().to_str(), Some("blog/hello.html"));
///
/// assert!(Route::none().resolve(&id).is_none());
/// ```
#[derive(Clone)]
pub struct Route(Arc<Inner>);

impl Route {
    fn new(inner: Inner) -> Route {
        Route(Arc::new(inner))
    }

    /// Writes the item to its own id.
    pub fn identity() -> Route {
        Route::new(Inner::Identity)
    }

    /// Replaces the final extension of the id with `ext`, or appends one if
    /// there is none. An empty `ext` strips the extension.
    pub fn set_extension(ext: &str) -> Route {
        Route::new(Inner::SetExtension(ext.trim_start_matches('.').into()))
    }

    /// Writes the item to `path` regardless of its id.
    pub fn constant(path: &str) -> Route {
        Route::new(Inner::Constant(ResourceId::new(path).as_str().into()))
    }

    /// Replaces every match of `regex` in the id with `replacement`, which may
    /// refer to capture groups as `$1` or `${name}`.
    pub fn gsub(regex: &str, replacement: &str) -> Result<Route> {
        let regex = regex::Regex::new(regex).chain_with(|| error! {
            "malformed route substitution",
            "regex" => regex,
        }.with_kind(Kind::Pattern))?;

        Ok(Route::new(Inner::Gsub(regex, replacement.into())))
    }

    /// Routes with an arbitrary function. Returning `None` leaves the item
    /// unwritten.
    pub fn custom<F>(f: F) -> Route
        where F: Fn(&ResourceId) -> Option<String> + Send + Sync + 'static
    {
        Route::new(Inner::Custom(Arc::new(f)))
    }

    /// Never writes the item. Templates and other items that only exist to
    /// be loaded use this route.
    pub fn none() -> Route {
        Route::new(Inner::Never)
    }

    /// Applies `first`, then `second` to the path `first` produced.
    pub fn compose(first: Route, second: Route) -> Route {
        Route::new(Inner::Compose(first, second))
    }

    /// `Route::compose(self, next)`.
    pub fn then(self, next: Route) -> Route {
        Route::compose(self, next)
    }

    fn apply(&self, id: &ResourceId) -> Option<String> {
        match &*self.0 {
            Inner::Identity => Some(id.as_str().to_string()),
            Inner::SetExtension(ext) => {
                let stem_len = match id.extension() {
                    Some(old) => id.as_str().len() - old.len() - 1,
                    None => id.as_str().len(),
                };

                let stem = &id.as_str()[..stem_len];
                match ext.is_empty() {
                    true => Some(stem.to_string()),
                    false => Some(format!("{stem}.{ext}")),
                }
            }
            Inner::Constant(path) => Some(path.to_string()),
            Inner::Gsub(regex, replacement) => {
                Some(regex.replace_all(id.as_str(), &**replacement).into_owned())
            }
            Inner::Custom(f) => f(id),
            Inner::Never => None,
            Inner::Compose(first, second) => {
                let intermediate = ResourceId::new(first.apply(id)?);
                second.apply(&intermediate)
            }
        }
    }

    /// The output path of `id`, or `None` if the item is not written.
    pub fn resolve(&self, id: &ResourceId) -> Option<PathBuf> {
        let path = ResourceId::new(self.apply(id)?);
        match path.as_str().is_empty() {
            true => None,
            false => Some(PathBuf::from(path.as_str())),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Inner::Identity => write!(f, "identity"),
            Inner::SetExtension(ext) => write!(f, "set_extension({ext:?})"),
            Inner::Constant(path) => write!(f, "constant({path:?})"),
            Inner::Gsub(regex, rep) => write!(f, "gsub({:?}, {rep:?})", regex.as_str()),
            Inner::Custom(_) => write!(f, "custom"),
            Inner::Never => write!(f, "none"),
            Inner::Compose(a, b) => write!(f, "{a:?} then {b:?}"),
        }
    }
}
