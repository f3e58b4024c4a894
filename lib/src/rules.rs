use std::fmt;
use std::sync::Arc;

use crate::compiler::Pipeline;
use crate::error::{Error, Kind, Result};
use crate::id::ResourceId;
use crate::pattern::{IntoPattern, Pattern};
use crate::route::Route;

#[derive(Debug)]
enum Selector {
    /// Resources in the universe matching the pattern. A malformed pattern
    /// is kept until the build validates the rules.
    Match(std::result::Result<Pattern, Error>),
    /// These ids, whether or not they exist in the universe.
    Create(Vec<ResourceId>),
}

/// A selector bound to a route and a pipeline.
#[derive(Debug)]
pub struct Rule {
    name: Arc<str>,
    selector: Selector,
    route: Route,
    pipeline: Pipeline,
}

impl Rule {
    /// `match <pattern>` or `create <ids>`. A cached output is only reused
    /// if the rule that produced it has the same name.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Whether this rule binds `id`. `exists` is whether `id` is in the
    /// universe.
    pub fn claims(&self, id: &ResourceId, exists: bool) -> bool {
        match &self.selector {
            Selector::Match(Ok(pattern)) => exists && pattern.matches(id),
            Selector::Match(Err(_)) => false,
            Selector::Create(ids) => ids.contains(id),
        }
    }

    pub fn created_ids(&self) -> &[ResourceId] {
        match &self.selector {
            Selector::Create(ids) => ids,
            Selector::Match(_) => &[],
        }
    }
}

/// The ordered rule list of a site. Each resource is compiled by the first
/// rule, in declaration order, that claims it; later rules never see it.
///
/// ```rust
/// use quire::{Rules, Route, Pipeline};
///
/// let rules = Rules::new()
///     .matching("templates/*", Route::none(), Pipeline::new())
///     .matching("css/*", Route::identity(), Pipeline::new())
///     .create(["archive.html"], Route::identity(), Pipeline::new());
///
/// assert_eq!(rules.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Rules {
    rules: Vec<Arc<Rule>>,
}

impl Rules {
    pub fn new() -> Self {
        Rules::default()
    }

    /// Binds the resources matching `pattern`. String patterns are parsed
    /// when the build starts.
    pub fn matching<P: IntoPattern>(mut self, pattern: P, route: Route, pipeline: Pipeline) -> Self {
        let pattern = pattern.into_pattern();
        let name = match &pattern {
            Ok(pattern) => format!("match {pattern}"),
            Err(e) => format!("match <{}>", e.param("pattern").unwrap_or_default()),
        };

        let selector = Selector::Match(pattern);
        self.rules.push(Arc::new(Rule { name: name.into(), selector, route, pipeline }));
        self
    }

    /// Binds `ids`, which need not exist in the universe. An id that doesn't
    /// starts with an empty body.
    pub fn create<I, T>(mut self, ids: I, route: Route, pipeline: Pipeline) -> Self
        where I: IntoIterator<Item = T>, T: Into<ResourceId>
    {
        let ids: Vec<ResourceId> = ids.into_iter().map(Into::into).collect();
        let list = ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ");
        let name = format!("create {list}");
        let selector = Selector::Create(ids);
        self.rules.push(Arc::new(Rule { name: name.into(), selector, route, pipeline }));
        self
    }

    /// Fails with the first malformed pattern.
    pub fn validate(&self) -> Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            if let Selector::Match(Err(e)) = &rule.selector {
                return Err(e.clone().chain(error! {
                    "invalid rule pattern",
                    "rule" => i + 1,
                }.with_kind(Kind::Pattern)));
            }
        }

        Ok(())
    }

    /// The first rule claiming `id`.
    pub fn find(&self, id: &ResourceId, exists: bool) -> Option<&Arc<Rule>> {
        self.rules.iter().find(|rule| rule.claims(id, exists))
    }

    pub fn created_ids(&self) -> impl Iterator<Item = &ResourceId> + '_ {
        self.rules.iter().flat_map(|rule| rule.created_ids())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> + '_ {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {:?}", self.name, self.route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let rules = Rules::new()
            .matching("posts/draft-*", Route::none(), Pipeline::new())
            .matching("posts/*", Route::set_extension("html"), Pipeline::new())
            .create(["posts/a.md", "feed.xml"], Route::identity(), Pipeline::new());

        let id = |s: &str| ResourceId::new(s);
        assert_eq!(&**rules.find(&id("posts/draft-1.md"), true).unwrap().name(), "match posts/draft-*");
        assert_eq!(&**rules.find(&id("posts/a.md"), true).unwrap().name(), "match posts/*");
        assert_eq!(&**rules.find(&id("feed.xml"), false).unwrap().name(), "create posts/a.md, feed.xml");
        assert!(rules.find(&id("posts/b.md"), false).is_none());
        assert!(rules.find(&id("about.md"), true).is_none());
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn malformed_patterns_fail_validation() {
        let rules = Rules::new()
            .matching("ok/*", Route::identity(), Pipeline::new())
            .matching("bad//x", Route::identity(), Pipeline::new());

        let error = rules.validate().unwrap_err();
        assert_eq!(error.kind(), Kind::Pattern);
        assert_eq!(error.param("rule").as_deref(), Some("2"));
        assert_eq!(error.param("pattern").as_deref(), Some("bad//x"));
    }
}
