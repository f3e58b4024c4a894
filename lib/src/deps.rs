use std::collections::{BTreeMap, BTreeSet};

use petgraph::graphmap::DiGraphMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Kind, Result};
use crate::id::ResourceId;
use crate::pattern::Pattern;
use crate::universe::Fingerprint;

/// What a compiled item read while it was compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    /// The compiled output of one resource.
    Resource(ResourceId),
    /// The set of resources matching a pattern, and their outputs.
    Collection(Snapshot),
}

/// The match set of a pattern at the time it was read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub pattern: Pattern,
    pub ids: Vec<ResourceId>,
    pub fingerprint: Fingerprint,
}

impl Snapshot {
    pub fn take<'a, I>(pattern: &Pattern, universe: I) -> Snapshot
        where I: IntoIterator<Item = &'a ResourceId>
    {
        let ids = pattern.select(universe);
        let fingerprint = Fingerprint::of_parts(ids.iter().map(|id| id.as_str()));
        Snapshot { pattern: pattern.clone(), ids, fingerprint }
    }

    /// Whether `pattern` selects a different set from `universe` now.
    pub fn is_stale<'a, I>(&self, universe: I) -> bool
        where I: IntoIterator<Item = &'a ResourceId>
    {
        Snapshot::take(&self.pattern, universe).fingerprint != self.fingerprint
    }
}

impl Dependency {
    /// The resources this dependency reads directly.
    pub fn ids(&self) -> &[ResourceId] {
        match self {
            Dependency::Resource(id) => std::slice::from_ref(id),
            Dependency::Collection(snapshot) => &snapshot.ids,
        }
    }
}

/// The dependency graph: for each compiled resource, the dependencies it
/// recorded during its last successful compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tracker {
    edges: BTreeMap<ResourceId, Vec<Dependency>>,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker::default()
    }

    /// Appends an edge `dependent -> dependency`.
    pub fn record(&mut self, dependent: &ResourceId, dependency: Dependency) {
        self.edges.entry(dependent.clone()).or_default().push(dependency);
    }

    /// Replaces every edge out of `dependent`.
    pub fn replace(&mut self, dependent: ResourceId, dependencies: Vec<Dependency>) {
        self.edges.insert(dependent, dependencies);
    }

    pub fn remove(&mut self, dependent: &ResourceId) -> Option<Vec<Dependency>> {
        self.edges.remove(dependent)
    }

    pub fn dependencies(&self, dependent: &ResourceId) -> &[Dependency] {
        self.edges.get(dependent).map_or(&[], |deps| deps.as_slice())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// A fingerprint of `pattern`'s current match set in `universe`.
    pub fn snapshot_for<'a, I>(pattern: &Pattern, universe: I) -> Snapshot
        where I: IntoIterator<Item = &'a ResourceId>
    {
        Snapshot::take(pattern, universe)
    }

    fn dependents(&self) -> FxHashMap<&ResourceId, BTreeSet<&ResourceId>> {
        let mut reverse: FxHashMap<&ResourceId, BTreeSet<&ResourceId>> = FxHashMap::default();
        for (dependent, deps) in &self.edges {
            for id in deps.iter().flat_map(|d| d.ids()) {
                reverse.entry(id).or_default().insert(dependent);
            }
        }

        reverse
    }

    /// Every resource whose last compilation read, directly or transitively,
    /// a resource in `changed`, or read a collection whose match set in
    /// `universe` differs from the recorded one.
    ///
    /// Members of `changed` are only included if they themselves depend on a
    /// changed resource.
    pub fn affected_by<'a, I>(&self, changed: &BTreeSet<ResourceId>, universe: I) -> BTreeSet<ResourceId>
        where I: IntoIterator<Item = &'a ResourceId>
    {
        let universe: Vec<&ResourceId> = universe.into_iter().collect();
        let reverse = self.dependents();

        let mut affected: BTreeSet<ResourceId> = BTreeSet::new();
        let mut work: Vec<&ResourceId> = changed.iter().collect();
        for (dependent, deps) in &self.edges {
            let stale = deps.iter().any(|dep| match dep {
                Dependency::Collection(snapshot) => snapshot.is_stale(universe.iter().copied()),
                Dependency::Resource(_) => false,
            });

            if stale && affected.insert(dependent.clone()) {
                work.push(dependent);
            }
        }

        while let Some(id) = work.pop() {
            for &dependent in reverse.get(id).into_iter().flatten() {
                if affected.insert(dependent.clone()) {
                    work.push(dependent);
                }
            }
        }

        affected
    }

    fn graph(&self) -> DiGraphMap<&str, ()> {
        let mut graph = DiGraphMap::new();
        for (dependent, deps) in &self.edges {
            graph.add_node(dependent.as_str());
            for id in deps.iter().flat_map(|d| d.ids()) {
                graph.add_edge(dependent.as_str(), id.as_str(), ());
            }
        }

        graph
    }

    /// Fails with [`Kind::DependencyCycle`] if any resource transitively
    /// depends on itself.
    pub fn check_acyclic(&self) -> Result<()> {
        let graph = self.graph();
        for mut component in petgraph::algo::tarjan_scc(&graph) {
            let cyclic = match component.as_slice() {
                [single] => graph.contains_edge(*single, *single),
                _ => true,
            };

            if cyclic {
                component.sort_unstable();
                if let Some(&first) = component.first() {
                    component.push(first);
                }

                return Err(error! {
                    "resources depend on each other",
                    "cycle" => component.join(" -> "),
                }.with_kind(Kind::DependencyCycle));
            }
        }

        Ok(())
    }

    /// Partitions `subset` into levels such that each resource's recorded
    /// dependencies within `subset` are in earlier levels. Resources with no
    /// recorded edges land in the first level. Members of a cycle, which
    /// cannot be ordered, form the last level.
    pub fn levels(&self, subset: &BTreeSet<ResourceId>) -> Vec<Vec<ResourceId>> {
        let mut pending: BTreeMap<&ResourceId, BTreeSet<&ResourceId>> = subset.iter()
            .map(|id| {
                let deps = self.dependencies(id).iter()
                    .flat_map(|d| d.ids())
                    .filter(|dep| subset.contains(*dep) && *dep != id)
                    .collect();

                (id, deps)
            })
            .collect();

        let mut levels = vec![];
        while !pending.is_empty() {
            let ready: Vec<&ResourceId> = pending.iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();

            if ready.is_empty() {
                levels.push(pending.keys().map(|id| (*id).clone()).collect());
                break;
            }

            for id in &ready {
                pending.remove(id);
            }

            for deps in pending.values_mut() {
                for id in &ready {
                    deps.remove(id);
                }
            }

            levels.push(ready.into_iter().cloned().collect());
        }

        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> BTreeSet<ResourceId> {
        list.iter().map(ResourceId::new).collect()
    }

    fn on(id: &str) -> Dependency {
        Dependency::Resource(ResourceId::new(id))
    }

    #[test]
    fn transitive_dependents() {
        let mut tracker = Tracker::new();
        tracker.record(&"post.md".into(), on("templates/post.html"));
        tracker.record(&"post.md".into(), on("templates/default.html"));
        tracker.record(&"templates/post.html".into(), on("partials/nav.html"));
        tracker.record(&"about.md".into(), on("templates/default.html"));

        let universe = ids(&["post.md", "about.md"]);
        let affected = tracker.affected_by(&ids(&["partials/nav.html"]), &universe);
        assert_eq!(affected, ids(&["templates/post.html", "post.md"]));

        let affected = tracker.affected_by(&ids(&["templates/default.html"]), &universe);
        assert_eq!(affected, ids(&["post.md", "about.md"]));

        assert!(tracker.affected_by(&ids(&["unrelated"]), &universe).is_empty());
    }

    #[test]
    fn collection_membership_changes() {
        let before = ids(&["posts/a.md", "posts/b.md", "archive.html"]);
        let posts = Pattern::parse("posts/*").unwrap();

        let mut tracker = Tracker::new();
        tracker.record(&"archive.html".into(), Dependency::Collection(Snapshot::take(&posts, &before)));
        tracker.record(&"index.html".into(), on("archive.html"));

        // Nothing changed.
        assert!(tracker.affected_by(&BTreeSet::new(), &before).is_empty());

        // A member changed.
        let affected = tracker.affected_by(&ids(&["posts/a.md"]), &before);
        assert_eq!(affected, ids(&["archive.html", "index.html"]));

        // A new member appeared.
        let after = ids(&["posts/a.md", "posts/b.md", "posts/c.md", "archive.html"]);
        let affected = tracker.affected_by(&BTreeSet::new(), &after);
        assert_eq!(affected, ids(&["archive.html", "index.html"]));
    }

    #[test]
    fn cycles_are_detected() {
        let mut tracker = Tracker::new();
        tracker.record(&"a".into(), on("b"));
        tracker.record(&"b".into(), on("c"));
        assert!(tracker.check_acyclic().is_ok());

        tracker.record(&"c".into(), on("a"));
        let error = tracker.check_acyclic().unwrap_err();
        assert_eq!(error.kind(), Kind::DependencyCycle);
        assert_eq!(error.param("cycle").as_deref(), Some("a -> b -> c -> a"));

        let mut tracker = Tracker::new();
        tracker.record(&"self".into(), on("self"));
        assert_eq!(tracker.check_acyclic().unwrap_err().kind(), Kind::DependencyCycle);
    }

    #[test]
    fn levels_order_dependencies_first() {
        let mut tracker = Tracker::new();
        tracker.record(&"index".into(), on("archive"));
        tracker.record(&"archive".into(), on("p1"));
        tracker.record(&"archive".into(), on("p2"));
        tracker.record(&"p1".into(), on("template"));

        let levels = tracker.levels(&ids(&["index", "archive", "p1", "p2", "new"]));
        let levels: Vec<Vec<&str>> = levels.iter()
            .map(|level| level.iter().map(|id| id.as_str()).collect())
            .collect();

        assert_eq!(levels, vec![vec!["new", "p1", "p2"], vec!["archive"], vec!["index"]]);
    }
}
