//! Compiler pipelines and the handle stages use to read other items.

mod stages;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::deps::{Dependency, Snapshot};
use crate::error::{Kind, Result};
use crate::id::ResourceId;
use crate::item::Item;
use crate::pattern::Pattern;
use crate::session::Session;

pub use stages::*;

/// One step of a [`Pipeline`].
///
/// A stage consumes the item and returns the next version of it. It may read
/// other items through `cx`; every such read is recorded as a dependency of
/// the item being compiled. Stages should be deterministic given their input
/// item and whatever they load.
pub trait Stage: Send + Sync + 'static {
    /// Name used in error reports.
    fn name(&self) -> &str;

    fn run(&self, item: Item, cx: &Compilation) -> Result<Item>;
}

/// A [`Stage`] made from a closure. See [`stage()`].
pub struct FnStage<F> {
    name: Arc<str>,
    f: F,
}

/// A stage named `name` running `f`.
pub fn stage<F>(name: &str, f: F) -> FnStage<F>
    where F: Fn(Item, &Compilation) -> Result<Item> + Send + Sync + 'static
{
    FnStage { name: name.into(), f }
}

impl<F> Stage for FnStage<F>
    where F: Fn(Item, &Compilation) -> Result<Item> + Send + Sync + 'static
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, item: Item, cx: &Compilation) -> Result<Item> {
        (self.f)(item, cx)
    }
}

/// An ordered sequence of stages. Running it threads the item through each
/// stage in turn and stops at the first failure.
///
/// An empty pipeline copies the resource unchanged.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Appends `stage`.
    pub fn then<S: Stage>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Appends a closure stage named `name`.
    pub fn map<F>(self, name: &str, f: F) -> Self
        where F: Fn(Item, &Compilation) -> Result<Item> + Send + Sync + 'static
    {
        self.then(stage(name, f))
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.stages.iter().map(|s| s.name())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every stage on `item`. A failure is annotated with the resource
    /// and the stage's name; failures that aren't already classified become
    /// [`Kind::Stage`] errors.
    pub fn run(&self, item: Item, cx: &Compilation) -> Result<Item> {
        let id = item.id.clone();
        self.stages.iter().try_fold(item, |item, stage| {
            stage.run(item, cx).map_err(|e| {
                let kind = match e.kind() {
                    Kind::Other | Kind::Io => Kind::Stage,
                    _ => Kind::Other,
                };

                e.chain(error! {
                    "compiler stage failed",
                    "resource" => &id,
                    "stage" => stage.name(),
                }.with_kind(kind))
            })
        })
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

/// The result of compiling one resource: the final item, where it's written,
/// and the snapshots saved along the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compiled {
    pub item: Arc<Item>,
    pub route: Option<PathBuf>,
    #[serde(default)]
    pub snapshots: BTreeMap<Arc<str>, Arc<Item>>,
}

#[derive(Debug, Default)]
pub(crate) struct Reads {
    pub deps: Vec<Dependency>,
    pub snapshots: BTreeMap<Arc<str>, Arc<Item>>,
}

/// The view of the build a stage gets while compiling one item.
///
/// Loads block until the loaded item is compiled, compiling it on the
/// current thread if nobody has started it yet. Cloning is cheap; clones
/// record into the same dependency list.
#[derive(Clone, derive_more::Debug)]
pub struct Compilation {
    #[debug(ignore)]
    session: Arc<Session>,
    id: ResourceId,
    route: Option<PathBuf>,
    #[debug(ignore)]
    reads: Arc<Mutex<Reads>>,
}

impl Compilation {
    pub(crate) fn new(session: Arc<Session>, id: ResourceId, route: Option<PathBuf>) -> Self {
        Compilation { session, id, route, reads: Arc::default() }
    }

    /// A compilation of `id` in an otherwise empty build, routed to `route`.
    /// Useful for exercising stages and contexts in isolation.
    pub fn detached(id: &str, route: Option<&str>) -> Self {
        let id = ResourceId::new(id);
        let route = route.map(PathBuf::from);
        let session = Session::detached(id.clone(), route.clone());
        Compilation::new(Arc::new(session), id, route)
    }

    /// The resource being compiled.
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// The output path of the resource being compiled.
    pub fn route(&self) -> Option<&Path> {
        self.route.as_deref()
    }

    /// The output path of any bound resource.
    pub fn route_of(&self, id: &ResourceId) -> Option<&Path> {
        self.session.route_of(id)
    }

    /// Whether some rule compiles `id` in this build.
    pub fn knows(&self, id: &str) -> bool {
        self.session.knows(id)
    }

    fn record(&self, dependency: Dependency) {
        let mut reads = self.reads.lock();
        let duplicate = match &dependency {
            Dependency::Resource(id) => reads.deps.iter()
                .any(|d| matches!(d, Dependency::Resource(existing) if existing == id)),
            Dependency::Collection(_) => false,
        };

        if !duplicate {
            reads.deps.push(dependency);
        }
    }

    fn require(&self, id: &ResourceId) -> Result<Arc<Compiled>> {
        self.session.require(id, Some(&self.id)).map_err(|e| {
            let kind = match e.is_fatal() {
                true => Kind::Other,
                false => Kind::Stage,
            };

            e.chain(error! {
                "failed to load dependency",
                "dependency" => id,
                "dependent" => &self.id,
            }.with_kind(kind))
        })
    }

    /// The compiled version of `id`.
    pub fn load(&self, id: &str) -> Result<Arc<Item>> {
        let id = ResourceId::new(id);
        self.record(Dependency::Resource(id.clone()));
        Ok(self.require(&id)?.item.clone())
    }

    /// The compiled versions of every bound resource matching `pattern`, in
    /// id order. Adding or removing a matching resource invalidates the
    /// item being compiled, as does a change to any of the matches.
    pub fn load_all(&self, pattern: &Pattern) -> Result<Vec<Arc<Item>>> {
        self.load_all_with(pattern, |compiled| Ok(compiled.item.clone()))
    }

    /// The snapshot named `name` that `id` saved while it was compiled.
    pub fn load_snapshot(&self, id: &str, name: &str) -> Result<Arc<Item>> {
        let id = ResourceId::new(id);
        self.record(Dependency::Resource(id.clone()));
        let compiled = self.require(&id)?;
        snapshot_of(&compiled, &id, name)
    }

    /// Like [`Compilation::load_all()`], but the snapshot named `name` of
    /// each match.
    pub fn load_all_snapshots(&self, pattern: &Pattern, name: &str) -> Result<Vec<Arc<Item>>> {
        self.load_all_with(pattern, |compiled| snapshot_of(compiled, &compiled.item.id, name))
    }

    fn load_all_with<F>(&self, pattern: &Pattern, f: F) -> Result<Vec<Arc<Item>>>
        where F: Fn(&Compiled) -> Result<Arc<Item>>
    {
        let snapshot = Snapshot::take(pattern, self.session.bound_ids());
        let ids = snapshot.ids.clone();
        self.record(Dependency::Collection(snapshot));

        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            items.push(f(&*self.require(id)?)?);
        }

        Ok(items)
    }

    /// Saves `item` under `name` for other items to read with
    /// [`Compilation::load_snapshot()`].
    pub fn save_snapshot(&self, name: &str, item: &Item) {
        self.reads.lock().snapshots.insert(name.into(), Arc::new(item.clone()));
    }

    /// The ids of bound resources matching `pattern`, without loading them.
    /// Records the same collection dependency as a load.
    pub fn select(&self, pattern: &Pattern) -> Vec<ResourceId> {
        let snapshot = Snapshot::take(pattern, self.session.bound_ids());
        let ids = snapshot.ids.clone();
        self.record(Dependency::Collection(snapshot));
        ids
    }

    pub(crate) fn finish(&self) -> Reads {
        std::mem::take(&mut *self.reads.lock())
    }

    /// Resources read so far.
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        self.reads.lock().deps.iter()
            .flat_map(|d| d.ids().iter().cloned())
            .collect()
    }
}

fn snapshot_of(compiled: &Compiled, id: &ResourceId, name: &str) -> Result<Arc<Item>> {
    compiled.snapshots.get(name).cloned().ok_or_else(|| error! {
        "resource saved no snapshot with this name",
        "resource" => id,
        "snapshot" => name,
    }.with_kind(Kind::Stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(Compilation: Send, Sync, Clone);
    static_assertions::assert_impl_all!(Pipeline: Send, Sync, Clone);

    #[test]
    fn pipelines_short_circuit() {
        let cx = Compilation::detached("a.txt", None);
        let pipeline = Pipeline::new()
            .map("upper", |item, _| {
                let text = item.body.as_text()?.to_uppercase();
                Ok(item.with_body(text))
            })
            .map("fail", |_, _| err!("nope"))
            .map("unreachable", |_, _| panic!("ran after a failure"));

        let item = Item::new(ResourceId::new("a.txt"), "hi");
        let error = pipeline.run(item, &cx).unwrap_err();
        assert_eq!(error.kind(), Kind::Stage);
        assert_eq!(error.param("stage").as_deref(), Some("fail"));
        assert_eq!(error.param("resource").as_deref(), Some("a.txt"));
    }

    #[test]
    fn classified_failures_keep_their_kind() {
        let cx = Compilation::detached("a.txt", None);
        let pipeline = Pipeline::new().map("template", |_, _| {
            Err(error!("missing").with_kind(Kind::TemplateMissing))
        });

        let item = Item::new(ResourceId::new("a.txt"), "");
        let error = pipeline.run(item, &cx).unwrap_err();
        assert_eq!(error.kind(), Kind::TemplateMissing);
        assert_eq!(error.param("stage").as_deref(), Some("template"));
    }

    #[test]
    fn empty_pipeline_copies() {
        let cx = Compilation::detached("img.png", Some("img.png"));
        let item = Item::new(ResourceId::new("img.png"), vec![0xffu8, 0x00]);
        assert_eq!(Pipeline::new().run(item.clone(), &cx).unwrap(), item);
        assert_eq!(cx.route(), Some(Path::new("img.png")));
    }

    #[test]
    fn snapshots_are_recorded() {
        let cx = Compilation::detached("post.md", None);
        cx.save_snapshot("content", &Item::new(ResourceId::new("post.md"), "<p>x</p>"));
        let reads = cx.finish();
        assert_eq!(reads.snapshots["content"].body, "<p>x</p>".into());
        assert!(cx.load("elsewhere.md").is_err());
        assert!(cx.dependencies().contains("elsewhere.md"));
    }
}
