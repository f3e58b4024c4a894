use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::collections::BTreeMap;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::compiler::{Compilation, Compiled};
use crate::deps::Dependency;
use crate::error::{Chainable, Kind, Result};
use crate::id::ResourceId;
use crate::item::{Body, Item};
use crate::rules::Rule;
use crate::store::Store;
use crate::universe::Universe;

/// A resource bound to the rule that compiles it.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub rule: Arc<Rule>,
    pub route: Option<PathBuf>,
}

/// State shared by every compilation of one build invocation.
pub(crate) struct Session {
    universe: Universe,
    bindings: BTreeMap<ResourceId, Binding>,
    routes: BTreeMap<ResourceId, Option<PathBuf>>,
    pub store: Store<Arc<Compiled>>,
    pub edges: Mutex<FxHashMap<ResourceId, Vec<Dependency>>>,
}

impl Session {
    pub fn new(universe: Universe, bindings: BTreeMap<ResourceId, Binding>) -> Self {
        let routes = bindings.iter()
            .map(|(id, binding)| (id.clone(), binding.route.clone()))
            .collect();

        Session {
            universe,
            bindings,
            routes,
            store: Store::new(),
            edges: Mutex::new(FxHashMap::default()),
        }
    }

    /// A session that knows `id` and its route but compiles nothing.
    pub fn detached(id: ResourceId, route: Option<PathBuf>) -> Self {
        let mut session = Session::new(Universe::new(), BTreeMap::new());
        session.routes.insert(id, route);
        session
    }

    pub fn bindings(&self) -> &BTreeMap<ResourceId, Binding> {
        &self.bindings
    }

    pub fn bound_ids(&self) -> impl Iterator<Item = &ResourceId> + '_ {
        self.routes.keys()
    }

    pub fn knows(&self, id: &str) -> bool {
        self.routes.contains_key(id)
    }

    pub fn route_of(&self, id: &ResourceId) -> Option<&Path> {
        self.routes.get(id)?.as_deref()
    }

    /// The compiled output of `id`, compiling it now if it is pending.
    pub fn require(self: &Arc<Self>, id: &ResourceId, by: Option<&ResourceId>) -> Result<Arc<Compiled>> {
        self.store.require(id, by, || self.compile(id))
    }

    fn compile(self: &Arc<Self>, id: &ResourceId) -> Result<Arc<Compiled>> {
        let binding = self.bindings.get(id).ok_or_else(|| error! {
            "no rule compiles the requested resource",
            "resource" => id,
        }.with_kind(Kind::Stage))?;

        let body = match self.universe.get(id.as_str()) {
            Some(resource) => resource.read_body().chain_with(|| error! {
                "failed to read resource",
                "resource" => id,
                "stage" => "read",
            }.with_kind(Kind::Stage))?,
            None => Body::empty(),
        };

        let cx = Compilation::new(self.clone(), id.clone(), binding.route.clone());
        let item = binding.rule.pipeline().run(Item::new(id.clone(), body), &cx)?;
        let reads = cx.finish();

        tracing::debug!(
            resource = %id,
            rule = %binding.rule.name(),
            dependencies = reads.deps.len(),
            "compiled",
        );

        self.edges.lock().insert(id.clone(), reads.deps);
        Ok(Arc::new(Compiled {
            item: Arc::new(item),
            route: binding.route.clone(),
            snapshots: reads.snapshots,
        }))
    }
}
