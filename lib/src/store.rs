use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::error::{Error, Kind, Result};
use crate::id::ResourceId;

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Running,
    Done(T),
    Failed(Error),
}

#[derive(Debug)]
struct State<T> {
    slots: FxHashMap<ResourceId, Slot<T>>,
    /// `waits[a] = b`: the compilation of `a` is blocked on `b`.
    waits: FxHashMap<ResourceId, ResourceId>,
}

/// Compilation results for one build, one slot per bound resource.
///
/// A slot is claimed by the first caller of [`Store::require()`] that finds
/// it pending; that caller compiles it inline. Later callers block until the
/// result is in. Blocking on a resource that is itself waiting, directly or
/// transitively, on the caller is reported as a dependency cycle instead.
#[derive(Debug)]
pub struct Store<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T: Clone> Store<T> {
    pub fn new() -> Self {
        Store {
            state: Mutex::new(State { slots: FxHashMap::default(), waits: FxHashMap::default() }),
            ready: Condvar::new(),
        }
    }

    /// Registers `id` as needing compilation.
    pub fn pending(&self, id: ResourceId) {
        self.state.lock().slots.insert(id, Slot::Pending);
    }

    /// Registers `id` as already compiled.
    pub fn done(&self, id: ResourceId, value: T) {
        self.state.lock().slots.insert(id, Slot::Done(value));
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.state.lock().slots.contains_key(id)
    }

    /// The result for `id`, compiling it with `compile` if nobody has claimed
    /// it yet. `by` is the resource whose compilation needs `id`, if any.
    pub fn require<F>(&self, id: &ResourceId, by: Option<&ResourceId>, compile: F) -> Result<T>
        where F: FnOnce() -> Result<T>
    {
        let mut state = self.state.lock();
        loop {
            match state.slots.get(id) {
                None => return Err(error! {
                    "no rule compiles the requested resource",
                    "resource" => id,
                }.with_kind(Kind::Stage)),
                Some(Slot::Done(value)) => return Ok(value.clone()),
                Some(Slot::Failed(error)) => return Err(error.clone()),
                Some(Slot::Pending) => {
                    state.slots.insert(id.clone(), Slot::Running);
                    if let Some(by) = by {
                        state.waits.insert(by.clone(), id.clone());
                    }

                    drop(state);
                    let result = compile();

                    let mut state = self.state.lock();
                    if let Some(by) = by {
                        state.waits.remove(by);
                    }

                    let slot = match &result {
                        Ok(value) => Slot::Done(value.clone()),
                        Err(error) => Slot::Failed(error.clone()),
                    };

                    state.slots.insert(id.clone(), slot);
                    self.ready.notify_all();
                    return result;
                }
                Some(Slot::Running) => {
                    if let Some(by) = by {
                        if let Some(cycle) = cycle_through(&state.waits, by, id) {
                            return Err(error! {
                                "resources depend on each other",
                                "cycle" => cycle,
                            }.with_kind(Kind::DependencyCycle));
                        }

                        state.waits.insert(by.clone(), id.clone());
                    }

                    self.ready.wait(&mut state);
                    if let Some(by) = by {
                        state.waits.remove(by);
                    }
                }
            }
        }
    }

    /// The final result for `id`, or `None` if it never finished.
    pub fn result(&self, id: &ResourceId) -> Option<Result<T>> {
        match self.state.lock().slots.get(id)? {
            Slot::Done(value) => Some(Ok(value.clone())),
            Slot::Failed(error) => Some(Err(error.clone())),
            Slot::Pending | Slot::Running => None,
        }
    }
}

impl<T: Clone> Default for Store<T> {
    fn default() -> Self {
        Store::new()
    }
}

/// If `by` waiting on `id` closes a loop in `waits`, the loop as
/// `by -> id -> ... -> by`.
fn cycle_through(
    waits: &FxHashMap<ResourceId, ResourceId>,
    by: &ResourceId,
    id: &ResourceId,
) -> Option<String> {
    let mut path = vec![by.as_str(), id.as_str()];
    let mut current = id;
    while current != by {
        current = waits.get(current)?;
        path.push(current.as_str());
        if path.len() > waits.len() + 2 {
            return None;
        }
    }

    Some(path.join(" -> "))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::new(s)
    }

    #[test]
    fn compiles_once() {
        let store = Store::new();
        store.pending(id("a"));
        store.done(id("b"), 2);

        let calls = AtomicUsize::new(0);
        let compile = || { calls.fetch_add(1, Ordering::SeqCst); Ok(1) };
        assert_eq!(store.require(&id("a"), None, compile).unwrap(), 1);
        assert_eq!(store.require(&id("a"), None, compile).unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(store.require(&id("b"), None, || Ok(0)).unwrap(), 2);
        assert_eq!(store.require(&id("c"), None, || Ok(0)).unwrap_err().kind(), Kind::Stage);
    }

    #[test]
    fn failures_are_remembered() {
        let store: Store<i32> = Store::new();
        store.pending(id("a"));
        let result = store.require(&id("a"), None, || err!("boom"));
        assert!(result.is_err());
        assert_eq!(store.result(&id("a")).unwrap().unwrap_err().message(), "boom");
    }

    #[test]
    fn inline_cycles_are_detected() {
        let store: Arc<Store<i32>> = Arc::new(Store::new());
        store.pending(id("x"));
        store.pending(id("y"));

        // x loads y, which loads x.
        let result = store.require(&id("x"), None, || {
            store.require(&id("y"), Some(&id("x")), || {
                store.require(&id("x"), Some(&id("y")), || Ok(0))
            })
        });

        let error = result.unwrap_err();
        assert_eq!(error.kind(), Kind::DependencyCycle);
        assert_eq!(error.param("cycle").as_deref(), Some("y -> x -> y"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let store: Store<i32> = Store::new();
        store.pending(id("x"));
        let result = store.require(&id("x"), None, || {
            store.require(&id("x"), Some(&id("x")), || Ok(0))
        });

        assert_eq!(result.unwrap_err().kind(), Kind::DependencyCycle);
    }

    #[test]
    fn waits_for_other_threads() {
        let store: Arc<Store<usize>> = Arc::new(Store::new());
        for i in 0..8 {
            store.pending(id(&format!("item-{i}")));
        }

        let calls = Arc::new(AtomicUsize::new(0));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let (store, calls) = (store.clone(), calls.clone());
                scope.spawn(move || {
                    for i in 0..8 {
                        let value = store.require(&id(&format!("item-{i}")), None, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(2));
                            Ok(i)
                        });

                        assert_eq!(value.unwrap(), i);
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }
}
