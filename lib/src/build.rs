use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use crate::cache::{BuildCache, CacheEntry};
use crate::config::Config;
use crate::error::{Error, Kind, Result};
use crate::id::ResourceId;
use crate::rules::Rules;
use crate::session::{Binding, Session};
use crate::sink::Sink;
use crate::universe::{Fingerprint, Universe};

/// A resource that failed to compile.
#[derive(Debug, Clone)]
pub struct Failure {
    pub id: ResourceId,
    /// The stage that failed: a pipeline stage name, `read`, or `write`.
    pub stage: String,
    pub error: Error,
}

impl Failure {
    fn new(id: ResourceId, error: Error) -> Self {
        let stage = error.param("stage").unwrap_or_else(|| "compile".into());
        Failure { id, stage, error }
    }
}

/// The outcome of a build that ran to completion.
#[derive(Debug, Default)]
pub struct Report {
    /// Resources successfully compiled in this build, in id order.
    pub compiled: Vec<ResourceId>,
    /// Resources whose cached output was reused.
    pub reused: Vec<ResourceId>,
    /// Output paths written.
    pub written: Vec<PathBuf>,
    pub failures: Vec<Failure>,
    pub elapsed: Duration,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn was_compiled(&self, id: &str) -> bool {
        self.compiled.binary_search_by(|c| c.as_str().cmp(id)).is_ok()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "compiled {}, reused {}, wrote {} in {}ms",
            self.compiled.len(), self.reused.len(), self.written.len(),
            self.elapsed.as_millis())?;

        for failure in &self.failures {
            writeln!(f, "{} failed in `{}`:", failure.id, failure.stage)?;
            for line in failure.error.to_string().lines() {
                writeln!(f, "    {line}")?;
            }
        }

        Ok(())
    }
}

/// Binds each id of `universe`, and each created id, to the first rule that
/// claims it, then resolves routes. Fails if two ids share an output path.
fn bind(rules: &Rules, universe: &Universe) -> Result<BTreeMap<ResourceId, Binding>> {
    let candidates: BTreeSet<&ResourceId> = universe.ids().chain(rules.created_ids()).collect();

    let mut bindings = BTreeMap::new();
    let mut outputs: BTreeMap<PathBuf, &ResourceId> = BTreeMap::new();
    for id in candidates {
        let Some(rule) = rules.find(id, universe.contains(id.as_str())) else {
            continue;
        };

        let route = rule.route().resolve(id);
        if let Some(path) = &route {
            if let Some(other) = outputs.insert(path.clone(), id) {
                return Err(error! {
                    "two resources are routed to the same output path",
                    "path" => path.display(),
                    "first" => other,
                    "second" => id,
                }.with_kind(Kind::RouteCollision));
            }
        }

        bindings.insert(id.clone(), Binding { rule: rule.clone(), route });
    }

    Ok(bindings)
}

/// Runs one build of `rules` over `universe`, writing through `sink`.
///
/// Only resources whose input, rule or route changed since the build
/// recorded in `cache`, and the transitive dependents of those, are
/// compiled; everything else reuses its cached output. Recompiled resources
/// that have a route are written.
///
/// Structural errors (a malformed pattern, a route collision, a dependency
/// cycle) fail the whole build before anything is written and leave `cache`
/// untouched. Failures of individual resources are collected in the
/// returned [`Report`]; their outputs aren't written and they are dropped
/// from the cache so the next build retries them.
pub fn build(
    rules: &Rules,
    universe: &Universe,
    cache: &mut BuildCache,
    sink: &dyn Sink,
    config: &Config,
) -> Result<Report> {
    let start = Instant::now();
    rules.validate()?;
    let bindings = bind(rules, universe)?;

    // Decide what changed since the last build.
    let mut fingerprints: BTreeMap<ResourceId, Fingerprint> = BTreeMap::new();
    let mut changed: BTreeSet<ResourceId> = BTreeSet::new();
    for (id, binding) in &bindings {
        let fingerprint = match universe.get(id.as_str()) {
            Some(resource) => match resource.fingerprint() {
                Ok(fingerprint) => Some(fingerprint),
                Err(e) => {
                    tracing::debug!(resource = %id, error = %e, "failed to fingerprint");
                    None
                }
            },
            None => Some(Fingerprint::of_parts(["created", id.as_str()])),
        };

        let fresh = !config.force && cache.entries.get(id).map_or(false, |entry| {
            Some(&entry.fingerprint) == fingerprint.as_ref()
                && entry.rule == *binding.rule.name()
                && entry.output.as_ref().map_or(false, |o| o.route == binding.route)
        });

        if !fresh {
            changed.insert(id.clone());
        }

        if let Some(fingerprint) = fingerprint {
            fingerprints.insert(id.clone(), fingerprint);
        }
    }

    let removed: Vec<ResourceId> = cache.entries.keys()
        .filter(|id| !bindings.contains_key(*id))
        .cloned()
        .collect();

    changed.extend(removed.iter().cloned());

    // Everything that read something that changed is recompiled too.
    let mut pending: BTreeSet<ResourceId> = match config.force {
        true => bindings.keys().cloned().collect(),
        false => {
            cache.graph.check_acyclic()?;
            let affected = cache.graph.affected_by(&changed, bindings.keys());
            changed.union(&affected)
                .filter(|id| bindings.contains_key(*id))
                .cloned()
                .collect()
        }
    };

    let session = Arc::new(Session::new(universe.clone(), bindings));
    for id in session.bindings().keys() {
        let cached = match pending.contains(id) {
            true => None,
            false => cache.entries.get(id).and_then(|entry| entry.output.clone()),
        };

        match cached {
            Some(output) => session.store.done(id.clone(), output),
            None => {
                session.store.pending(id.clone());
                pending.insert(id.clone());
            }
        }
    }

    tracing::debug!(
        bound = session.bindings().len(),
        changed = changed.len(),
        pending = pending.len(),
        "planned build",
    );

    // Compile, dependencies first where the last build knows them. Loads of
    // resources not yet compiled compile them on the spot.
    let levels = match config.force {
        true => vec![pending.iter().cloned().collect()],
        false => cache.graph.levels(&pending),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .thread_name(|i| format!("quire-worker-{i}"))
        .build()
        .map_err(|e| error!("failed to start worker pool", "cause" => e))?;

    pool.install(|| {
        for level in &levels {
            level.par_iter().for_each(|id| {
                let _ = session.require(id, None);
            });
        }
    });

    let mut compiled = vec![];
    let mut failures = vec![];
    let mut fatal = vec![];
    for id in &pending {
        match session.store.result(id) {
            Some(Ok(output)) => compiled.push((id.clone(), output)),
            Some(Err(error)) if error.is_fatal() => fatal.push((id.clone(), error)),
            Some(Err(error)) => failures.push(Failure::new(id.clone(), error)),
            None => failures.push(Failure::new(id.clone(), error! {
                "resource was never compiled",
                "resource" => id,
            }.with_kind(Kind::Stage))),
        }
    }

    // Structural errors abort the build. Every one of them is reported, each
    // behind the summary, along with the resources that failed locally.
    if let Some(kind) = fatal.first().map(|(_, error)| error.kind()) {
        let also_failed = failures.iter()
            .map(|failure| format!("{} ({})", failure.id, failure.stage))
            .collect::<Vec<_>>();

        let mut summary = error! {
            format!("build aborted: {} resource(s) hit structural errors", fatal.len()),
            if !also_failed.is_empty() => "also failed" => also_failed.join(", "),
        }.with_kind(kind);

        for (id, error) in fatal {
            tracing::debug!(resource = %id, kind = %error.kind(), "build aborted before writing");
            summary = error.chain(error! { "structural error", "resource" => id }).chain(summary);
        }

        return Err(summary);
    }

    // Write, then record what this build learned.
    let mut written = vec![];
    let mut unwritten = BTreeSet::new();
    for (id, output) in &compiled {
        let Some(path) = &output.route else { continue };
        match sink.write(path, output.item.body.as_bytes()) {
            Ok(()) => written.push(path.clone()),
            Err(error) => {
                let error = error.chain(error! {
                    "failed to write output",
                    "resource" => id,
                    "stage" => "write",
                }.with_kind(Kind::Stage));

                failures.push(Failure::new(id.clone(), error));
                unwritten.insert(id.clone());
            }
        }
    }

    let mut edges = std::mem::take(&mut *session.edges.lock());
    for id in pending.iter().chain(&removed) {
        cache.entries.remove(id);
        cache.graph.remove(id);
    }

    for (id, output) in &compiled {
        let Some(fingerprint) = fingerprints.remove(id) else { continue };
        if unwritten.contains(id) {
            continue;
        }

        let Some(binding) = session.bindings().get(id) else { continue };
        cache.entries.insert(id.clone(), CacheEntry {
            fingerprint,
            rule: binding.rule.name().clone(),
            output: Some(output.clone()),
        });

        cache.graph.replace(id.clone(), edges.remove(id).unwrap_or_default());
    }

    let report = Report {
        compiled: compiled.into_iter().map(|(id, _)| id).collect(),
        reused: session.bindings().keys().filter(|id| !pending.contains(*id)).cloned().collect(),
        written,
        failures,
        elapsed: start.elapsed(),
    };

    tracing::info!(
        compiled = report.compiled.len(),
        reused = report.reused.len(),
        written = report.written.len(),
        failed = report.failures.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "build finished",
    );

    Ok(report)
}
