#![doc = svgbobdoc::transform!(
//! A declarative, incremental static content compiler.
//!
//! # Overview
//!
//! A site is described by an ordered list of [`Rules`]. Each rule binds a
//! [`Pattern`] over resource ids to a [`Route`] and a compiler [`Pipeline`].
//! A build matches every resource in the [`Universe`] against the rules,
//! runs each bound resource through its pipeline, and writes the results
//! wherever their routes point:
//!
//! ```svgbob
//!  +----------+   ids    +---------+  bound ids  +-----------+
//!  | Universe |--------->|  Rules  |------------>| Scheduler |
//!  +----------+          +---------+             +-----+-----+
//!                                                      |
//!          +-------------------------------------------+
//!          |                                           |
//!          v                                           v
//!  +---------------+  load / load_all   +--------------------+
//!  |   Pipeline    |------------------->| Dependency Tracker |
//!  | stage, stage..|                    +--------------------+
//!  +-------+-------+
//!          |  compiled item
//!          v
//!  +---------------+   path   +--------+
//!  |     Route     |--------->|  Sink  |
//!  +---------------+          +--------+
//! ```
//!
//! Stages may read other compiled items through their [`Compilation`]
//! handle. Every read is recorded, and the resulting dependency graph is kept
//! in the [`BuildCache`] together with each resource's fingerprint and
//! compiled output. The next build recompiles only what changed and what
//! (transitively) read something that changed.
//!
//! ```rust
//! use quire::*;
//!
//! let universe = Universe::new()
//!     .with("templates/post.html", "<article>{{ body }}</article>")
//!     .with("posts/hello.md", "+++\ntitle = \"Hello\"\n+++\n*hi*");
//!
//! let rules = Rules::new()
//!     .matching("templates/*", Route::none(), Pipeline::new())
//!     .matching("posts/*", Route::set_extension("html"), Pipeline::new()
//!         .then(read_front_matter(value::Toml))
//!         .then(transform("markdown", Markdown::default()))
//!         .then(apply_template("templates/post.html", Context::default_fields())));
//!
//! let sink = MemorySink::new();
//! let mut cache = BuildCache::new();
//! let report = build(&rules, &universe, &mut cache, &sink, &Config::default()).unwrap();
//!
//! assert!(report.is_success());
//! assert_eq!(
//!     sink.get_str("posts/hello.html").unwrap(),
//!     "<article><p><em>hi</em></p>\n</article>"
//! );
//! ```
//!
//! # Failures
//!
//! Structural errors abort a build before anything is written: malformed
//! patterns ([`Kind::Pattern`]), two resources routed to the same path
//! ([`Kind::RouteCollision`]), and resources that depend on themselves
//! ([`Kind::DependencyCycle`]). Failures local to one resource, like a
//! missing template or a template field without a value, are collected in
//! the [`Report`] while everything else still compiles.
)]

#[macro_use]
pub mod error;
pub mod util;
pub mod value;
pub mod id;
pub mod metadata;
pub mod item;
pub mod universe;
pub mod pattern;
pub mod route;
pub mod context;
pub mod compiler;
pub mod templating;
pub mod deps;
pub mod store;
pub mod rules;
pub mod cache;
pub mod sink;
pub mod config;
pub mod build;

mod session;

pub use error::{Error, Kind, Result};
pub use id::ResourceId;
pub use metadata::{Metadata, MetaKey};
pub use item::{Body, Item, recent_first, chronological};
pub use universe::{Fingerprint, Resource, Universe};
pub use pattern::{IntoPattern, Pattern};
pub use route::Route;
pub use context::{Context, FieldValue};
pub use compiler::*;
pub use templating::{Engine, MiniJinja};
pub use deps::{Dependency, Snapshot, Tracker};
pub use rules::{Rule, Rules};
pub use cache::{BuildCache, CacheEntry};
pub use sink::{DirSink, MemorySink, Sink};
pub use config::Config;
pub use build::{build, Failure, Report};

pub use rayon;
