use std::path::PathBuf;
use std::process::ExitCode;

use quire::error::Result;
use quire::{build, BuildCache, DirSink, Report, Universe};

use crate::config::Settings;

mod config;
mod site;

pub const CONFIG_FILE: &str = "commentout.toml";

mod flags {
    use std::path::PathBuf;

    xflags::xflags! {
        /// Builds the comment out blog from <input> into <output>.
        cmd commentout {
            /// Directory holding the site sources.
            required input: PathBuf
            /// Directory the site is written to.
            required output: PathBuf
            /// Build cache file. Overrides the one in commentout.toml.
            optional --cache cache: PathBuf
            /// Ignore the build cache and recompile everything.
            optional --force
        }
    }
}

fn run(flags: flags::Commentout) -> Result<Report> {
    let settings = Settings::discover(&flags.input.join(CONFIG_FILE))?;
    let cache_path = flags.cache.unwrap_or_else(|| flags.input.join(&settings.cache));

    let mut config = settings.engine.clone();
    config.force |= flags.force;

    let rules = site::rules()?;
    let universe = Universe::scan(&flags.input)?;
    tracing::info!(input = %flags.input.display(), resources = universe.len(), "scanned sources");

    let mut cache = BuildCache::load(&cache_path)?;
    let report = build(&rules, &universe, &mut cache, &DirSink::new(&flags.output), &config)?;
    cache.save(&cache_path)?;
    Ok(report)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let flags = flags::Commentout::from_env_or_exit();
    let output: PathBuf = flags.output.clone();
    match run(flags) {
        Ok(report) if report.is_success() => {
            println!("{report}");
            println!("site written to {}", output.display());
            ExitCode::SUCCESS
        }
        Ok(report) => {
            eprintln!("{report}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
