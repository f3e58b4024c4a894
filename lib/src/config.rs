use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Chainable, Result};
use crate::value::{Format, Toml};

/// Engine settings for a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker threads. `0` lets the pool pick one per CPU.
    pub jobs: usize,
    /// Ignore the build cache and recompile everything.
    pub force: bool,
}

impl Config {
    pub fn from_toml(string: &str) -> Result<Config> {
        Toml::read(string)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let string = std::fs::read_to_string(path).chain_with(|| error! {
            "failed to read configuration file",
            "path" => path.display(),
        })?;

        Config::from_toml(&string).chain_with(|| error! {
            "invalid configuration",
            "path" => path.display(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());

        let config = Config::from_toml("jobs = 4").unwrap();
        assert_eq!(config, Config { jobs: 4, force: false });

        assert!(Config::from_toml("jobs = \"many\"").is_err());
    }
}
