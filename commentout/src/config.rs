use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use quire::error::{Chainable, Result};
use quire::value::{Format, Toml, Value};
use quire::{error, Config};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Link {
    pub name: String,
    pub url: String,
}

/// The contents of `commentout.toml`. Everything but `cache` and `engine` is
/// visible to the page layout as `site`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub author: String,
    pub name: String,
    pub url: String,
    pub links: Vec<Link>,
    pub social: Vec<Link>,
    /// Build cache file, relative to the input directory.
    #[serde(skip_serializing)]
    pub cache: PathBuf,
    #[serde(skip_serializing)]
    pub engine: Config,
}

impl Default for Settings {
    fn default() -> Self {
        let link = |name: &str, url: &str| Link { name: name.into(), url: url.into() };
        Settings {
            author: "Andy Gocke".into(),
            name: "comment out".into(),
            url: "http://commentout.com".into(),
            links: vec![
                link("Rust", "https://www.rust-lang.org/"),
                link("Jinja", "https://jinja.palletsprojects.com/"),
            ],
            social: vec![],
            cache: PathBuf::from(".commentout-cache.json"),
            engine: Config::default(),
        }
    }
}

impl Settings {
    /// Reads `path`, or the defaults if there's no such file.
    pub fn discover(path: &Path) -> Result<Settings> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }

        let string = std::fs::read_to_string(path).chain_with(|| error! {
            "failed to read settings",
            "path" => path.display(),
        })?;

        Settings::parse(&string).chain_with(|| error! {
            "invalid settings file",
            "path" => path.display(),
        })
    }

    pub fn parse(string: &str) -> Result<Settings> {
        Toml::read(string)
    }

    /// The settings templates see.
    pub fn to_value(&self) -> Result<Value> {
        toml::Value::try_from(self)
            .map(Value::from_toml)
            .map_err(|e| error!("settings can't be shown to templates", "cause" => e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commentout.toml");
        std::fs::write(&path, r#"
            author = "Someone Else"

            [[links]]
            name = "Home"
            url = "/"

            [engine]
            jobs = 2
        "#).unwrap();

        let settings = Settings::discover(&path).unwrap();
        assert_eq!(settings.author, "Someone Else");
        assert_eq!(settings.name, "comment out");
        assert_eq!(settings.links, [Link { name: "Home".into(), url: "/".into() }]);
        assert_eq!(settings.engine.jobs, 2);
        assert!(!settings.engine.force);

        let missing = Settings::discover(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(missing.url, "http://commentout.com");
    }

    #[test]
    fn templates_see_public_settings() {
        let value = Settings::parse("name = \"renamed blog\"\ncache = \"x.json\"").unwrap()
            .to_value()
            .unwrap();

        let site = value.as_dict().unwrap();
        assert_eq!(site["name"].as_str(), Some("renamed blog"));
        assert_eq!(site["author"].as_str(), Some("Andy Gocke"));
        assert_eq!(site["links"].as_slice().map(|links| links.len()), Some(2));
        assert!(!site.contains_key("cache"));
        assert!(!site.contains_key("engine"));
    }
}
