use std::sync::Arc;

use crate::error::{ErrorDetail, Result};
use crate::value::{Dict, Value};

/// A textual data format metadata can be written in.
pub trait Format: Send + Sync + 'static {
    /// The data format's error type.
    type Error: ErrorDetail + 'static;

    /// Human-readable name of the format, used in error messages.
    const NAME: &'static str;

    /// Parses `string` into a [`Value`].
    fn parse(string: &str) -> Result<Value, Self::Error>;

    /// Parses `string`, which must hold a table/object at the top level.
    fn parse_dict(string: &str) -> Result<Arc<Dict>> {
        let value = Self::parse(string)?;
        value.into_dict().map_err(|v| error! {
            format!("{} document must be a table", Self::NAME),
            "found" => v.kind(),
        })
    }

    /// Deserializes `string` into any `T`.
    fn read<T: serde::de::DeserializeOwned>(string: &str) -> Result<T>;
}

macro_rules! impl_format {
    ($name:ident ($display:literal) : $parse:path, $read:path, $E:ty) => (
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl Format for $name {
            type Error = $E;

            const NAME: &'static str = $display;

            fn parse(s: &str) -> Result<Value, $E> {
                $parse(s)
            }

            fn read<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
                Ok($read(s)?)
            }
        }
    );
}

fn parse_toml(string: &str) -> Result<Value, toml::de::Error> {
    toml::from_str::<toml::Value>(string).map(Value::from_toml)
}

impl_format!(Toml("TOML"): parse_toml, toml::from_str, toml::de::Error);
impl_format!(Json("JSON"): serde_json::from_str, serde_json::from_str, serde_json::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tables() {
        let dict = Toml::parse_dict("title = \"Hello\"\ntags = [\"a\", \"b\"]").unwrap();
        assert_eq!(dict["title"].as_str(), Some("Hello"));
        assert_eq!(dict["tags"].as_slice().map(|s| s.len()), Some(2));

        let dict = Json::parse_dict(r#"{"draft": true}"#).unwrap();
        assert_eq!(dict["draft"].to_bool(), Some(true));

        assert!(Json::parse_dict("[1, 2]").is_err());
    }
}
