use std::fmt;
use std::borrow::Borrow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::{Dict, Value};

/// A typed metadata key. Declare keys with [`define_meta_key!`].
pub trait MetaKey: 'static {
    const KEY: &'static str;

    type Value: TryFrom<Value> + Into<Value> + fmt::Debug;
}

/// Declares [`MetaKey`]s:
///
/// ```rust
/// quire::define_meta_key! {
///     pub Title : "title" => std::sync::Arc<str>,
///     pub Draft : "draft" => bool,
/// }
///
/// let mut meta = quire::Metadata::new();
/// meta.insert(Draft, true);
/// assert_eq!(meta.get(Draft), Some(Ok(true)));
/// ```
#[macro_export]
macro_rules! define_meta_key {
    ($($v:vis $T:ident : $key:literal => $V:ty),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy)]
            $v struct $T;

            impl $crate::MetaKey for $T {
                const KEY: &'static str = $key;
                type Value = $V;
            }
        )+
    }
}

/// The metadata mapping of one item. Keys are sorted, so iteration and
/// serialization are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    map: Dict,
}

impl Metadata {
    #[inline(always)]
    pub fn new() -> Self {
        Metadata::default()
    }

    #[inline(always)]
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    #[inline(always)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline(always)]
    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> + '_ {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> + '_ {
        self.map.iter()
    }

    pub fn insert_raw<K, V>(&mut self, key: K, value: V) -> Option<Value>
        where K: Into<Arc<str>>, V: Into<Value>
    {
        self.map.insert(key.into(), value.into())
    }

    pub fn remove_raw<K: Borrow<str>>(&mut self, key: K) -> Option<Value> {
        self.map.remove(key.borrow())
    }

    /// Inserts every entry of `dict`, replacing existing keys.
    pub fn append_all(&mut self, dict: &Dict) {
        for (k, v) in dict {
            self.map.insert(k.clone(), v.clone());
        }
    }

    /// Inserts entries of `dict` whose keys are not yet present.
    pub fn fill_from(&mut self, dict: &Dict) {
        for (k, v) in dict {
            self.map.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    #[inline]
    pub fn get<K: MetaKey>(&self, _: K) -> Option<Result<K::Value, Value>> {
        let value = self.get_raw(K::KEY)?.clone();
        Some(value.clone().try_into().map_err(|_| value))
    }

    /// Like [`Metadata::get()`] but with an error naming the key when the
    /// value is absent or of the wrong type.
    pub fn read<K: MetaKey>(&self, key: K) -> Result<K::Value> {
        match self.get(key) {
            Some(Ok(value)) => Ok(value),
            Some(Err(value)) => err! {
                "unexpected metadata value type",
                "key" => K::KEY,
                "expected" => std::any::type_name::<K::Value>(),
                "actual type" => value.kind(),
            },
            None => err! {
                "attempted to read nonexistent metadata key",
                "key" => K::KEY,
            },
        }
    }

    #[inline(always)]
    pub fn contains<K: MetaKey>(&self, _: K) -> bool {
        self.contains_key(K::KEY)
    }

    pub fn insert<K, V>(&mut self, _: K, value: V) -> Option<Value>
        where K: MetaKey, V: Into<K::Value>
    {
        self.insert_raw(K::KEY, value.into().into())
    }

    /// Insert if no value for key exists.
    pub fn get_or_insert_with<K, V, F>(&mut self, _: K, f: F) -> Result<K::Value, Value>
        where K: MetaKey, V: Into<K::Value>, F: FnOnce() -> V
    {
        let value = self.map.entry(K::KEY.into())
            .or_insert_with(|| f().into().into())
            .clone();

        value.clone().try_into().map_err(|_| value)
    }

    pub fn remove<K: MetaKey>(&mut self, _: K) -> Option<Value> {
        self.map.remove(K::KEY)
    }

    pub fn as_dict(&self) -> &Dict {
        &self.map
    }
}

impl From<Dict> for Metadata {
    fn from(map: Dict) -> Self {
        Metadata { map }
    }
}

impl fmt::Display for Metadata {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#?}", self.map)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Metadata;
    use crate::value::Value;

    crate::define_meta_key! {
        Title : "title" => Arc<str>,
        Position : "position" => usize,
    }

    #[test]
    fn typed_access() {
        let mut meta = Metadata::new();
        meta.insert(Title, "Hello");
        meta.insert_raw("position", "first");

        assert_eq!(meta.get(Title), Some(Ok("Hello".into())));
        assert_eq!(meta.get(Position), Some(Err(Value::from("first"))));
        assert!(meta.read(Position).is_err());
        assert_eq!(meta.get_or_insert_with(Title, || "Other"), Ok("Hello".into()));
    }

    #[test]
    fn fill_keeps_existing() {
        let mut meta = Metadata::new();
        meta.insert(Title, "Mine");
        meta.fill_from(&crate::dict!["title" => "Theirs", "author" => "Andy"]);
        assert_eq!(meta.get_raw("title"), Some(&Value::from("Mine")));
        assert_eq!(meta.get_raw("author"), Some(&Value::from("Andy")));
    }
}
