use std::fmt::{self, Write};
use std::ops::Add;
use std::sync::Arc;

use crate::compiler::Compilation;
use crate::error::Result;
use crate::item::Item;
use crate::value::Value;

/// What a context field produces.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Value(Value),
    /// A list of items, each seen through the nested context.
    Items(Context, Vec<Arc<Item>>),
}

type Lookup = dyn Fn(&str, &Item, &Compilation) -> Result<Option<FieldValue>> + Send + Sync;

/// An ordered list of field layers consulted front to back while rendering a
/// template. The first layer that defines a key wins, so specific layers go
/// first and general ones last:
///
/// ```rust
/// use quire::Context;
///
/// let context = Context::constant("title", "Archive") + Context::default_fields();
/// ```
///
/// Fields are evaluated lazily, only when a template asks for them, and may
/// load other items through the [`Compilation`] they're given. Contexts are
/// immutable: [`Context::merge()`] builds a new one.
#[derive(Clone, Default)]
pub struct Context {
    layers: Vec<Arc<Lookup>>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    fn layer<F>(lookup: F) -> Context
        where F: Fn(&str, &Item, &Compilation) -> Result<Option<FieldValue>> + Send + Sync + 'static
    {
        Context { layers: vec![Arc::new(lookup)] }
    }

    fn named<F>(name: &str, f: F) -> Context
        where F: Fn(&Item, &Compilation) -> Result<Option<FieldValue>> + Send + Sync + 'static
    {
        let name: Arc<str> = name.into();
        Context::layer(move |key, item, cx| match key == &*name {
            true => f(item, cx),
            false => Ok(None),
        })
    }

    /// A field computed from the item by `f`.
    pub fn field<F, V>(name: &str, f: F) -> Context
        where F: Fn(&Item, &Compilation) -> Result<V> + Send + Sync + 'static,
              V: Into<Value>
    {
        Context::named(name, move |item, cx| f(item, cx).map(|v| Some(FieldValue::Value(v.into()))))
    }

    pub fn constant<V: Into<Value>>(name: &str, value: V) -> Context {
        let value = value.into();
        Context::named(name, move |_, _| Ok(Some(FieldValue::Value(value.clone()))))
    }

    /// `body`: the item's current body as text.
    pub fn body() -> Context {
        Context::named("body", |item, _| {
            let text = item.body.as_text()?;
            Ok(Some(FieldValue::Value(text.into())))
        })
    }

    /// Every metadata key of the item.
    pub fn metadata() -> Context {
        Context::layer(|key, item, _| Ok(item.metadata.get_raw(key).cloned().map(FieldValue::Value)))
    }

    /// `url`: the `/`-rooted output path of the item. Undefined for items
    /// that aren't written.
    pub fn url() -> Context {
        Context::named("url", |item, cx| {
            let url = cx.route_of(&item.id).map(|path| {
                let path = path.to_string_lossy().replace('\\', "/");
                Value::from(format!("/{path}"))
            });

            Ok(url.map(FieldValue::Value))
        })
    }

    /// `path`: the item's resource id.
    pub fn path() -> Context {
        Context::named("path", |item, _| Ok(Some(FieldValue::Value(item.id.as_str().into()))))
    }

    /// `title`: the file stem of the item with `-` replaced by spaces.
    pub fn title() -> Context {
        Context::named("title", |item, _| {
            Ok(Some(FieldValue::Value(item.id.file_stem().replace('-', " ").into())))
        })
    }

    /// A field rendering [`Item::date()`] with the `chrono` format string
    /// `format`, e.g. `"%B %e, %Y"`.
    pub fn date(name: &str, format: &str) -> Context {
        let format: Arc<str> = format.into();
        Context::named(name, move |item, _| {
            let date = item.date()?;
            let mut string = String::new();
            write!(string, "{}", date.format(&format)).map_err(|_| error! {
                "invalid date format string",
                "format" => &*format,
            })?;

            Ok(Some(FieldValue::Value(string.into())))
        })
    }

    /// A list field: the items produced by `items`, each rendered with
    /// `context`.
    pub fn list<F>(name: &str, context: Context, items: F) -> Context
        where F: Fn(&Item, &Compilation) -> Result<Vec<Arc<Item>>> + Send + Sync + 'static
    {
        Context::named(name, move |item, cx| {
            Ok(Some(FieldValue::Items(context.clone(), items(item, cx)?)))
        })
    }

    /// Defines every key as `value`. Keys no earlier layer defines render as
    /// `value` instead of failing.
    pub fn or_default<V: Into<Value>>(value: V) -> Context {
        let value = value.into();
        Context::layer(move |_, _, _| Ok(Some(FieldValue::Value(value.clone()))))
    }

    /// [`body`](Self::body), [`metadata`](Self::metadata),
    /// [`url`](Self::url), [`path`](Self::path) and [`title`](Self::title),
    /// in that order.
    pub fn default_fields() -> Context {
        Context::body() + Context::metadata() + Context::url() + Context::path() + Context::title()
    }

    /// A new context consulting `self` first and then `other`.
    pub fn merge(&self, other: &Context) -> Context {
        let mut layers = self.layers.clone();
        layers.extend(other.layers.iter().cloned());
        Context { layers }
    }

    /// The value of `key` for `item`, or `None` if no layer defines it.
    pub fn lookup(&self, key: &str, item: &Item, cx: &Compilation) -> Result<Option<FieldValue>> {
        for layer in &self.layers {
            if let Some(value) = layer(key, item, cx)? {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Add for Context {
    type Output = Context;

    fn add(self, rhs: Context) -> Context {
        self.merge(&rhs)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ResourceId;

    fn value(context: &Context, key: &str, item: &Item, cx: &Compilation) -> Option<Value> {
        match context.lookup(key, item, cx).unwrap()? {
            FieldValue::Value(value) => Some(value),
            FieldValue::Items(..) => panic!("unexpected list for {key}"),
        }
    }

    #[test]
    fn first_layer_wins() {
        let cx = Compilation::detached("posts/2024-01-05-my-post.md", Some("posts/my-post.html"));
        let mut item = Item::new(ResourceId::new("posts/2024-01-05-my-post.md"), "<p>hi</p>");
        item.metadata.insert_raw("title", "From Metadata");

        let context = Context::constant("title", "Constant") + Context::default_fields();
        assert_eq!(value(&context, "title", &item, &cx), Some("Constant".into()));

        let defaults = Context::default_fields();
        assert_eq!(value(&defaults, "title", &item, &cx), Some("From Metadata".into()));
        assert_eq!(value(&defaults, "body", &item, &cx), Some("<p>hi</p>".into()));
        assert_eq!(value(&defaults, "url", &item, &cx), Some("/posts/my-post.html".into()));
        assert_eq!(value(&defaults, "path", &item, &cx), Some("posts/2024-01-05-my-post.md".into()));
        assert_eq!(value(&defaults, "nope", &item, &cx), None);

        item.metadata.remove_raw("title");
        assert_eq!(value(&defaults, "title", &item, &cx), Some("2024 01 05 my post".into()));
    }

    #[test]
    fn merging_leaves_operands_alone() {
        let a = Context::constant("x", 1u64);
        let b = Context::constant("x", 2u64) + Context::constant("y", 3u64);
        let merged = a.merge(&b);

        let cx = Compilation::detached("a", None);
        let item = Item::new(ResourceId::new("a"), "");
        assert_eq!(value(&merged, "x", &item, &cx), Some(1u64.into()));
        assert_eq!(value(&merged, "y", &item, &cx), Some(3u64.into()));
        assert_eq!(value(&a, "y", &item, &cx), None);
        assert_eq!(value(&b, "x", &item, &cx), Some(2u64.into()));
    }

    #[test]
    fn dates_defaults_and_lists() {
        let cx = Compilation::detached("posts/2024-01-05-hello.md", None);
        let item = Item::new(ResourceId::new("posts/2024-01-05-hello.md"), "");

        let context = Context::date("date", "%B %e, %Y")
            + Context::url()
            + Context::list("posts", Context::path(), |item, _| Ok(vec![Arc::new(item.clone())]))
            + Context::or_default("");

        assert_eq!(value(&context, "date", &item, &cx), Some("January  5, 2024".into()));
        assert_eq!(value(&context, "url", &item, &cx), Some("".into()));
        assert_eq!(value(&context, "anything", &item, &cx), Some("".into()));

        match context.lookup("posts", &item, &cx).unwrap() {
            Some(FieldValue::Items(nested, items)) => {
                assert_eq!(items.len(), 1);
                assert_eq!(value(&nested, "path", &items[0], &cx), Some(item.id.as_str().into()));
            }
            other => panic!("expected a list, found {other:?}"),
        }
    }
}
