use std::sync::Arc;
use std::collections::{BTreeMap, BTreeSet};

use derive_more::Debug;
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use minijinja::value::{Object, Value};
use parking_lot::Mutex;
use serde::Serialize;

use crate::compiler::Compilation;
use crate::context::{Context, FieldValue};
use crate::error::{Error, Kind, Result};
use crate::item::Item;
use crate::templating::Engine;

/// The [`Engine`] backed by `minijinja`.
///
/// Undefined variables are errors, so `{% if x %}` on a field the context may
/// not define must be written `{% if x is defined %}`. Output is never
/// auto-escaped: bodies are already HTML.
#[derive(Debug)]
pub struct MiniJinja {
    env: Environment<'static>,
    globals: Arc<BTreeSet<String>>,
}

impl Default for MiniJinja {
    fn default() -> Self {
        MiniJinja::new()
    }
}

impl MiniJinja {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("date", ext::date);
        env.add_filter("deslug", ext::deslug);
        env.add_filter("split", ext::split);
        MiniJinja { env, globals: Arc::default() }
    }

    /// Makes `value` available to every template as `name`.
    pub fn with_global<T: Serialize>(mut self, name: &'static str, value: T) -> Self {
        self.env.add_global(name, Value::from_serialize(&value));
        Arc::make_mut(&mut self.globals).insert(name.into());
        self
    }

    pub fn environment_mut(&mut self) -> &mut Environment<'static> {
        &mut self.env
    }
}

/// What went wrong during field lookups. minijinja only sees "undefined", so
/// the cause is recorded here.
#[derive(Debug, Default)]
struct Trace {
    /// The key of the latest lookup, if it found nothing. Rendering stops at
    /// the first failure, so only the latest lookup can be the one to blame.
    missing: Option<String>,
    errors: Vec<Error>,
    /// Names minijinja resolves when the context doesn't.
    globals: Arc<BTreeSet<String>>,
}

/// An item seen through a context. Fields are computed on first access.
#[derive(Debug)]
struct ContextObject {
    context: Context,
    item: Arc<Item>,
    #[debug(ignore)]
    cx: Compilation,
    #[debug(ignore)]
    trace: Arc<Mutex<Trace>>,
    #[debug(ignore)]
    memo: Mutex<BTreeMap<String, Option<Value>>>,
}

impl ContextObject {
    fn new(context: Context, item: Arc<Item>, cx: Compilation, trace: Arc<Mutex<Trace>>) -> Self {
        ContextObject { context, item, cx, trace, memo: Mutex::default() }
    }

    fn compute(&self, key: &str) -> Option<Value> {
        match self.context.lookup(key, &self.item, &self.cx) {
            Ok(Some(FieldValue::Value(value))) => Some(Value::from_serialize(&value)),
            Ok(Some(FieldValue::Items(context, items))) => Some(items.into_iter()
                .map(|item| {
                    let trace = self.trace.clone();
                    let object = ContextObject::new(context.clone(), item, self.cx.clone(), trace);
                    Value::from_object(object)
                })
                .collect()),
            Ok(None) => None,
            Err(e) => {
                self.trace.lock().errors.push(e);
                None
            }
        }
    }
}

impl Object for ContextObject {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        let memoized = self.memo.lock().get(key).cloned();
        let value = match memoized {
            Some(value) => value,
            None => {
                let value = self.compute(key);
                self.memo.lock().insert(key.to_string(), value.clone());
                value
            }
        };

        let mut trace = self.trace.lock();
        trace.missing = match value.is_none() && !trace.globals.contains(key) {
            true => Some(key.to_string()),
            false => None,
        };

        value
    }
}

impl Engine for MiniJinja {
    fn render(
        &self,
        name: &str,
        source: &str,
        context: &Context,
        item: &Item,
        cx: &Compilation,
    ) -> Result<String> {
        let trace = Arc::new(Mutex::new(Trace { globals: self.globals.clone(), ..Trace::default() }));
        let root = ContextObject::new(context.clone(), Arc::new(item.clone()), cx.clone(), trace.clone());
        let result = self.env.render_named_str(name, source, Value::from_object(root));

        let error = match result {
            Ok(string) => return Ok(string),
            Err(error) => error,
        };

        let mut trace = trace.lock();
        if !trace.errors.is_empty() {
            let cause = trace.errors.remove(0);
            return Err(cause.chain(error! {
                "template field could not be computed",
                "template" => name,
                "resource" => &item.id,
            }));
        }

        if error.kind() == ErrorKind::UndefinedError {
            if let Some(field) = trace.missing.take() {
                return Err(Error::from(error).chain(error! {
                    "template field has no value in the context",
                    "field" => field,
                    "template" => name,
                    "resource" => &item.id,
                }.with_kind(Kind::TemplateFieldMissing)));
            }
        }

        Err(Error::from(error).chain(error! {
            "failed to render template",
            "template" => name,
            "resource" => &item.id,
        }.with_kind(Kind::Stage)))
    }
}

mod ext {
    use std::fmt::Write;

    use minijinja::{value::Value, Error, ErrorKind};

    fn invalid(message: String) -> Error {
        Error::new(ErrorKind::InvalidOperation, message)
    }

    pub fn deslug(value: &str) -> String {
        value.replace('-', " ")
    }

    /// `value | date(fmt)`: formats a UNIX timestamp or a date string.
    pub fn date(value: Value, fmt: &str) -> Result<String, Error> {
        let datetime = match i64::try_from(value.clone()) {
            Ok(ts) => chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| invalid(format!("invalid timestamp {ts} provided to `date`")))?,
            Err(_) => {
                let string = value.as_str().ok_or_else(|| invalid(format!(
                    "`date` must be applied to a string or integer, found {}", value.kind()
                )))?;

                crate::item::parse_date(string)
                    .ok_or_else(|| invalid(format!("failed to parse {string:?} as a date")))?
            }
        };

        let mut output = String::new();
        write!(output, "{}", datetime.format(fmt))
            .map_err(|_| invalid(format!("invalid date format string {fmt:?}")))?;

        Ok(output)
    }

    pub fn split(value: &str, pat: &str, n: Option<usize>) -> Value {
        match n {
            Some(n) => value.split(pat).nth(n).map(Value::from).unwrap_or(Value::UNDEFINED),
            None => value.split(pat).map(Value::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ResourceId;

    fn render(source: &str, context: &Context, item: &Item) -> Result<String> {
        let cx = Compilation::detached(item.id.as_str(), Some("posts/hello.html"));
        MiniJinja::new().render("t.html", source, context, item, &cx)
    }

    #[test]
    fn renders_lazy_fields() {
        let mut item = Item::new(ResourceId::new("posts/hello.md"), "<p>Hi</p>");
        item.metadata.insert_raw("author", "Andy");

        let context = Context::constant("site", "comment out") + Context::default_fields();
        let out = render("{{ site }}|{{ author }}|{{ url }}|{{ body }}", &context, &item).unwrap();
        assert_eq!(out, "comment out|Andy|/posts/hello.html|<p>Hi</p>");

        let out = render("{% if tags is defined %}t{% else %}none{% endif %}", &context, &item).unwrap();
        assert_eq!(out, "none");
    }

    #[test]
    fn nested_lists() {
        let item = Item::new(ResourceId::new("archive.html"), "");
        let posts = vec![
            Arc::new(Item::new(ResourceId::new("posts/a-post.md"), "")),
            Arc::new(Item::new(ResourceId::new("posts/b-post.md"), "")),
        ];

        let context = Context::list("posts", Context::title(), move |_, _| Ok(posts.clone()));
        let out = render("{% for p in posts %}[{{ p.title }}]{% endfor %}", &context, &item).unwrap();
        assert_eq!(out, "[a post][b post]");
    }

    #[test]
    fn missing_fields_are_classified() {
        let item = Item::new(ResourceId::new("posts/hello.md"), "");
        let error = render("{{ nope }}", &Context::default_fields(), &item).unwrap_err();
        assert_eq!(error.kind(), Kind::TemplateFieldMissing);
        assert_eq!(error.param("field").as_deref(), Some("nope"));

        let context = Context::default_fields() + Context::or_default("?");
        assert_eq!(render("{{ nope }}", &context, &item).unwrap(), "?");

        let failing = Context::field("boom", |_, _| -> Result<String> { err!("kaboom") });
        let error = render("{{ boom }}", &failing, &item).unwrap_err();
        assert!(error.to_string().contains("kaboom"));
        assert_ne!(error.kind(), Kind::TemplateFieldMissing);
    }

    #[test]
    fn only_the_failing_lookup_is_blamed() {
        let item = Item::new(ResourceId::new("posts/hello.md"), "<p>Hi</p>");
        let context = Context::default_fields();

        let source = "{% if tags is defined %}t{% endif %}{{ body.nope }}";
        let error = render(source, &context, &item).unwrap_err();
        assert_eq!(error.kind(), Kind::Stage);
        assert_eq!(error.param("field"), None);

        let source = "{% if tags is defined %}t{% endif %}{{ title }}{{ nope }}";
        let error = render(source, &context, &item).unwrap_err();
        assert_eq!(error.kind(), Kind::TemplateFieldMissing);
        assert_eq!(error.param("field").as_deref(), Some("nope"));

        let cx = Compilation::detached(item.id.as_str(), None);
        let engine = MiniJinja::new().with_global("site", BTreeMap::from([("name", "comment out")]));
        let out = engine.render("t.html", "{{ site.name }}", &context, &item, &cx).unwrap();
        assert_eq!(out, "comment out");

        let source = "{% if tags is defined %}t{% endif %}{{ site.nope }}";
        let error = engine.render("t.html", source, &context, &item, &cx).unwrap_err();
        assert_eq!(error.kind(), Kind::Stage);
        assert_eq!(error.param("field"), None);
    }

    #[test]
    fn filters() {
        let item = Item::new(ResourceId::new("a.md"), "");
        let context = Context::constant("when", "2024-01-05") + Context::constant("slug", "a-b-c");
        let out = render("{{ when | date('%Y/%m') }} {{ slug | deslug }}", &context, &item).unwrap();
        assert_eq!(out, "2024/01 a b c");
    }
}
