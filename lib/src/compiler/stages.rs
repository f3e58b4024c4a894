use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::Lazy;
use pulldown_cmark::{Options, Parser};
use regex::{Captures, Regex};

use crate::compiler::{Compilation, Stage};
use crate::context::Context;
use crate::error::{Chainable, Kind, Result};
use crate::id::ResourceId;
use crate::item::{Body, Item};
use crate::metadata::Metadata;
use crate::templating::{Engine, MiniJinja};
use crate::value::Format;

/// A content transformer: a pure function of an item's body and metadata.
pub trait Transformer: Send + Sync + 'static {
    fn transform(&self, input: &Body, metadata: &Metadata) -> Result<Body>;
}

impl<F> Transformer for F
    where F: Fn(&Body, &Metadata) -> Result<Body> + Send + Sync + 'static
{
    fn transform(&self, input: &Body, metadata: &Metadata) -> Result<Body> {
        self(input, metadata)
    }
}

/// Stage replacing the body with the output of a [`Transformer`].
pub struct Transform<T> {
    name: String,
    transformer: T,
}

pub fn transform<T: Transformer>(name: &str, transformer: T) -> Transform<T> {
    Transform { name: name.to_string(), transformer }
}

impl<T: Transformer> Stage for Transform<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, item: Item, _: &Compilation) -> Result<Item> {
        let body = self.transformer.transform(&item.body, &item.metadata)?;
        Ok(item.with_body(body))
    }
}

/// CommonMark to HTML.
#[derive(Debug, Clone, Copy)]
pub struct Markdown {
    options: Options,
}

impl Default for Markdown {
    fn default() -> Self {
        Markdown {
            options: Options::ENABLE_TABLES
                | Options::ENABLE_FOOTNOTES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_HEADING_ATTRIBUTES,
        }
    }
}

impl Markdown {
    pub fn with_options(options: Options) -> Self {
        Markdown { options }
    }
}

impl Transformer for Markdown {
    fn transform(&self, input: &Body, _: &Metadata) -> Result<Body> {
        let text = input.as_text()?;
        let parser = Parser::new_ext(&text, self.options);
        let mut html = String::with_capacity(text.len() + text.len() / 2);
        pulldown_cmark::html::push_html(&mut html, parser);
        Ok(Body::from(html))
    }
}

/// SCSS or CSS in, compressed CSS out.
#[cfg(feature = "sass")]
#[derive(Debug, Default, Clone, Copy)]
pub struct CompressCss;

#[cfg(feature = "sass")]
impl Transformer for CompressCss {
    fn transform(&self, input: &Body, _: &Metadata) -> Result<Body> {
        let options = grass::Options::default().style(grass::OutputStyle::Compressed);
        let css = grass::from_string(input.as_text()?.into_owned(), &options)
            .map_err(|e| error!("failed to compile stylesheet", "cause" => e))?;

        Ok(Body::from(css))
    }
}

/// Stage moving a `+++`-delimited header into the item's metadata.
pub struct FrontMatter<F> {
    _format: PhantomData<fn() -> F>,
}

/// Strips a header of the form
///
/// ```text
/// +++
/// title = "Hello"
/// +++
/// ```
///
/// from the body, parses it with the data format `F` and merges the result
/// into the item's metadata, replacing existing keys. Bodies without a header
/// pass through untouched.
pub fn read_front_matter<F: Format>(_format: F) -> FrontMatter<F> {
    FrontMatter { _format: PhantomData }
}

fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    const DELIMITER: &str = "+++";

    let text = text.strip_prefix(DELIMITER)?;
    let text = text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n'))?;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            return Some((&text[..offset], &text[offset + line.len()..]));
        }

        offset += line.len();
    }

    None
}

impl<F: Format> Stage for FrontMatter<F> {
    fn name(&self) -> &str {
        "front matter"
    }

    fn run(&self, mut item: Item, _: &Compilation) -> Result<Item> {
        let parsed = {
            let text = item.body.as_text()?;
            match text.starts_with("+++") {
                false => None,
                true => {
                    let (header, content) = split_front_matter(&text).ok_or_else(|| error! {
                        "unterminated front matter",
                        "resource" => &item.id,
                        "hint" => "close the header with a line containing only `+++`",
                    })?;

                    let dict = F::parse_dict(header).chain_with(|| error! {
                        "malformed front matter",
                        "resource" => &item.id,
                        "format" => F::NAME,
                    })?;

                    Some((dict, content.to_string()))
                }
            }
        };

        match parsed {
            Some((dict, content)) => {
                item.metadata.append_all(&dict);
                Ok(item.with_body(content))
            }
            None => Ok(item),
        }
    }
}

/// Stage rendering the item through a template.
pub struct ApplyTemplate {
    name: String,
    template: ResourceId,
    context: Context,
    engine: Arc<dyn Engine>,
}

/// Renders the item through the template resource `template` with
/// `context`, using [`MiniJinja`].
///
/// The template must be compiled by some rule, typically one with
/// [`Route::none()`](crate::Route::none); otherwise the stage fails with
/// [`Kind::TemplateMissing`]. The item depends on the template.
pub fn apply_template(template: &str, context: Context) -> ApplyTemplate {
    apply_template_with(template, context, MiniJinja::new())
}

/// Like [`apply_template()`] but rendering with `engine`.
pub fn apply_template_with<E: Engine>(template: &str, context: Context, engine: E) -> ApplyTemplate {
    ApplyTemplate::new(template, context, Arc::new(engine))
}

impl ApplyTemplate {
    /// Shares `engine` with other stages.
    pub fn new(template: &str, context: Context, engine: Arc<dyn Engine>) -> Self {
        let template = ResourceId::new(template);
        let name = format!("apply template {template}");
        ApplyTemplate { name, template, context, engine }
    }
}

impl Stage for ApplyTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, item: Item, cx: &Compilation) -> Result<Item> {
        if !cx.knows(self.template.as_str()) {
            return Err(error! {
                "no rule compiles the requested template",
                "template" => &self.template,
                "resource" => &item.id,
            }.with_kind(Kind::TemplateMissing));
        }

        let template = cx.load(self.template.as_str())?;
        let source = template.body.as_text()?;
        let name = self.template.as_str();
        let rendered = self.engine.render(name, &source, &self.context, &item, cx)?;
        Ok(item.with_body(rendered))
    }
}

static ROOT_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<attr>\b(?:href|src)\s*=\s*)(?P<quote>["'])/(?P<path>[^"']*)"#)
        .expect("root URL regex is valid")
});

/// Rewrites root-relative `href`/`src` URLs in `html` so they resolve from a
/// page written at `route`: `/css/a.css` becomes `../css/a.css` in
/// `posts/x.html`. Protocol-relative URLs (`//host/...`) are left alone.
pub fn relativize(html: &str, route: &str) -> String {
    let depth = route.trim_start_matches('/').matches('/').count();
    let root = match depth {
        0 => ".".to_string(),
        n => vec![".."; n].join("/"),
    };

    ROOT_URL.replace_all(html, |caps: &Captures<'_>| {
        let path = &caps["path"];
        match path.starts_with('/') {
            true => caps[0].to_string(),
            false => format!("{}{}{root}/{path}", &caps["attr"], &caps["quote"]),
        }
    }).into_owned()
}

/// Stage applying [`relativize()`] with the item's route. Fails for items
/// that aren't written anywhere.
pub struct RelativizeUrls;

pub fn relativize_urls() -> RelativizeUrls {
    RelativizeUrls
}

impl Stage for RelativizeUrls {
    fn name(&self) -> &str {
        "relativize urls"
    }

    fn run(&self, item: Item, cx: &Compilation) -> Result<Item> {
        let route = cx.route().ok_or_else(|| error! {
            "cannot relativize URLs of an item with no route",
            "resource" => &item.id,
        })?;

        let route = route.to_string_lossy().replace('\\', "/");
        let html = relativize(&item.body.as_text()?, &route);
        Ok(item.with_body(html))
    }
}

/// Stage saving the item as it is at this point under a name. See
/// [`Compilation::load_snapshot()`].
pub struct SaveSnapshot {
    name: String,
    snapshot: Arc<str>,
}

pub fn save_snapshot(name: &str) -> SaveSnapshot {
    SaveSnapshot { name: format!("save snapshot {name}"), snapshot: name.into() }
}

impl Stage for SaveSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, item: Item, cx: &Compilation) -> Result<Item> {
        cx.save_snapshot(&self.snapshot, &item);
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Toml;

    fn run<S: Stage>(stage: S, id: &str, body: &str, route: Option<&str>) -> Result<Item> {
        let cx = Compilation::detached(id, route);
        stage.run(Item::new(ResourceId::new(id), body), &cx)
    }

    #[test]
    fn front_matter() {
        let text = "+++\ntitle = \"Hello\"\ndate = 2024-01-05\n+++\n# Body\n";
        let item = run(read_front_matter(Toml), "posts/a.md", text, None).unwrap();
        assert_eq!(item.body, "# Body\n".into());
        assert_eq!(item.metadata.get_raw("title").and_then(|v| v.as_str()), Some("Hello"));
        assert_eq!(item.date().unwrap().to_string(), "2024-01-05 00:00:00");

        let item = run(read_front_matter(Toml), "a.md", "no header", None).unwrap();
        assert_eq!(item.body, "no header".into());
        assert!(item.metadata.is_empty());

        let item = run(read_front_matter(Toml), "a.md", "+++\n+++\n", None).unwrap();
        assert!(item.body.is_empty());

        assert!(run(read_front_matter(Toml), "a.md", "+++\ntitle = 1\n", None).is_err());
        assert!(run(read_front_matter(Toml), "a.md", "+++\ntitle = \n+++\n", None).is_err());
    }

    #[test]
    fn markdown() {
        let item = run(transform("markdown", Markdown::default()), "a.md", "*hi*", None).unwrap();
        assert_eq!(item.body, "<p><em>hi</em></p>\n".into());

        let upper = |body: &Body, _: &Metadata| -> Result<Body> {
            Ok(Body::from(body.as_text()?.to_uppercase()))
        };
        let item = run(transform("upper", upper), "a.txt", "abc", None).unwrap();
        assert_eq!(item.body, "ABC".into());
    }

    #[cfg(feature = "sass")]
    #[test]
    fn compress_css() {
        let css = "body {\n  color: red;\n}\n\na { margin: 0 }\n";
        let item = run(transform("css", CompressCss), "css/a.css", css, None).unwrap();
        let css = item.body.as_text().unwrap().into_owned();
        assert!(css.starts_with("body{color:red}"), "{css}");
        assert!(!css.contains("\n  "));
    }

    #[test]
    fn relativizes_root_urls() {
        let html = r#"<a href="/posts/x.html">x</a><img src='/img/a.png'><a href="//cdn/x">c</a><a href="http://a/b">d</a>"#;
        assert_eq!(
            relativize(html, "posts/2024/y.html"),
            r#"<a href="../../posts/x.html">x</a><img src='../../img/a.png'><a href="//cdn/x">c</a><a href="http://a/b">d</a>"#
        );

        assert_eq!(relativize(r#"<a href="/">home</a>"#, "index.html"), r#"<a href="./">home</a>"#);

        let item = run(relativize_urls(), "a.md", r#"<a href="/b">"#, Some("a/index.html")).unwrap();
        assert_eq!(item.body, r#"<a href="../b">"#.into());
        assert!(run(relativize_urls(), "a.md", "", None).is_err());
    }

    #[test]
    fn missing_templates() {
        let error = run(apply_template("templates/nope.html", Context::body()), "a.md", "", None)
            .unwrap_err();

        assert_eq!(error.kind(), Kind::TemplateMissing);
        assert_eq!(error.param("template").as_deref(), Some("templates/nope.html"));
    }
}
