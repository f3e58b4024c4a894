use std::sync::Arc;

use quire::error::Result;
use quire::value::Toml;
use quire::*;

use crate::config::Settings;

pub const POSTS: &str = "posts/*";
pub const POST_TEMPLATE: &str = "templates/post.html";
pub const PAGE_TEMPLATE: &str = "templates/default.html";
pub const ARCHIVE_TEMPLATE: &str = "templates/archive.html";
pub const INDEX_TEMPLATE: &str = "templates/index.html";

/// Post fields: the defaults plus a human-readable `date`.
fn post_context() -> Context {
    Context::date("date", "%B %e, %Y") + Context::default_fields()
}

/// `site`: the settings in `commentout.toml`, or the defaults if the site has
/// none. Pages load the file, so editing it rebuilds them.
fn site_context() -> Result<Context> {
    let config = Pattern::parse(crate::CONFIG_FILE)?;
    Ok(Context::field("site", move |_, cx| {
        let settings = match cx.load_all(&config)?.first() {
            Some(file) => Settings::parse(&file.body.as_text()?)?,
            None => Settings::default(),
        };

        settings.to_value()
    }))
}

/// `posts`: every post, newest first, read from `snapshot` if given.
fn posts_context(snapshot: Option<&'static str>) -> Result<Context> {
    let posts = Pattern::parse(POSTS)?;
    Ok(Context::list("posts", post_context(), move |_, cx| {
        let mut posts = match snapshot {
            Some(name) => cx.load_all_snapshots(&posts, name)?,
            None => cx.load_all(&posts)?,
        };

        recent_first(&mut posts)?;
        Ok(posts)
    }))
}

/// The rules building comment out.
///
/// Posts are Markdown with a TOML header under `posts/`. The rendered post,
/// before it's wrapped in the page layout, is saved as the `content`
/// snapshot for the front page.
pub fn rules() -> Result<Rules> {
    let engine: Arc<dyn Engine> = Arc::new(MiniJinja::new());
    let template = |name: &str, context: Context| ApplyTemplate::new(name, context, engine.clone());

    let site = site_context()?;
    let layout = |pipeline: Pipeline, context: Context| pipeline
        .then(template(PAGE_TEMPLATE, site.clone() + context))
        .then(relativize_urls());

    let pages = Route::gsub("^pages/", "")?.then(Route::set_extension("html"));

    let rules = Rules::new()
        .matching(crate::CONFIG_FILE, Route::none(), Pipeline::new())
        .matching("templates/*", Route::none(), Pipeline::new())
        .matching("css/*", Route::identity(), Pipeline::new()
            .then(transform("compress css", CompressCss)))
        .matching("images/**", Route::identity(), Pipeline::new())
        .matching(POSTS, Route::set_extension("html"), layout(Pipeline::new()
            .then(read_front_matter(Toml))
            .then(transform("markdown", Markdown::default()))
            .then(template(POST_TEMPLATE, post_context()))
            .then(save_snapshot("content")), post_context()))
        .matching("pages/*.md", pages, layout(Pipeline::new()
            .then(read_front_matter(Toml))
            .then(transform("markdown", Markdown::default())), Context::default_fields()))
        .create(["archive.html"], Route::identity(), {
            let context = posts_context(None)?
                + Context::constant("title", "Archives")
                + Context::default_fields();

            layout(Pipeline::new().then(template(ARCHIVE_TEMPLATE, context.clone())), context)
        })
        .create(["index.html"], Route::identity(), {
            let context = posts_context(Some("content"))?
                + Context::constant("title", "Home")
                + Context::default_fields();

            layout(Pipeline::new().then(template(INDEX_TEMPLATE, context.clone())), context)
        });

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Universe {
        Universe::new()
            .with(PAGE_TEMPLATE, "<html><title>{{ title }} | {{ site.name }}</title>\
                <link href=\"/css/site.css\">{{ body }}</html>")
            .with(POST_TEMPLATE, "<h1>{{ title }}</h1><p>{{ date }}</p>{{ body }}")
            .with(ARCHIVE_TEMPLATE, "{% for post in posts %}\
                <a href=\"{{ post.url }}\">{{ post.title }}</a>{% endfor %}")
            .with(INDEX_TEMPLATE, "{% for post in posts %}{{ post.body }}{% endfor %}")
            .with("css/site.css", "body {  color : red ; }")
            .with("images/2024/cat.png", vec![0x89, b'P', b'N', b'G'])
            .with("pages/about.md", "+++\ntitle = \"About\"\n+++\nHi.")
            .with("posts/first.md", "+++\ntitle = \"First\"\ndate = \"2023-04-01\"\n+++\nOne.")
            .with("posts/second.md", "+++\ntitle = \"Second\"\ndate = \"2024-02-10\"\n+++\nTwo.")
    }

    #[test]
    fn builds_the_site() {
        let rules = rules().unwrap();
        let sink = MemorySink::new();
        let mut cache = BuildCache::new();
        let report = build(&rules, &site(), &mut cache, &sink, &Config::default()).unwrap();
        assert!(report.is_success(), "{report}");

        let paths: Vec<_> = sink.paths().into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        assert_eq!(paths, [
            "about.html",
            "archive.html",
            "css/site.css",
            "images/2024/cat.png",
            "index.html",
            "posts/first.html",
            "posts/second.html",
        ]);

        let post = sink.get_str("posts/first.html").unwrap();
        assert!(post.starts_with("<html><title>First | comment out</title>"));
        assert!(post.contains("href=\"../css/site.css\""));
        assert!(post.contains("<h1>First</h1><p>April  1, 2023</p><p>One.</p>"));

        let archive = sink.get_str("archive.html").unwrap();
        let second = archive.find("Second").unwrap();
        let first = archive.find("First").unwrap();
        assert!(second < first);
        assert!(archive.contains("href=\"./posts/second.html\""));

        let index = sink.get_str("index.html").unwrap();
        assert!(index.contains("<h1>Second</h1>"));
        assert!(!index.contains("<title>Second"));

        assert_eq!(sink.get("images/2024/cat.png").as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));
    }

    #[test]
    fn settings_changes_rebuild_pages() {
        let rules = rules().unwrap();
        let sink = MemorySink::new();
        let mut cache = BuildCache::new();

        let universe = site().with(crate::CONFIG_FILE, "name = \"old blog\"");
        let report = build(&rules, &universe, &mut cache, &sink, &Config::default()).unwrap();
        assert!(report.is_success(), "{report}");
        assert!(sink.get_str("about.html").unwrap().contains("<title>About | old blog</title>"));
        assert!(sink.get("commentout.toml").is_none());

        let universe = site().with(crate::CONFIG_FILE, "name = \"renamed blog\"");
        let report = build(&rules, &universe, &mut cache, &sink, &Config::default()).unwrap();
        assert!(report.is_success(), "{report}");
        assert!(report.compiled.contains(&ResourceId::new("posts/first.md")));
        assert!(report.compiled.contains(&ResourceId::new("pages/about.md")));
        assert!(!report.compiled.contains(&ResourceId::new("css/site.css")));

        let post = sink.get_str("posts/first.html").unwrap();
        assert!(post.starts_with("<html><title>First | renamed blog</title>"));
        assert!(sink.get_str("about.html").unwrap().contains("<title>About | renamed blog</title>"));
    }

    #[test]
    fn builds_the_bundled_site() {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("site");
        let settings = Settings::discover(&root.join(crate::CONFIG_FILE)).unwrap();
        let universe = Universe::scan(&root).unwrap();

        let sink = MemorySink::new();
        let mut cache = BuildCache::new();
        let rules = rules().unwrap();
        let report = build(&rules, &universe, &mut cache, &sink, &settings.engine).unwrap();
        assert!(report.is_success(), "{report}");
        assert!(sink.get("commentout.toml").is_none());

        let post = sink.get_str("posts/2015-03-02-hello-world.html").unwrap();
        assert!(post.contains("March  2, 2015"));
        assert!(post.contains("href=\"../archive.html\""));

        let index = sink.get_str("index.html").unwrap();
        let newer = index.find("Incremental builds").unwrap();
        let older = index.find("Hello, world").unwrap();
        assert!(newer < older);

        let report = build(&rules, &universe, &mut cache, &sink, &settings.engine).unwrap();
        assert!(report.compiled.is_empty());
    }
}
