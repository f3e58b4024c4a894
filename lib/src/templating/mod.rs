mod minijinja;

pub use self::minijinja::MiniJinja;

use crate::compiler::Compilation;
use crate::context::Context;
use crate::error::Result;
use crate::item::Item;

/// A template renderer.
///
/// `source` is the compiled body of the template resource `name`. Fields
/// referenced by the template are looked up in `context` for `item`. An
/// undefined field must fail with
/// [`Kind::TemplateFieldMissing`](crate::error::Kind::TemplateFieldMissing).
pub trait Engine: Send + Sync + 'static {
    fn render(
        &self,
        name: &str,
        source: &str,
        context: &Context,
        item: &Item,
        cx: &Compilation,
    ) -> Result<String>;
}
