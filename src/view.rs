//! Public entry points
//!
//! A [`View`] owns a registry, a batch coordinator and a handle on a template
//! cache. Everything is explicit state; [`View::global`] is the thread's
//! default, used by the crate-level convenience functions.

use crate::batch::Batch;
use crate::cache::{id_key, url_key, TemplateCache};
use crate::compiler::{Program, Renderer};
use crate::config::ViewConfig;
use crate::dom::Node;
use crate::error::TetherError;
use crate::loader::{DefaultLoader, TemplateLoader};
use crate::pending::{resolve_context, PendingState};
use crate::registry::{Hookup, Matcher, Registry, TagData};
use crate::value::Value;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, Span};

/// Where a template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    /// Literal markup.
    Inline(String),
    /// A template registered with [`View::register`].
    Id(String),
    /// A path handed to the loader. `engine` overrides the extension check.
    Url { path: String, engine: Option<String> },
}

impl TemplateSource {
    pub fn inline(source: impl Into<String>) -> Self {
        TemplateSource::Inline(source.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        TemplateSource::Id(id.into())
    }

    pub fn url(path: impl Into<String>) -> Self {
        TemplateSource::Url {
            path: path.into(),
            engine: None,
        }
    }

    pub fn url_with_engine(path: impl Into<String>, engine: impl Into<String>) -> Self {
        TemplateSource::Url {
            path: path.into(),
            engine: Some(engine.into()),
        }
    }
}

/// Text with markup or mustache tags (or any whitespace) is inline source,
/// `#name` is a registered id, anything else a path.
impl From<&str> for TemplateSource {
    fn from(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty()
            || trimmed.contains(['<', '>'])
            || trimmed.contains("{{")
            || trimmed.contains(char::is_whitespace)
        {
            TemplateSource::Inline(text.to_string())
        } else if let Some(id) = trimmed.strip_prefix('#') {
            TemplateSource::Id(id.to_string())
        } else {
            TemplateSource::url(trimmed)
        }
    }
}

impl From<String> for TemplateSource {
    fn from(text: String) -> Self {
        TemplateSource::from(text.as_str())
    }
}

impl From<&TemplateSource> for TemplateSource {
    fn from(source: &TemplateSource) -> Self {
        source.clone()
    }
}

impl fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateSource::Inline(text) => {
                let head: String = text.chars().take(32).collect();
                if head.len() < text.len() {
                    write!(f, "inline `{head}…`")
                } else {
                    write!(f, "inline `{head}`")
                }
            }
            TemplateSource::Id(id) => write!(f, "#{id}"),
            TemplateSource::Url { path, engine: None } => f.write_str(path),
            TemplateSource::Url {
                path,
                engine: Some(engine),
            } => write!(f, "{path} ({engine})"),
        }
    }
}

/// Outcome of an async render.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub fragment: Node,
    /// The data the fragment was rendered with: pending sources replaced by
    /// their settled values. The caller's map is never modified.
    pub data: Value,
}

struct Inner {
    config: ViewConfig,
    registry: Registry,
    batch: Batch,
    cache: Arc<TemplateCache>,
}

#[derive(Clone)]
pub struct View(Rc<Inner>);

thread_local! {
    static GLOBAL: View = View::new(ViewConfig::from_env());
}

impl View {
    /// A view loading templates from disk or HTTP, with the built-in
    /// attribute bindings installed.
    pub fn new(config: ViewConfig) -> Self {
        let loader = Arc::new(DefaultLoader::new(config.template_root.clone()));
        Self::with_loader(config, loader)
    }

    pub fn with_loader(config: ViewConfig, loader: Arc<dyn TemplateLoader>) -> Self {
        let cache = TemplateCache::new(loader).with_caching(config.cache_templates);
        Self::from_parts(config, Registry::with_builtins(), Batch::current(), Arc::new(cache))
    }

    /// Assemble a view from explicit parts, e.g. to share one cache between
    /// views or give a view its own batch coordinator.
    pub fn from_parts(
        config: ViewConfig,
        registry: Registry,
        batch: Batch,
        cache: Arc<TemplateCache>,
    ) -> Self {
        Self(Rc::new(Inner {
            config,
            registry,
            batch,
            cache,
        }))
    }

    /// The thread's default view.
    pub fn global() -> View {
        GLOBAL.with(View::clone)
    }

    pub fn config(&self) -> &ViewConfig {
        &self.0.config
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub fn batch(&self) -> &Batch {
        &self.0.batch
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.0.cache
    }

    fn renderer_for(&self, program: Arc<Program>) -> Renderer {
        Renderer::new(program, self.0.registry.clone())
    }

    /// Compile inline markup.
    pub fn compile(&self, source: &str) -> Result<Renderer, TetherError> {
        let program = self.0.cache.compile_inline(source)?;
        Ok(self.renderer_for(program))
    }

    /// Compile `source` and keep it under `id`.
    pub fn register(&self, id: &str, source: &str) -> Result<Renderer, TetherError> {
        let program = Arc::new(Program::compile(source)?);
        self.0.cache.insert(id_key(id), program.clone());
        debug!(id, "template registered");
        Ok(self.renderer_for(program))
    }

    /// Register every `<script type="text/stache" id="…">` under `root`.
    /// Returns how many were registered.
    pub fn register_scripts(&self, root: &Node) -> Result<usize, TetherError> {
        let mut count = 0;
        for script in root.get_elements_by_tag_name("script") {
            let kind = script.get_attribute("type").unwrap_or_default();
            if !self.0.config.extensions.iter().any(|ext| kind.contains(ext.as_str())) {
                continue;
            }
            let Some(id) = script.get_attribute("id").filter(|id| !id.is_empty()) else {
                continue;
            };
            self.register(&id, &script.text_content())?;
            count += 1;
        }
        Ok(count)
    }

    fn registered(&self, id: &str) -> Option<Result<Renderer, TetherError>> {
        self.0
            .cache
            .get_ready(&id_key(id))
            .map(|compiled| compiled.map(|program| self.renderer_for(program)))
    }

    /// A renderer, without suspending. Remote templates must already be in
    /// the cache.
    pub fn renderer_now(
        &self,
        source: impl Into<TemplateSource>,
    ) -> Result<Renderer, TetherError> {
        match source.into() {
            TemplateSource::Inline(text) => self.compile(&text),
            TemplateSource::Id(id) => self
                .registered(&id)
                .unwrap_or(Err(TetherError::UnknownTemplate { id })),
            TemplateSource::Url { path, engine } => {
                if engine.is_none() {
                    if let Some(found) = self.registered(&path) {
                        return found;
                    }
                }
                self.0.config.engine_for(&path, engine.as_deref())?;
                match self.0.cache.get_ready(&url_key(&path)) {
                    Some(compiled) => compiled.map(|program| self.renderer_for(program)),
                    None => Err(TetherError::NotReady { source_desc: path }),
                }
            }
        }
    }

    /// A renderer, fetching and compiling remote templates once.
    pub async fn renderer(
        &self,
        source: impl Into<TemplateSource>,
    ) -> Result<Renderer, TetherError> {
        match source.into() {
            TemplateSource::Url { path, engine } => {
                if engine.is_none() {
                    if let Some(found) = self.registered(&path) {
                        return found;
                    }
                }
                self.0.config.engine_for(&path, engine.as_deref())?;
                let program = self.0.cache.resolve(&path).await?;
                Ok(self.renderer_for(program))
            }
            other => self.renderer_now(other),
        }
    }

    /// Render once the template is compiled and every pending source in
    /// `data` has settled. The first rejection fails the render and nothing
    /// is rendered.
    #[instrument(skip_all, fields(source))]
    pub async fn render(
        &self,
        source: impl Into<TemplateSource>,
        data: impl Into<Value>,
    ) -> Result<Rendered, TetherError> {
        let source = source.into();
        Span::current().record("source", tracing::field::display(&source));

        let (renderer, data) =
            futures::future::try_join(self.renderer(source), resolve_context(data.into()))
                .await?;
        let fragment = renderer.render(data.clone())?;
        debug!(nodes = fragment.child_count(), "render complete");
        Ok(Rendered { fragment, data })
    }

    /// Render without suspending. A pending root must already be settled;
    /// pending properties render as placeholders and fill in when they
    /// settle.
    pub fn render_now(
        &self,
        source: impl Into<TemplateSource>,
        data: impl Into<Value>,
    ) -> Result<Node, TetherError> {
        let source = source.into();
        let data = match data.into() {
            Value::Pending(pending) => match pending.state() {
                PendingState::Resolved(value) => value,
                PendingState::Rejected(rejection) => return Err(rejection.into()),
                PendingState::Pending => {
                    return Err(TetherError::NotReady {
                        source_desc: source.to_string(),
                    })
                }
            },
            other => other,
        };
        self.renderer_now(source)?.render(data)
    }

    /// Callback-style render. The callback runs on a later turn of the local
    /// task set, never inside this call. Must be called within a
    /// `tokio::task::LocalSet`.
    pub fn render_with(
        &self,
        source: impl Into<TemplateSource>,
        data: impl Into<Value>,
        callback: impl FnOnce(Result<Rendered, TetherError>) + 'static,
    ) -> JoinHandle<()> {
        let view = self.clone();
        let (source, data) = (source.into(), data.into());
        tokio::task::spawn_local(async move {
            let result = view.render(source, data).await;
            callback(result);
        })
    }

    pub fn register_tag(
        &self,
        matcher: impl Into<Matcher>,
        hookup: impl Fn(&Node, &TagData) -> Result<Hookup, TetherError> + 'static,
    ) {
        self.0.registry.register_tag(matcher, hookup);
    }

    pub fn register_attribute(
        &self,
        matcher: impl Into<Matcher>,
        hookup: impl Fn(&Node, &TagData) -> Result<(), TetherError> + 'static,
    ) {
        self.0.registry.register_attribute(matcher, hookup);
    }

    pub fn batch_start(&self) {
        self.0.batch.start();
    }

    pub fn batch_stop(&self) {
        self.0.batch.stop();
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("config", &self.0.config)
            .field("registry", &self.0.registry)
            .field("cached", &self.0.cache.len())
            .finish()
    }
}

/// Compile inline markup with the thread's default view.
pub fn compile(source: &str) -> Result<Renderer, TetherError> {
    View::global().compile(source)
}

pub fn register_tag(
    matcher: impl Into<Matcher>,
    hookup: impl Fn(&Node, &TagData) -> Result<Hookup, TetherError> + 'static,
) {
    View::global().register_tag(matcher, hookup);
}

pub fn register_attribute(
    matcher: impl Into<Matcher>,
    hookup: impl Fn(&Node, &TagData) -> Result<(), TetherError> + 'static,
) {
    View::global().register_attribute(matcher, hookup);
}

pub fn batch_start() {
    View::global().batch_start();
}

pub fn batch_stop() {
    View::global().batch_stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::pending::Deferred;

    fn memory_view() -> (View, Arc<MemoryLoader>) {
        let loader = Arc::new(MemoryLoader::new());
        (View::with_loader(ViewConfig::default(), loader.clone()), loader)
    }

    #[test]
    fn sources_are_told_apart() {
        assert!(matches!(
            TemplateSource::from("<h1>{{x}}</h1>"),
            TemplateSource::Inline(_)
        ));
        assert!(matches!(TemplateSource::from("hello world"), TemplateSource::Inline(_)));
        assert_eq!(TemplateSource::from("#card"), TemplateSource::id("card"));
        assert_eq!(
            TemplateSource::from("views/card.stache"),
            TemplateSource::url("views/card.stache")
        );
    }

    #[test]
    fn registered_templates_render_by_id() {
        let (view, _) = memory_view();
        view.register("greeting", "<b>{{name}}</b>").unwrap();
        let data = serde_json::json!({"name": "Ada"});
        let fragment = view.render_now("#greeting", data.clone()).unwrap();
        assert_eq!(fragment.inner_html(), "<b>Ada</b>");

        // bare names fall back to registered ids before the loader
        let fragment = view.render_now("greeting", data).unwrap();
        assert_eq!(fragment.inner_html(), "<b>Ada</b>");

        assert!(matches!(
            view.render_now("#missing", Value::Undefined),
            Err(TetherError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn script_elements_register_by_id() {
        let (view, _) = memory_view();
        let root = Node::fragment();
        for (kind, id, body) in [
            ("text/stache", "row", "<i>{{.}}</i>"),
            ("text/javascript", "js", "var x;"),
            ("text/mustache", "", "<u></u>"),
        ] {
            let script = Node::element("script");
            script.set_attribute("type", kind);
            if !id.is_empty() {
                script.set_attribute("id", id);
            }
            script.set_text_content(body);
            root.append_child(&script);
        }
        assert_eq!(view.register_scripts(&root).unwrap(), 1);
        assert_eq!(view.render_now("#row", "x").unwrap().inner_html(), "<i>x</i>");
    }

    #[test]
    fn uncached_urls_are_not_ready_synchronously() {
        let (view, loader) = memory_view();
        loader.insert("card.stache", "<p></p>");
        assert!(matches!(
            view.renderer_now("card.stache"),
            Err(TetherError::NotReady { .. })
        ));
        assert!(matches!(
            view.renderer_now("card.ejs"),
            Err(TetherError::UnknownEngine { .. })
        ));
    }

    #[test]
    fn render_now_needs_a_settled_root() {
        let (view, _) = memory_view();
        let deferred = Deferred::new();
        assert!(matches!(
            view.render_now("<p>{{a}}</p>", &deferred),
            Err(TetherError::NotReady { .. })
        ));
        deferred.resolve(serde_json::json!({"a": 1}));
        let fragment = view.render_now("<p>{{a}}</p>", &deferred).unwrap();
        assert_eq!(fragment.text_content(), "1");
    }

    #[test]
    fn batch_controls_reach_the_coordinator() {
        let batch = Batch::new();
        let (view, _) = memory_view();
        let view = View::from_parts(
            view.config().clone(),
            view.registry().clone(),
            batch.clone(),
            view.cache().clone(),
        );
        view.batch_start();
        assert!(batch.is_active());
        view.batch_stop();
        assert_eq!(batch.depth(), 0);
    }
}
