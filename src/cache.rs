//! Template Cache
//!
//! Memoizes compiled programs by template identity. The first request for a
//! key stores a shared in-flight future; concurrent requests await that same
//! future, so one key costs one fetch and one compile. A settled entry is
//! replaced by the program (or the terminal failure) and served without
//! suspending from then on.

use crate::compiler::Program;
use crate::error::TetherError;
use crate::loader::TemplateLoader;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

type Compiled = Result<Arc<Program>, TetherError>;
type InFlight = Shared<BoxFuture<'static, Compiled>>;

#[derive(Clone)]
enum CacheEntry {
    InFlight(InFlight),
    Ready(Arc<Program>),
    Failed(TetherError),
}

/// Cache key for an inline source: the source text itself.
pub fn inline_key(source: &str) -> String {
    format!("inline:{source}")
}

pub fn id_key(id: &str) -> String {
    format!("id:{}", id.trim_start_matches('#'))
}

pub fn url_key(path: &str) -> String {
    format!("url:{path}")
}

pub struct TemplateCache {
    entries: DashMap<String, CacheEntry>,
    loader: Arc<dyn TemplateLoader>,
    enabled: bool,
    fetches: Arc<AtomicUsize>,
    compiles: Arc<AtomicUsize>,
}

impl TemplateCache {
    pub fn new(loader: Arc<dyn TemplateLoader>) -> Self {
        Self {
            entries: DashMap::new(),
            loader,
            enabled: true,
            fetches: Arc::new(AtomicUsize::new(0)),
            compiles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// With `false`, every resolve fetches and compiles again.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Fetch and compile the template at `path` once.
    #[instrument(skip(self), fields(cached = self.enabled))]
    pub async fn resolve(&self, path: &str) -> Compiled {
        if !self.enabled {
            return self.load(path).await;
        }

        let key = url_key(path);
        let entry = match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                debug!("cache hit");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                debug!("cache miss");
                let in_flight = self.load(path).boxed().shared();
                vacant.insert(CacheEntry::InFlight(in_flight.clone()));
                CacheEntry::InFlight(in_flight)
            }
        };

        match entry {
            CacheEntry::Ready(program) => Ok(program),
            CacheEntry::Failed(err) => Err(err),
            CacheEntry::InFlight(in_flight) => {
                let outcome = in_flight.await;
                self.settle(&key, &outcome);
                outcome
            }
        }
    }

    fn load(&self, path: &str) -> impl std::future::Future<Output = Compiled> + Send + 'static {
        let loader = self.loader.clone();
        let (fetches, compiles) = (self.fetches.clone(), self.compiles.clone());
        let path = path.to_string();
        async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            let source = loader.fetch(&path).await?;
            compiles.fetch_add(1, Ordering::SeqCst);
            Program::compile(&source).map(Arc::new)
        }
    }

    fn settle(&self, key: &str, outcome: &Compiled) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if matches!(*entry, CacheEntry::InFlight(_)) {
                *entry = match outcome {
                    Ok(program) => CacheEntry::Ready(program.clone()),
                    Err(err) => CacheEntry::Failed(err.clone()),
                };
            }
        }
    }

    /// Compile inline source, reusing an identical earlier compile. Parse
    /// errors are not cached.
    pub fn compile_inline(&self, source: &str) -> Compiled {
        let key = inline_key(source);
        if let Some(Ok(program)) = self.get_ready(&key) {
            debug!("inline cache hit");
            return Ok(program);
        }
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let program = Arc::new(Program::compile(source)?);
        if self.enabled {
            self.insert(key, program.clone());
        }
        Ok(program)
    }

    pub fn insert(&self, key: impl Into<String>, program: Arc<Program>) {
        self.entries.insert(key.into(), CacheEntry::Ready(program));
    }

    /// Settled entry for `key`; `None` while missing or in flight.
    pub fn get_ready(&self, key: &str) -> Option<Compiled> {
        match self.entries.get(key)?.value() {
            CacheEntry::Ready(program) => Some(Ok(program.clone())),
            CacheEntry::Failed(err) => Some(Err(err.clone())),
            CacheEntry::InFlight(_) => None,
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use std::time::Duration;

    fn cache_with(templates: &[(&str, &str)]) -> (TemplateCache, Arc<MemoryLoader>) {
        let loader = Arc::new(MemoryLoader::with_delay(Duration::from_millis(10)));
        for (path, source) in templates {
            loader.insert(*path, *source);
        }
        (TemplateCache::new(loader.clone()), loader)
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let (cache, loader) = cache_with(&[("a.stache", "<p>{{x}}</p>")]);
        let (first, second) = tokio::join!(cache.resolve("a.stache"), cache.resolve("a.stache"));
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(loader.fetch_count(), 1);
        assert_eq!(cache.compile_count(), 1);

        // settled entries are served without suspending
        assert!(matches!(cache.get_ready(&url_key("a.stache")), Some(Ok(_))));
    }

    #[tokio::test]
    async fn failures_are_terminal() {
        let (cache, loader) = cache_with(&[]);
        assert!(matches!(
            cache.resolve("missing.stache").await,
            Err(TetherError::Fetch { .. })
        ));
        assert!(cache.resolve("missing.stache").await.is_err());
        assert_eq!(loader.fetch_count(), 1);
    }

    #[tokio::test]
    async fn parse_errors_surface_through_resolve() {
        let (cache, _) = cache_with(&[("bad.stache", "{{#if a}}")]);
        assert!(cache.resolve("bad.stache").await.unwrap_err().is_parse());
    }

    #[tokio::test]
    async fn disabled_cache_fetches_every_time() {
        let (cache, loader) = cache_with(&[("a.stache", "x")]);
        let cache = cache.with_caching(false);
        cache.resolve("a.stache").await.unwrap();
        cache.resolve("a.stache").await.unwrap();
        assert_eq!(loader.fetch_count(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn inline_compiles_are_reused_and_errors_are_not_kept() {
        let (cache, _) = cache_with(&[]);
        let a = cache.compile_inline("<b>{{x}}</b>").unwrap();
        let b = cache.compile_inline("<b>{{x}}</b>").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.compile_inline("{{#if}}").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_inline_sources_get_distinct_programs() {
        let (cache, _) = cache_with(&[]);
        let a = cache.compile_inline("<b>{{x}}</b>").unwrap();
        let b = cache.compile_inline("<i>{{x}}</i>").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(inline_key("ab"), inline_key("ba"));
        assert_ne!(inline_key("a"), id_key("a"));
        assert_eq!(cache.len(), 2);
    }
}
