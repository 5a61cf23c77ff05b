//! Tag/Attribute Registry
//!
//! Two dispatch tables per kind: exact names and regex patterns. An exact
//! name always beats a pattern; among patterns the first registered match
//! wins. Lookups clone the callback out of the table, so a hookup may
//! register more hookups while it runs.

use crate::compiler::SubRenderer;
use crate::dom::Node;
use crate::error::TetherError;
use crate::scope::Scope;
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// What a tag or attribute hookup is registered for.
#[derive(Debug, Clone)]
pub enum Matcher {
    Name(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn pattern(pattern: &str) -> Result<Matcher, TetherError> {
        Regex::new(pattern)
            .map(Matcher::Pattern)
            .map_err(|e| TetherError::Config(format!("invalid pattern '{pattern}': {e}")))
    }
}

impl From<&str> for Matcher {
    fn from(name: &str) -> Self {
        Matcher::Name(name.to_string())
    }
}

impl From<String> for Matcher {
    fn from(name: String) -> Self {
        Matcher::Name(name)
    }
}

impl From<Regex> for Matcher {
    fn from(pattern: Regex) -> Self {
        Matcher::Pattern(pattern)
    }
}

/// Everything a hookup gets to know about the node it runs for.
#[derive(Clone)]
pub struct TagData {
    pub scope: Scope,
    /// Helper scope.
    pub options: Scope,
    /// Renders the element's enclosed content; `None` when it has none.
    pub subtemplate: Option<SubRenderer>,
    /// The concrete attribute name, for attribute hookups.
    pub attribute_name: Option<String>,
}

/// Result of a tag hookup.
#[derive(Debug, Clone)]
pub enum Hookup {
    /// The hookup took care of the element's content (or it has none).
    Handled,
    /// Render the element's content against this scope.
    RenderWith(Scope),
}

pub type TagHookup = Rc<dyn Fn(&Node, &TagData) -> Result<Hookup, TetherError>>;
pub type AttributeHookup = Rc<dyn Fn(&Node, &TagData) -> Result<(), TetherError>>;

struct Table<H> {
    exact: HashMap<String, H>,
    patterns: Vec<(Regex, H)>,
}

impl<H> Default for Table<H> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }
}

impl<H: Clone> Table<H> {
    fn insert(&mut self, matcher: Matcher, hookup: H) {
        match matcher {
            Matcher::Name(name) => {
                self.exact.insert(name, hookup);
            }
            Matcher::Pattern(pattern) => self.patterns.push((pattern, hookup)),
        }
    }

    fn find(&self, name: &str) -> Option<H> {
        self.exact.get(name).cloned().or_else(|| {
            self.patterns
                .iter()
                .find(|(pattern, _)| pattern.is_match(name))
                .map(|(_, hookup)| hookup.clone())
        })
    }

    fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }
}

#[derive(Default)]
struct Tables {
    tags: Table<TagHookup>,
    attributes: Table<AttributeHookup>,
}

/// Shared handle; clones see the same tables.
#[derive(Clone, Default)]
pub struct Registry(Rc<RefCell<Tables>>);

impl Registry {
    /// Empty registry, without the built-in attribute bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `{($prop)}` and `($event)` installed.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::bindings::install(&registry);
        registry
    }

    pub fn register_tag(
        &self,
        matcher: impl Into<Matcher>,
        hookup: impl Fn(&Node, &TagData) -> Result<Hookup, TetherError> + 'static,
    ) {
        self.0
            .borrow_mut()
            .tags
            .insert(matcher.into(), Rc::new(hookup));
    }

    pub fn register_attribute(
        &self,
        matcher: impl Into<Matcher>,
        hookup: impl Fn(&Node, &TagData) -> Result<(), TetherError> + 'static,
    ) {
        self.0
            .borrow_mut()
            .attributes
            .insert(matcher.into(), Rc::new(hookup));
    }

    pub fn tag(&self, name: &str) -> Option<TagHookup> {
        self.0.borrow().tags.find(name)
    }

    pub fn attribute(&self, name: &str) -> Option<AttributeHookup> {
        self.0.borrow().attributes.find(name)
    }

    pub fn tag_count(&self) -> usize {
        self.0.borrow().tags.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.0.borrow().attributes.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tags", &self.tag_count())
            .field("attributes", &self.attribute_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_marker(registry: &Registry, matcher: Matcher, marker: &'static str) {
        registry.register_tag(matcher, move |node, _| {
            node.set_attribute("hooked", marker);
            Ok(Hookup::Handled)
        });
    }

    fn run(registry: &Registry, tag: &str) -> Option<String> {
        let node = Node::element(tag);
        let data = TagData {
            scope: Scope::empty(),
            options: Scope::empty(),
            subtemplate: None,
            attribute_name: None,
        };
        let hookup = registry.tag(tag)?;
        hookup(&node, &data).ok()?;
        node.get_attribute("hooked")
    }

    #[test]
    fn exact_name_beats_pattern() {
        let registry = Registry::new();
        tag_marker(&registry, Matcher::pattern("^my-").unwrap(), "pattern");
        tag_marker(&registry, "my-panel".into(), "exact");
        assert_eq!(run(&registry, "my-panel").as_deref(), Some("exact"));
        assert_eq!(run(&registry, "my-tabs").as_deref(), Some("pattern"));
        assert_eq!(run(&registry, "div"), None);
    }

    #[test]
    fn first_registered_pattern_wins() {
        let registry = Registry::new();
        tag_marker(&registry, Matcher::pattern("panel").unwrap(), "first");
        tag_marker(&registry, Matcher::pattern("pan").unwrap(), "second");
        assert_eq!(run(&registry, "x-panel").as_deref(), Some("first"));
    }

    #[test]
    fn hookup_can_register_while_running() {
        let registry = Registry::new();
        let inner = registry.clone();
        registry.register_tag("outer", move |_, _| {
            inner.register_tag("late", |_, _| Ok(Hookup::Handled));
            Ok(Hookup::Handled)
        });
        run(&registry, "outer");
        assert_eq!(registry.tag_count(), 2);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(matches!(Matcher::pattern("("), Err(TetherError::Config(_))));
    }
}
