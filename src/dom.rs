//! Minimal DOM
//!
//! Just enough of a document tree for rendering: elements, text, comments and
//! fragments, attributes, a live `value` for form controls, event listeners,
//! and detach hooks that fire when a node leaves its parent.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

const FORM_CONTROLS: &[&str] = &["input", "textarea", "select"];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub fn is_raw_text_element(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

/// How a node left the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// The node itself was removed from its parent.
    Direct,
    /// An ancestor was removed.
    Ancestor,
}

pub type EventListener = Rc<dyn Fn(&Node)>;
type DetachHook = Box<dyn FnOnce(Detach)>;

enum Kind {
    Element(String),
    Text,
    Comment,
    Fragment,
}

struct Inner {
    kind: Kind,
    data: RefCell<String>,
    attributes: RefCell<Vec<(String, String)>>,
    value: RefCell<Option<String>>,
    children: RefCell<Vec<Node>>,
    parent: RefCell<Weak<Inner>>,
    listeners: RefCell<Vec<(String, EventListener)>>,
    detach_hooks: RefCell<Vec<DetachHook>>,
}

#[derive(Clone)]
pub struct Node(Rc<Inner>);

/// Non-owning handle to a [`Node`].
#[derive(Clone, Default)]
pub struct WeakNode(Weak<Inner>);

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }
}

impl Node {
    fn with_kind(kind: Kind, data: &str) -> Self {
        Self(Rc::new(Inner {
            kind,
            data: RefCell::new(data.to_string()),
            attributes: RefCell::new(Vec::new()),
            value: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
            listeners: RefCell::new(Vec::new()),
            detach_hooks: RefCell::new(Vec::new()),
        }))
    }

    pub fn element(tag: &str) -> Self {
        Self::with_kind(Kind::Element(tag.to_ascii_lowercase()), "")
    }

    pub fn text(data: &str) -> Self {
        Self::with_kind(Kind::Text, data)
    }

    pub fn comment(data: &str) -> Self {
        Self::with_kind(Kind::Comment, data)
    }

    pub fn fragment() -> Self {
        Self::with_kind(Kind::Fragment, "")
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Lowercase tag name for elements.
    pub fn tag_name(&self) -> Option<&str> {
        match &self.0.kind {
            Kind::Element(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.0.kind, Kind::Element(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self.0.kind, Kind::Text)
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.0.kind, Kind::Fragment)
    }

    pub fn is_form_control(&self) -> bool {
        self.tag_name().is_some_and(|t| FORM_CONTROLS.contains(&t))
    }

    // ─────────────────────────────────────────────────────────────
    // Tree
    // ─────────────────────────────────────────────────────────────

    pub fn parent(&self) -> Option<Node> {
        self.0.parent.borrow().upgrade().map(Node)
    }

    pub fn child_nodes(&self) -> Vec<Node> {
        self.0.children.borrow().clone()
    }

    pub fn child_count(&self) -> usize {
        self.0.children.borrow().len()
    }

    pub fn child(&self, index: usize) -> Option<Node> {
        self.0.children.borrow().get(index).cloned()
    }

    pub fn first_child(&self) -> Option<Node> {
        self.child(0)
    }

    /// Element children only.
    pub fn children(&self) -> Vec<Node> {
        self.child_nodes()
            .into_iter()
            .filter(Node::is_element)
            .collect()
    }

    /// First element child.
    pub fn first_element_child(&self) -> Option<Node> {
        self.child_nodes().into_iter().find(Node::is_element)
    }

    /// Append `child`. A fragment hands over its children; a node that
    /// already has a parent is moved (a move is not a removal).
    pub fn append_child(&self, child: &Node) {
        self.insert_before(child, None);
    }

    /// Insert `child` before `reference`, or at the end when `reference` is
    /// `None` or not a child of `self`.
    pub fn insert_before(&self, child: &Node, reference: Option<&Node>) {
        let incoming = if child.is_fragment() {
            let moved = child.0.children.take();
            for node in &moved {
                *node.0.parent.borrow_mut() = Weak::new();
            }
            moved
        } else {
            child.take_from_parent();
            vec![child.clone()]
        };

        let mut children = self.0.children.borrow_mut();
        let mut at = reference
            .and_then(|r| children.iter().position(|c| c.ptr_eq(r)))
            .unwrap_or(children.len());
        for node in incoming {
            *node.0.parent.borrow_mut() = Rc::downgrade(&self.0);
            children.insert(at, node);
            at += 1;
        }
    }

    /// Remove `child` and run detach hooks on it and its subtree.
    pub fn remove_child(&self, child: &Node) -> bool {
        let removed = {
            let mut children = self.0.children.borrow_mut();
            children
                .iter()
                .position(|c| c.ptr_eq(child))
                .map(|pos| children.remove(pos))
        };
        match removed {
            Some(node) => {
                *node.0.parent.borrow_mut() = Weak::new();
                node.fire_detach(Detach::Direct);
                true
            }
            None => false,
        }
    }

    /// Remove `self` from its parent, if any.
    pub fn remove(&self) -> bool {
        match self.parent() {
            Some(parent) => parent.remove_child(self),
            None => false,
        }
    }

    fn take_from_parent(&self) {
        if let Some(parent) = self.parent() {
            parent.0.children.borrow_mut().retain(|c| !c.ptr_eq(self));
        }
        *self.0.parent.borrow_mut() = Weak::new();
    }

    /// Run `hook` once, the next time this node (or an ancestor) is removed.
    pub fn on_detach(&self, hook: impl FnOnce(Detach) + 'static) {
        self.0.detach_hooks.borrow_mut().push(Box::new(hook));
    }

    fn fire_detach(&self, how: Detach) {
        let hooks = self.0.detach_hooks.take();
        for hook in hooks {
            hook(how);
        }
        for child in self.child_nodes() {
            child.fire_detach(Detach::Ancestor);
        }
    }

    /// Descendants in document order, `self` excluded.
    pub fn descendants(&self) -> Vec<Node> {
        let mut out = Vec::new();
        for child in self.child_nodes() {
            out.push(child.clone());
            out.extend(child.descendants());
        }
        out
    }

    pub fn get_elements_by_tag_name(&self, tag: &str) -> Vec<Node> {
        let tag = tag.to_ascii_lowercase();
        self.descendants()
            .into_iter()
            .filter(|n| n.tag_name() == Some(tag.as_str()))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Text
    // ─────────────────────────────────────────────────────────────

    /// Character data of a text or comment node.
    pub fn data(&self) -> String {
        self.0.data.borrow().clone()
    }

    pub fn set_data(&self, data: &str) {
        *self.0.data.borrow_mut() = data.to_string();
    }

    pub fn text_content(&self) -> String {
        match self.0.kind {
            Kind::Text | Kind::Comment => self.data(),
            _ => self
                .child_nodes()
                .iter()
                .filter(|c| !matches!(c.0.kind, Kind::Comment))
                .map(Node::text_content)
                .collect(),
        }
    }

    /// Replace all children with one text node.
    pub fn set_text_content(&self, text: &str) {
        match self.0.kind {
            Kind::Text | Kind::Comment => self.set_data(text),
            _ => {
                for child in self.child_nodes() {
                    self.remove_child(&child);
                }
                if !text.is_empty() {
                    self.append_child(&Node::text(text));
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Attributes and form values
    // ─────────────────────────────────────────────────────────────

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.0
            .attributes
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        let mut attributes = self.0.attributes.borrow_mut();
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value.to_string(),
            None => attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attribute(&self, name: &str) {
        self.0.attributes.borrow_mut().retain(|(n, _)| n != name);
    }

    pub fn attributes(&self) -> Vec<(String, String)> {
        self.0.attributes.borrow().clone()
    }

    /// Live value of a form control: the dirty value if one was set,
    /// otherwise the markup default.
    pub fn value(&self) -> String {
        if let Some(value) = self.0.value.borrow().as_ref() {
            return value.clone();
        }
        self.default_value()
    }

    /// Markup-level default: the `value` attribute, or the text content of
    /// a `<textarea>`.
    pub fn default_value(&self) -> String {
        match self.tag_name() {
            Some("textarea") => self.text_content(),
            _ => self.get_attribute("value").unwrap_or_default(),
        }
    }

    pub fn set_value(&self, value: &str) {
        *self.0.value.borrow_mut() = Some(value.to_string());
    }

    /// Restore every control of a form to its markup default, then send
    /// each a `reset` event.
    pub fn reset(&self) {
        let controls: Vec<Node> = self
            .descendants()
            .into_iter()
            .filter(Node::is_form_control)
            .collect();
        for control in &controls {
            *control.0.value.borrow_mut() = None;
        }
        for control in &controls {
            control.dispatch_event("reset");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────

    pub fn add_event_listener(&self, event: &str, listener: impl Fn(&Node) + 'static) {
        self.0
            .listeners
            .borrow_mut()
            .push((event.to_string(), Rc::new(listener)));
    }

    /// Call this node's listeners for `event`. Returns how many ran.
    pub fn dispatch_event(&self, event: &str) -> usize {
        let listeners: Vec<EventListener> = self
            .0
            .listeners
            .borrow()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, l)| l.clone())
            .collect();
        for listener in &listeners {
            listener(self);
        }
        listeners.len()
    }

    // ─────────────────────────────────────────────────────────────
    // Serialization
    // ─────────────────────────────────────────────────────────────

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        let raw = self.tag_name().is_some_and(is_raw_text_element);
        for child in self.child_nodes() {
            if raw && child.is_text() {
                out.push_str(&child.data());
            } else {
                child.write_html(&mut out);
            }
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match &self.0.kind {
            Kind::Text => out.push_str(&escape_text(&self.data())),
            Kind::Comment => {
                out.push_str("<!--");
                out.push_str(&self.data());
                out.push_str("-->");
            }
            Kind::Fragment => out.push_str(&self.inner_html()),
            Kind::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in self.0.attributes.borrow().iter() {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(value));
                    out.push('"');
                }
                out.push('>');
                if is_void_element(tag) {
                    return;
                }
                out.push_str(&self.inner_html());
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.outer_html())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            Kind::Element(tag) => write!(f, "<{tag}> ({} children)", self.child_count()),
            Kind::Text => write!(f, "#text {:?}", self.data()),
            Kind::Comment => write!(f, "#comment {:?}", self.data()),
            Kind::Fragment => write!(f, "#fragment ({} children)", self.child_count()),
        }
    }
}
