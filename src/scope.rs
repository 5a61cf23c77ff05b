//! Scope Chain
//!
//! A singly linked chain of contexts. Children point at parents, never the
//! other way round, so the chain is acyclic by construction. Reads walk from
//! the innermost context outward; the first context owning the path's first
//! segment decides the result.

use crate::error::TetherError;
use crate::observable::{untracked, ObservableMap};
use crate::value::{Func, Value};
use std::fmt;
use std::rc::Rc;

/// Options for [`Scope::get_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Call a function found at the path and return its result.
    pub proxy_methods: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            proxy_methods: true,
        }
    }
}

impl ReadOptions {
    /// Read functions as values instead of calling them.
    pub fn raw() -> Self {
        Self {
            proxy_methods: false,
        }
    }
}

/// A parsed key path: `name.sub`, `.`/`this`, `../name`, `./name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    raw: String,
    segments: Vec<String>,
    parent_hops: usize,
    current_only: bool,
}

impl KeyPath {
    pub fn parse(raw: &str) -> KeyPath {
        let mut rest = raw.trim();
        let mut parent_hops = 0;
        let mut current_only = false;

        while let Some(stripped) = rest.strip_prefix("../") {
            parent_hops += 1;
            rest = stripped;
        }
        if rest == ".." {
            parent_hops += 1;
            rest = "";
        }
        if let Some(stripped) = rest.strip_prefix("./").or_else(|| rest.strip_prefix("this.")) {
            current_only = true;
            rest = stripped;
        }
        if rest == "." || rest == "this" {
            rest = "";
        }

        KeyPath {
            raw: raw.trim().to_string(),
            segments: rest
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            parent_hops,
            current_only,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// `.`, `this` or `../`: the context itself.
    pub fn is_context(&self) -> bool {
        self.segments.is_empty()
    }

    /// One plain name, eligible for helper lookup.
    pub fn is_simple_name(&self) -> bool {
        self.segments.len() == 1 && self.parent_hops == 0 && !self.current_only
    }

    fn parent(&self) -> Option<KeyPath> {
        let (_, head) = self.segments.split_last()?;
        Some(KeyPath {
            raw: head.join("."),
            segments: head.to_vec(),
            parent_hops: self.parent_hops,
            current_only: self.current_only,
        })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

struct Node {
    context: Value,
    parent: Option<Scope>,
}

#[derive(Clone)]
pub struct Scope(Rc<Node>);

impl Scope {
    pub fn new(context: impl Into<Value>) -> Self {
        Self(Rc::new(Node {
            context: context.into(),
            parent: None,
        }))
    }

    /// Scope over a fresh empty map.
    pub fn empty() -> Self {
        Self::new(ObservableMap::new())
    }

    /// New child scope; `self` is shared, not copied.
    pub fn add(&self, context: impl Into<Value>) -> Scope {
        Self(Rc::new(Node {
            context: context.into(),
            parent: Some(self.clone()),
        }))
    }

    pub fn context(&self) -> &Value {
        &self.0.context
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    /// Outermost context of the chain.
    pub fn root(&self) -> Value {
        let mut scope = self;
        while let Some(parent) = scope.parent() {
            scope = parent;
        }
        scope.context().clone()
    }

    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut scope = self;
        while let Some(parent) = scope.parent() {
            depth += 1;
            scope = parent;
        }
        depth
    }

    pub fn get(&self, path: &str) -> Value {
        self.get_with(path, ReadOptions::default())
    }

    pub fn get_with(&self, path: &str, options: ReadOptions) -> Value {
        self.read(&KeyPath::parse(path), options)
    }

    /// Function stored under a plain name anywhere in the chain.
    pub fn helper(&self, name: &str) -> Option<Func> {
        match self.get_with(name, ReadOptions::raw()) {
            Value::Func(func) => Some(func),
            _ => None,
        }
    }

    fn hop(&self, hops: usize) -> Option<&Scope> {
        let mut scope = self;
        for _ in 0..hops {
            scope = scope.parent()?;
        }
        Some(scope)
    }

    pub(crate) fn read(&self, path: &KeyPath, options: ReadOptions) -> Value {
        let Some(start) = self.hop(path.parent_hops) else {
            return Value::Undefined;
        };
        let Some((first, rest)) = path.segments.split_first() else {
            return finish(start.context().settled(), options);
        };

        let mut cursor = Some(start);
        while let Some(scope) = cursor {
            if let Some(mut value) = read_key(&scope.context().settled(), first) {
                for segment in rest {
                    value = read_key(&value.settled(), segment).unwrap_or_default();
                }
                return finish(value, options);
            }
            if path.current_only {
                break;
            }
            cursor = scope.parent();
        }
        Value::Undefined
    }

    /// Write `value` at `path`.
    ///
    /// A plain name goes to the innermost context that already owns it, or
    /// is created on the innermost context. A dotted path writes into the
    /// container its parent path resolves to.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<(), TetherError> {
        let key_path = KeyPath::parse(path);
        let value = value.into();
        let write_error = |reason: &str| TetherError::ScopeWrite {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let Some(last) = key_path.segments.last() else {
            return Err(write_error("cannot replace a context"));
        };

        if key_path.segments.len() > 1 {
            let parent = key_path.parent().unwrap_or_else(|| key_path.clone());
            let target = untracked(|| self.read(&parent, ReadOptions::raw()).settled());
            return match target {
                Value::Map(map) => {
                    map.set(last, value);
                    Ok(())
                }
                Value::List(list) => match last.parse::<usize>() {
                    Ok(index) => {
                        if list.set(index, value) {
                            Ok(())
                        } else {
                            Err(write_error("list index is past the end"))
                        }
                    }
                    Err(_) => Err(write_error("list index is not a number")),
                },
                _ => Err(write_error("parent path does not resolve to a map")),
            };
        }

        let start = self
            .hop(key_path.parent_hops)
            .ok_or_else(|| write_error("not enough parent scopes"))?;

        let owner = untracked(|| {
            let mut cursor = Some(start);
            while let Some(scope) = cursor {
                if let Value::Map(map) = scope.context().settled() {
                    if map.has(last) {
                        return Some(map);
                    }
                }
                if key_path.current_only {
                    break;
                }
                cursor = scope.parent();
            }
            None
        });

        let target = match owner {
            Some(map) => map,
            None => match start.context().settled() {
                Value::Map(map) => map,
                _ => return Err(write_error("innermost context is not a map")),
            },
        };
        target.set(last, value);
        Ok(())
    }
}

fn finish(value: Value, options: ReadOptions) -> Value {
    match value {
        Value::Func(func) if options.proxy_methods => func.call(&[]),
        other => other,
    }
}

/// One property step. `None` means the context does not own `key`.
pub(crate) fn read_key(context: &Value, key: &str) -> Option<Value> {
    match context {
        Value::Map(map) => map.lookup(key),
        Value::List(list) if key == "length" => Some(Value::from(list.len())),
        Value::List(list) => key.parse::<usize>().ok().map(|i| list.get(i)),
        Value::String(s) if key == "length" => Some(Value::from(s.chars().count())),
        _ => None,
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        let mut scope = Some(self);
        while let Some(s) = scope {
            list.entry(s.context());
            scope = s.parent();
        }
        list.finish()
    }
}
