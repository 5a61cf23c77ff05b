use super::{render_block, Env, LiveBinding};
use crate::compiler::{BlockId, Program, SectionOp};
use crate::dom::{Detach, Node, WeakNode};
use crate::error::TetherError;
use crate::expression::Expression;
use crate::observable::untracked;
use crate::registry::Registry;
use crate::scope::Scope;
use crate::template::BlockHelper;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::iter;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::debug;

/// One entry of a live range: a node, or a nested range in its place.
pub(crate) enum RangeItem {
    Node(WeakNode),
    Section(Rc<Section>),
}

/// A live range of sibling nodes owned by one section.
///
/// Re-rendering stages the new content in a fragment, inserts it before the
/// old first node, then removes the old nodes. Every node of the range
/// carries a detach guard for this section and for each enclosing section
/// sharing its sibling level. A direct removal disposes the section only
/// once none of its nodes is left in the tree, so a nested section swapping
/// its own nodes never tears down its parent.
pub(crate) struct Section {
    range: RefCell<Vec<RangeItem>>,
    binding: RefCell<Option<Rc<LiveBinding>>>,
    enclosing: Vec<Weak<Section>>,
    disposed: Cell<bool>,
}

impl Section {
    fn new(level: &[Weak<Section>]) -> Rc<Self> {
        Rc::new(Section {
            range: RefCell::new(Vec::new()),
            binding: RefCell::new(None),
            enclosing: level.to_vec(),
            disposed: Cell::new(false),
        })
    }

    fn nodes(&self) -> Vec<Node> {
        let mut out = Vec::new();
        for item in self.range.borrow().iter() {
            match item {
                RangeItem::Node(node) => out.extend(node.upgrade()),
                RangeItem::Section(section) => out.extend(section.nodes()),
            }
        }
        out
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(binding) = self.binding.take() {
            binding.dispose();
        }
    }

    fn detached(&self, how: Detach) {
        match how {
            Detach::Ancestor => self.dispose(),
            Detach::Direct => {
                if self.nodes().iter().all(|node| node.parent().is_none()) {
                    self.dispose();
                }
            }
        }
    }

    fn guard(self: &Rc<Self>, items: &[RangeItem]) {
        let owners: Vec<Rc<Section>> = self
            .enclosing
            .iter()
            .filter_map(Weak::upgrade)
            .chain(iter::once(self.clone()))
            .collect();
        for item in items {
            let RangeItem::Node(node) = item else {
                continue;
            };
            let Some(node) = node.upgrade() else {
                continue;
            };
            for owner in &owners {
                let owner = owner.clone();
                node.on_detach(move |how| owner.detached(how));
            }
        }
    }

    /// Swap the range's content for what `build` appends to a staging
    /// fragment. On the first run the range is empty and `parent_hint` is
    /// where the content goes.
    fn replace(
        self: &Rc<Self>,
        parent_hint: &WeakNode,
        build: impl FnOnce(&Node, &[Weak<Section>]) -> Result<Vec<RangeItem>, TetherError>,
    ) -> Result<(), TetherError> {
        let old = self.nodes();
        let (parent, anchor) = match old.iter().find(|node| node.parent().is_some()) {
            Some(first) => (first.parent(), Some(first.clone())),
            None if old.is_empty() => (parent_hint.upgrade(), None),
            None => {
                self.dispose();
                return Ok(());
            }
        };
        let Some(parent) = parent else {
            return Ok(());
        };

        let staging = Node::fragment();
        let mut level = self.enclosing.clone();
        level.push(Rc::downgrade(self));
        let mut items = build(&staging, &level)?;
        if items.is_empty() {
            let placeholder = Node::text("");
            staging.append_child(&placeholder);
            items.push(RangeItem::Node(placeholder.downgrade()));
        }

        parent.insert_before(&staging, anchor.as_ref());
        self.guard(&items);
        *self.range.borrow_mut() = items;
        for node in old {
            node.remove();
        }
        Ok(())
    }

    fn install(&self, binding: Rc<LiveBinding>) {
        if binding.is_live() {
            *self.binding.borrow_mut() = Some(binding);
        }
    }
}

/// A block to render and the scope to render it with.
pub(crate) struct Frame {
    pub(crate) block: BlockId,
    pub(crate) scope: Scope,
}

/// What a section renders for `value`.
pub(crate) fn frames(op: &SectionOp, value: &Value, scope: &Scope) -> Vec<Frame> {
    let value = value.settled();
    let body = |scope: Scope| Frame {
        block: op.body,
        scope,
    };
    let otherwise = || -> Vec<Frame> {
        op.otherwise
            .map(|block| Frame {
                block,
                scope: scope.clone(),
            })
            .into_iter()
            .collect()
    };
    let each = |items: Vec<Value>| -> Vec<Frame> {
        if items.is_empty() {
            otherwise()
        } else {
            items.into_iter().map(|item| body(scope.add(item))).collect()
        }
    };

    match op.helper {
        BlockHelper::If if value.truthy() => vec![body(scope.clone())],
        BlockHelper::Unless | BlockHelper::Inverse if !value.truthy() => {
            vec![body(scope.clone())]
        }
        BlockHelper::If | BlockHelper::Unless | BlockHelper::Inverse => otherwise(),
        BlockHelper::Each => match &value {
            Value::List(list) => each(list.items()),
            Value::Map(map) => each(map.entries().into_iter().map(|(_, v)| v).collect()),
            _ => otherwise(),
        },
        BlockHelper::With if value.truthy() => vec![body(scope.add(value.clone()))],
        BlockHelper::With => otherwise(),
        BlockHelper::Section => match &value {
            Value::List(list) => each(list.items()),
            Value::Bool(true) => vec![body(scope.clone())],
            other if other.truthy() => vec![body(scope.add(other.clone()))],
            _ => otherwise(),
        },
    }
}

/// `{{#…}}` sections.
pub(super) fn render(
    env: &Env,
    op: &SectionOp,
    scope: &Scope,
    helpers: &Scope,
    parent: &Node,
    level: &[Weak<Section>],
) -> Result<Rc<Section>, TetherError> {
    let section = Section::new(level);
    let this = Rc::downgrade(&section);
    let parent_hint = parent.downgrade();
    let (env, op, scope, helpers) = (env.clone(), op.clone(), scope.clone(), helpers.clone());
    let conditional = matches!(
        op.helper,
        BlockHelper::If | BlockHelper::Unless | BlockHelper::Inverse
    );
    let shown: RefCell<Option<Vec<BlockId>>> = RefCell::new(None);
    let label = format!("#{}", op.expr);

    let binding = LiveBinding::new(label, move || {
        let Some(section) = this.upgrade() else {
            return Ok(());
        };
        let value = op.expr.evaluate(&scope, &helpers);
        let frames = frames(&op, &value, &scope);

        // a conditional only re-renders when it switches branches
        if conditional {
            let blocks: Vec<BlockId> = frames.iter().map(|frame| frame.block).collect();
            if shown.borrow().as_ref() == Some(&blocks) {
                return Ok(());
            }
            *shown.borrow_mut() = Some(blocks);
        }

        untracked(|| {
            section.replace(&parent_hint, |staging, level| {
                let mut items = Vec::new();
                for frame in &frames {
                    items.extend(render_block(
                        &env,
                        frame.block,
                        &frame.scope,
                        &helpers,
                        staging,
                        level,
                    )?);
                }
                Ok(items)
            })
        })
    });
    binding.run()?;
    section.install(binding);
    Ok(section)
}

/// `{{{expr}}}`: the value is parsed as markup and rendered without data
/// bindings. Text that does not parse is shown as-is.
pub(super) fn markup(
    expr: &Expression,
    scope: &Scope,
    helpers: &Scope,
    parent: &Node,
    level: &[Weak<Section>],
) -> Result<Rc<Section>, TetherError> {
    let section = Section::new(level);
    let this = Rc::downgrade(&section);
    let parent_hint = parent.downgrade();
    let (expr, scope, helpers) = (expr.clone(), scope.clone(), helpers.clone());
    let last: RefCell<Option<String>> = RefCell::new(None);
    let label = format!("{{{{{{{expr}}}}}}}");

    let binding = LiveBinding::new(label, move || {
        let Some(section) = this.upgrade() else {
            return Ok(());
        };
        let html = expr.evaluate(&scope, &helpers).to_text();
        if last.borrow().as_deref() == Some(html.as_str()) {
            return Ok(());
        }
        *last.borrow_mut() = Some(html.clone());

        untracked(|| {
            section.replace(&parent_hint, |staging, _| Ok(static_markup(&html, staging)))
        })
    });
    binding.run()?;
    section.install(binding);
    Ok(section)
}

fn static_markup(html: &str, staging: &Node) -> Vec<RangeItem> {
    let rendered = Program::compile(html).and_then(|program| {
        let env = Env::new(Arc::new(program), Registry::new());
        let empty = Scope::new(Value::Undefined);
        render_block(&env, Program::ROOT, &empty, &empty, staging, &[])
    });
    match rendered {
        Ok(items) => items,
        Err(err) => {
            debug!(error = %err, "unescaped value is not markup, inserting as text");
            for child in staging.child_nodes() {
                staging.remove_child(&child);
            }
            let text = Node::text(html);
            staging.append_child(&text);
            vec![RangeItem::Node(text.downgrade())]
        }
    }
}
