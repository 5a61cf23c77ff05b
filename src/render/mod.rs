//! Live Binding Engine
//!
//! Walks a program block and builds DOM. Text and attribute mustaches become
//! [`LiveBinding`]s; sections and unescaped output become live ranges
//! (`section.rs`) that re-render their own nodes and nothing else.

mod binding;
mod section;

pub(crate) use binding::LiveBinding;

use crate::compiler::{AttributeOp, BlockId, ElementOp, Instruction, Program, SubRenderer};
use crate::dom::Node;
use crate::error::TetherError;
use crate::observable::untracked;
use crate::registry::{Hookup, Registry, TagData};
use crate::scope::Scope;
use section::{RangeItem, Section};
use std::rc::Weak;
use std::sync::Arc;
use tracing::debug;

/// Program plus the registry its hookups resolve against.
#[derive(Clone, Debug)]
pub(crate) struct Env {
    program: Arc<Program>,
    registry: Registry,
}

impl Env {
    pub(crate) fn new(program: Arc<Program>, registry: Registry) -> Self {
        Self { program, registry }
    }

    pub(crate) fn program(&self) -> &Arc<Program> {
        &self.program
    }
}

/// Render one block into a new fragment.
pub(crate) fn render_fragment(
    env: &Env,
    block: BlockId,
    scope: &Scope,
    helpers: &Scope,
) -> Result<Node, TetherError> {
    let fragment = Node::fragment();
    untracked(|| render_block(env, block, scope, helpers, &fragment, &[]))?;
    Ok(fragment)
}

/// Append the block's nodes to `parent` and return them as range items.
/// `level` lists the live ranges whose sibling level these nodes join.
fn render_block(
    env: &Env,
    block: BlockId,
    scope: &Scope,
    helpers: &Scope,
    parent: &Node,
    level: &[Weak<Section>],
) -> Result<Vec<RangeItem>, TetherError> {
    let mut items = Vec::new();
    for instruction in env.program.block(block) {
        let item = match instruction {
            Instruction::Text(text) => {
                let node = Node::text(text);
                parent.append_child(&node);
                RangeItem::Node(node.downgrade())
            }
            Instruction::Bind {
                expr,
                escaped: true,
            } => RangeItem::Node(binding::text(expr, scope, helpers, parent)?.downgrade()),
            Instruction::Bind {
                expr,
                escaped: false,
            } => RangeItem::Section(section::markup(expr, scope, helpers, parent, level)?),
            Instruction::Element(op) => {
                RangeItem::Node(element(env, op, scope, helpers, parent)?.downgrade())
            }
            Instruction::Section(op) => {
                RangeItem::Section(section::render(env, op, scope, helpers, parent, level)?)
            }
        };
        items.push(item);
    }
    Ok(items)
}

/// Attributes first, then the tag hookup (or plain content), then one
/// attribute hookup per matching attribute.
fn element(
    env: &Env,
    op: &ElementOp,
    scope: &Scope,
    helpers: &Scope,
    parent: &Node,
) -> Result<Node, TetherError> {
    let node = Node::element(&op.tag);
    parent.append_child(&node);

    for attribute in &op.attributes {
        match attribute {
            AttributeOp::Static { name, value } => {
                node.set_attribute(name, value.as_deref().unwrap_or(""))
            }
            AttributeOp::Live { name, block } => {
                binding::attribute(env, *block, name, &node, scope, helpers)?
            }
        }
    }
    if let Some(block) = op.attribute_block {
        binding::attribute_list(env, block, &node, scope, helpers)?;
    }

    let subtemplate = op.content.map(|block| SubRenderer::new(env.clone(), block));
    match env.registry.tag(&op.tag) {
        Some(hookup) => {
            debug!(tag = %op.tag, "tag hookup");
            let data = TagData {
                scope: scope.clone(),
                options: helpers.clone(),
                subtemplate: subtemplate.clone(),
                attribute_name: None,
            };
            if let Hookup::RenderWith(inner) = hookup(&node, &data)? {
                if let Some(block) = op.content {
                    render_block(env, block, &inner, helpers, &node, &[])?;
                }
            }
        }
        None => {
            if let Some(block) = op.content {
                render_block(env, block, scope, helpers, &node, &[])?;
            }
        }
    }

    for attribute in &op.attributes {
        let name = attribute.name();
        let Some(hookup) = env.registry.attribute(name) else {
            continue;
        };
        debug!(tag = %op.tag, attribute = name, "attribute hookup");
        let data = TagData {
            scope: scope.clone(),
            options: helpers.clone(),
            subtemplate: subtemplate.clone(),
            attribute_name: Some(name.to_string()),
        };
        hookup(&node, &data)?;
    }
    Ok(node)
}

/// Render a block to a string: attribute values and attribute lists.
fn render_string(env: &Env, block: BlockId, scope: &Scope, helpers: &Scope) -> String {
    let mut out = String::new();
    for instruction in env.program.block(block) {
        match instruction {
            Instruction::Text(text) => out.push_str(text),
            Instruction::Bind { expr, .. } => out.push_str(&expr.evaluate(scope, helpers).to_text()),
            Instruction::Section(op) => {
                let value = op.expr.evaluate(scope, helpers);
                for frame in section::frames(op, &value, scope) {
                    out.push_str(&render_string(env, frame.block, &frame.scope, helpers));
                }
            }
            Instruction::Element(_) => {}
        }
    }
    out
}
