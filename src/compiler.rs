//! Template Compiler
//!
//! Flattens the markup tree into a [`Program`]: a list of instruction blocks.
//! Block 0 is the template itself; every section body, element content and
//! live attribute value gets its own block, so any of them can be rendered
//! again against a new scope without re-parsing.

use crate::dom::Node;
use crate::error::TetherError;
use crate::expression::Expression;
use crate::registry::Registry;
use crate::render::{self, Env};
use crate::scope::Scope;
use crate::template::{self, BlockHelper, Markup};
use crate::value::Value;
use std::sync::Arc;
use tracing::debug;

pub type BlockId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Text(String),
    Bind { expr: Expression, escaped: bool },
    Element(ElementOp),
    Section(SectionOp),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementOp {
    pub tag: String,
    pub attributes: Vec<AttributeOp>,
    /// Block rendered to `name="value"` pairs.
    pub attribute_block: Option<BlockId>,
    pub content: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeOp {
    Static { name: String, value: Option<String> },
    Live { name: String, block: BlockId },
}

impl AttributeOp {
    pub fn name(&self) -> &str {
        match self {
            AttributeOp::Static { name, .. } | AttributeOp::Live { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionOp {
    pub helper: BlockHelper,
    pub expr: Expression,
    pub body: BlockId,
    pub otherwise: Option<BlockId>,
}

/// Compiled template. Plain data: `Send + Sync`, shareable through the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    blocks: Vec<Vec<Instruction>>,
}

impl Program {
    pub const ROOT: BlockId = 0;

    /// Parse and compile. Pure: a parse error leaves nothing behind.
    pub fn compile(source: &str) -> Result<Program, TetherError> {
        let markup = template::parse(source)?;
        let mut compiler = Compiler::default();
        compiler.block(&markup);
        debug!(blocks = compiler.blocks.len(), "compiled template");
        Ok(Program {
            blocks: compiler.blocks,
        })
    }

    pub fn block(&self, id: BlockId) -> &[Instruction] {
        self.blocks.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[derive(Default)]
struct Compiler {
    blocks: Vec<Vec<Instruction>>,
}

impl Compiler {
    fn block(&mut self, nodes: &[Markup]) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Vec::new());
        let instructions = nodes.iter().map(|node| self.instruction(node)).collect();
        self.blocks[id] = instructions;
        id
    }

    fn instruction(&mut self, node: &Markup) -> Instruction {
        match node {
            Markup::Text(text) => Instruction::Text(text.clone()),
            Markup::Mustache { expr, escaped } => Instruction::Bind {
                expr: expr.clone(),
                escaped: *escaped,
            },
            Markup::Section(section) => Instruction::Section(SectionOp {
                helper: section.helper,
                expr: section.expr.clone(),
                body: self.block(&section.body),
                otherwise: section.otherwise.as_deref().map(|nodes| self.block(nodes)),
            }),
            Markup::Element(element) => {
                let attributes = element
                    .attributes
                    .iter()
                    .map(|attr| match attr.value.as_deref() {
                        None => AttributeOp::Static {
                            name: attr.name.clone(),
                            value: None,
                        },
                        Some([]) => AttributeOp::Static {
                            name: attr.name.clone(),
                            value: Some(String::new()),
                        },
                        Some([Markup::Text(text)]) => AttributeOp::Static {
                            name: attr.name.clone(),
                            value: Some(text.clone()),
                        },
                        Some(value) => AttributeOp::Live {
                            name: attr.name.clone(),
                            block: self.block(value),
                        },
                    })
                    .collect();
                let attribute_block = (!element.attribute_markup.is_empty())
                    .then(|| self.block(&element.attribute_markup));
                let content = (!element.children.is_empty()).then(|| self.block(&element.children));
                Instruction::Element(ElementOp {
                    tag: element.tag.clone(),
                    attributes,
                    attribute_block,
                    content,
                })
            }
        }
    }
}

/// A compiled template bound to a registry.
#[derive(Clone, Debug)]
pub struct Renderer {
    env: Env,
}

impl Renderer {
    pub fn new(program: Arc<Program>, registry: Registry) -> Self {
        Self {
            env: Env::new(program, registry),
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        self.env.program()
    }

    pub fn render(&self, data: impl Into<Value>) -> Result<Node, TetherError> {
        self.render_scope(&Scope::new(data), &Scope::empty())
    }

    /// Render with a helper map consulted for names in helper position.
    pub fn render_with_helpers(
        &self,
        data: impl Into<Value>,
        helpers: impl Into<Value>,
    ) -> Result<Node, TetherError> {
        self.render_scope(&Scope::new(data), &Scope::new(helpers))
    }

    pub fn render_scope(&self, scope: &Scope, helpers: &Scope) -> Result<Node, TetherError> {
        render::render_fragment(&self.env, Program::ROOT, scope, helpers)
    }
}

/// Enclosed content of a custom element, handed to its tag hookup.
#[derive(Clone)]
pub struct SubRenderer {
    env: Env,
    block: BlockId,
}

impl SubRenderer {
    pub(crate) fn new(env: Env, block: BlockId) -> Self {
        Self { env, block }
    }

    pub fn render(&self, scope: &Scope, helpers: &Scope) -> Result<Node, TetherError> {
        render::render_fragment(&self.env, self.block, scope, helpers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_block_is_zero_and_blocks_nest() {
        let program =
            Program::compile("<ul>{{#each items}}<li>{{.}}</li>{{/each}}</ul>").unwrap();
        let root = program.block(Program::ROOT);
        let Instruction::Element(ul) = &root[0] else {
            panic!("expected <ul>");
        };
        let content = program.block(ul.content.unwrap());
        assert!(matches!(&content[0], Instruction::Section(s) if s.helper == BlockHelper::Each));
        assert_eq!(program.block_count(), 4);
    }

    #[test]
    fn plain_attribute_values_stay_static() {
        let program = Program::compile("<a href=\"/x\" title=\"{{t}}\" hidden></a>").unwrap();
        let Instruction::Element(a) = &program.block(0)[0] else {
            panic!("expected <a>");
        };
        assert_eq!(
            a.attributes[0],
            AttributeOp::Static {
                name: "href".into(),
                value: Some("/x".into())
            }
        );
        assert!(matches!(a.attributes[1], AttributeOp::Live { .. }));
        assert_eq!(a.attributes[2].name(), "hidden");
        assert_eq!(a.content, None);
    }

    #[test]
    fn compilation_is_deterministic() {
        let src = "<p>{{#if a}}{{b}}{{else}}c{{/if}}</p>";
        assert_eq!(Program::compile(src).unwrap(), Program::compile(src).unwrap());
    }

    #[test]
    fn program_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Program>();
    }
}
