//! Template parser
//!
//! Single pass over markup with embedded mustaches, producing a [`Markup`]
//! tree:
//! - Elements with quoted/unquoted attributes, void and self-closing tags
//! - Raw text inside `<script>` and `<style>`
//! - `{{expr}}`, `{{{expr}}}`/`{{& expr}}`, `{{#…}}`/`{{^…}}`/`{{else}}`/`{{/…}}`
//! - Mustaches in attribute values and in attribute position
//!
//! Nesting is strict: sections and elements close in the order they opened.

use crate::dom::{is_raw_text_element, is_void_element};
use crate::error::TetherError;
use crate::expression::{self, Expression};

/// Built-in block helpers, resolved at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHelper {
    If,
    Unless,
    Each,
    With,
    /// `{{#name}}`: iterate a list, push a truthy value.
    Section,
    /// `{{^name}}`: render when falsy.
    Inverse,
}

impl BlockHelper {
    fn builtin(name: &str) -> Option<BlockHelper> {
        match name {
            "if" => Some(BlockHelper::If),
            "unless" => Some(BlockHelper::Unless),
            "each" => Some(BlockHelper::Each),
            "with" => Some(BlockHelper::With),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    Text(String),
    Mustache { expr: Expression, escaped: bool },
    Section(Section),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub helper: BlockHelper,
    pub expr: Expression,
    pub body: Vec<Markup>,
    pub otherwise: Option<Vec<Markup>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<Attribute>,
    /// Mustaches in attribute position: `<img {{attrs}}>`.
    pub attribute_markup: Vec<Markup>,
    pub children: Vec<Markup>,
    pub self_closing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<Vec<Markup>>,
}

/// Parse template source into a markup tree.
pub fn parse(source: &str) -> Result<Vec<Markup>, TetherError> {
    let mut parser = Parser {
        src: source,
        pos: 0,
        end: source.len(),
        inline: false,
    };
    let (nodes, _) = parser.content(&Context::Document)?;
    Ok(nodes)
}

enum Context<'n> {
    Document,
    Element(&'n str),
    Section(&'n str),
}

enum Stop {
    Eof,
    CloseTag,
    CloseSection,
    Else,
}

enum Tag {
    Comment,
    Output {
        expr: Expression,
        escaped: bool,
    },
    Open {
        helper: BlockHelper,
        expr: Expression,
        name: String,
    },
    Close(String),
    Else,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    end: usize,
    /// Attribute text: `<` is literal.
    inline: bool,
}

impl<'a> Parser<'a> {
    fn err(&self, at: usize, message: impl Into<String>) -> TetherError {
        TetherError::parse_at(self.src, at, message)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..self.end]
    }

    fn sub(&self, start: usize, end: usize) -> Parser<'a> {
        Parser {
            src: self.src,
            pos: start,
            end,
            inline: true,
        }
    }

    fn content(&mut self, ctx: &Context<'_>) -> Result<(Vec<Markup>, Stop), TetherError> {
        let mut nodes = Vec::new();
        loop {
            if self.pos >= self.end {
                return match ctx {
                    Context::Document => Ok((nodes, Stop::Eof)),
                    Context::Element(tag) => Err(self.err(self.pos, format!("unclosed <{tag}>"))),
                    Context::Section(name) => {
                        Err(self.err(self.pos, format!("unclosed {{{{#{name}}}}}")))
                    }
                };
            }

            let rest = self.rest();
            if rest.starts_with("{{") {
                let at = self.pos;
                match self.mustache()? {
                    Tag::Comment => {}
                    Tag::Output { expr, escaped } => nodes.push(Markup::Mustache { expr, escaped }),
                    Tag::Open { helper, expr, name } => {
                        nodes.push(Markup::Section(self.section(helper, expr, &name)?))
                    }
                    Tag::Close(name) => {
                        return match ctx {
                            Context::Section(open) if *open == name => {
                                Ok((nodes, Stop::CloseSection))
                            }
                            Context::Section(open) => Err(self.err(
                                at,
                                format!("{{{{/{name}}}}} does not close {{{{#{open}}}}}"),
                            )),
                            _ => Err(self.err(at, format!("unexpected {{{{/{name}}}}}"))),
                        }
                    }
                    Tag::Else => {
                        return match ctx {
                            Context::Section(_) => Ok((nodes, Stop::Else)),
                            _ => Err(self.err(at, "{{else}} outside a section")),
                        }
                    }
                }
                continue;
            }

            if !self.inline {
                if rest.starts_with("<!--") {
                    let close = rest
                        .find("-->")
                        .ok_or_else(|| self.err(self.pos, "unclosed comment"))?;
                    self.pos += close + 3;
                    continue;
                }
                if rest.starts_with("</") {
                    let at = self.pos;
                    let name = self.close_tag()?;
                    return match ctx {
                        Context::Element(open) if *open == name => Ok((nodes, Stop::CloseTag)),
                        Context::Element(open) => {
                            Err(self.err(at, format!("</{name}> does not close <{open}>")))
                        }
                        Context::Section(open) => Err(self.err(
                            at,
                            format!("</{name}> inside unclosed {{{{#{open}}}}}"),
                        )),
                        Context::Document => Err(self.err(at, format!("unexpected </{name}>"))),
                    };
                }
                if starts_element(rest) {
                    nodes.push(Markup::Element(self.element()?));
                    continue;
                }
            }

            let text = self.text();
            match nodes.last_mut() {
                Some(Markup::Text(previous)) => previous.push_str(text),
                _ => nodes.push(Markup::Text(text.to_string())),
            }
        }
    }

    /// Text up to the next mustache or tag. Consumes at least one char.
    fn text(&mut self) -> &'a str {
        let rest = self.rest();
        let mut end = rest.len();
        for (i, _) in rest.char_indices().skip(1) {
            let tail = &rest[i..];
            if tail.starts_with("{{") || (!self.inline && tail.starts_with('<')) {
                end = i;
                break;
            }
        }
        self.pos += end;
        &rest[..end]
    }

    fn section(
        &mut self,
        helper: BlockHelper,
        expr: Expression,
        name: &str,
    ) -> Result<Section, TetherError> {
        let ctx = Context::Section(name);
        let (body, stop) = self.content(&ctx)?;
        let otherwise = match stop {
            Stop::Else => {
                let at = self.pos;
                let (otherwise, stop) = self.content(&ctx)?;
                if let Stop::Else = stop {
                    return Err(self.err(at, format!("second {{{{else}}}} in {{{{#{name}}}}}")));
                }
                Some(otherwise)
            }
            _ => None,
        };
        Ok(Section {
            helper,
            expr,
            body,
            otherwise,
        })
    }

    fn mustache(&mut self) -> Result<Tag, TetherError> {
        let start = self.pos;
        let rest = self.rest();

        if let Some(after) = rest.strip_prefix("{{{") {
            let close = after
                .find("}}}")
                .ok_or_else(|| self.err(start, "unclosed {{{"))?;
            self.pos += 3 + close + 3;
            let expr = expression::parse(&after[..close]).map_err(|m| self.err(start, m))?;
            return Ok(Tag::Output {
                expr,
                escaped: false,
            });
        }

        let after = &rest[2..];
        let close = after
            .find("}}")
            .ok_or_else(|| self.err(start, "unclosed {{"))?;
        let inner = after[..close].trim();
        self.pos += 2 + close + 2;

        let parse = |source: &str| expression::parse(source).map_err(|m| self.err(start, m));
        if inner.starts_with('!') {
            Ok(Tag::Comment)
        } else if let Some(body) = inner.strip_prefix('#') {
            self.open(start, parse(body)?, false)
        } else if let Some(body) = inner.strip_prefix('^') {
            self.open(start, parse(body)?, true)
        } else if let Some(name) = inner.strip_prefix('/') {
            Ok(Tag::Close(name.trim().to_string()))
        } else if inner == "else" {
            Ok(Tag::Else)
        } else if inner.starts_with('>') {
            Err(self.err(start, "partials are not supported"))
        } else if let Some(body) = inner.strip_prefix('&') {
            Ok(Tag::Output {
                expr: parse(body)?,
                escaped: false,
            })
        } else {
            Ok(Tag::Output {
                expr: parse(inner)?,
                escaped: true,
            })
        }
    }

    fn open(&self, at: usize, expr: Expression, inverse: bool) -> Result<Tag, TetherError> {
        let name = expr.head();
        if inverse {
            return Ok(Tag::Open {
                helper: BlockHelper::Inverse,
                expr,
                name,
            });
        }
        let Some(helper) = BlockHelper::builtin(&name) else {
            return Ok(Tag::Open {
                helper: BlockHelper::Section,
                expr,
                name,
            });
        };
        match expr {
            Expression::Call {
                mut args, hash, ..
            } if args.len() == 1 && hash.is_empty() => Ok(Tag::Open {
                helper,
                expr: args.remove(0),
                name,
            }),
            _ => Err(self.err(at, format!("{{{{#{name}}}}} takes exactly one argument"))),
        }
    }

    fn element(&mut self) -> Result<Element, TetherError> {
        let start = self.pos;
        self.pos += 1;
        let tag = self.tag_name().to_ascii_lowercase();

        let mut attributes = Vec::new();
        let mut attribute_markup = Vec::new();
        let self_closing = loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(self.err(start, format!("unclosed <{tag}")));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                break true;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break false;
            }
            if rest.starts_with("{{") {
                attribute_markup.extend(self.attribute_mustaches()?);
                continue;
            }
            attributes.push(self.attribute()?);
        };

        let children = if self_closing || is_void_element(&tag) {
            Vec::new()
        } else if is_raw_text_element(&tag) {
            self.raw_text(&tag, start)?
        } else {
            self.content(&Context::Element(&tag))?.0
        };

        Ok(Element {
            tag,
            attributes,
            attribute_markup,
            children,
            self_closing,
        })
    }

    fn attribute(&mut self) -> Result<Attribute, TetherError> {
        let start = self.pos;
        let rest = self.rest();
        let mut end = rest.len();
        for (i, ch) in rest.char_indices() {
            if ch.is_whitespace()
                || matches!(ch, '=' | '>' | '"' | '\'')
                || rest[i..].starts_with("/>")
            {
                end = i;
                break;
            }
        }
        if end == 0 {
            return Err(self.err(start, "expected an attribute name"));
        }
        let name = rest[..end].to_string();
        self.pos += end;

        self.skip_whitespace();
        if !self.rest().starts_with('=') {
            return Ok(Attribute { name, value: None });
        }
        self.pos += 1;
        self.skip_whitespace();

        let rest = self.rest();
        let (value_start, value_end, consumed) = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let close = find_quote(&rest[1..], quote)
                    .ok_or_else(|| self.err(start, format!("unterminated value for '{name}'")))?;
                (self.pos + 1, self.pos + 1 + close, close + 2)
            }
            _ => {
                let len = rest
                    .char_indices()
                    .find(|(i, ch)| ch.is_whitespace() || *ch == '>' || rest[*i..].starts_with("/>"))
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                (self.pos, self.pos + len, len)
            }
        };
        self.pos += consumed;

        let (value, _) = self.sub(value_start, value_end).content(&Context::Document)?;
        Ok(Attribute {
            name,
            value: Some(value),
        })
    }

    /// One mustache, or one section with its text, in attribute position.
    fn attribute_mustaches(&mut self) -> Result<Vec<Markup>, TetherError> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            let rest = self.rest();
            if rest.starts_with("{{") {
                match self.mustache()? {
                    Tag::Open { .. } => depth += 1,
                    Tag::Close(_) => depth = depth.saturating_sub(1),
                    _ => {}
                }
                if depth == 0 {
                    break;
                }
            } else if rest.is_empty() || rest.starts_with('>') {
                return Err(self.err(start, "unclosed section in a tag"));
            } else {
                self.pos += rest.chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }
        let (markup, _) = self.sub(start, self.pos).content(&Context::Document)?;
        Ok(markup)
    }

    fn raw_text(&mut self, tag: &str, open_at: usize) -> Result<Vec<Markup>, TetherError> {
        let rest = self.rest();
        let close = rest
            .to_ascii_lowercase()
            .find(&format!("</{tag}"))
            .ok_or_else(|| self.err(open_at, format!("unclosed <{tag}>")))?;
        let text = &rest[..close];
        self.pos += close;
        self.close_tag()?;
        Ok(if text.is_empty() {
            Vec::new()
        } else {
            vec![Markup::Text(text.to_string())]
        })
    }

    fn close_tag(&mut self) -> Result<String, TetherError> {
        let start = self.pos;
        self.pos += 2;
        let name = self.tag_name().to_ascii_lowercase();
        self.skip_whitespace();
        if !self.rest().starts_with('>') || name.is_empty() {
            return Err(self.err(start, "malformed closing tag"));
        }
        self.pos += 1;
        Ok(name)
    }

    fn tag_name(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '_' | '.')))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }
}

fn starts_element(rest: &str) -> bool {
    rest.strip_prefix('<')
        .and_then(|r| r.chars().next())
        .is_some_and(|c| c.is_ascii_alphabetic())
}

/// Closing quote, skipping over `{{…}}` spans.
fn find_quote(text: &str, quote: char) -> Option<usize> {
    let mut i = 0;
    while i < text.len() {
        let tail = &text[i..];
        if tail.starts_with("{{") {
            i += tail.find("}}").map(|c| c + 2)?;
            continue;
        }
        let ch = tail.chars().next()?;
        if ch == quote {
            return Some(i);
        }
        i += ch.len_utf8();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(markup: &Markup) -> &Element {
        match markup {
            Markup::Element(el) => el,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn parses_elements_text_and_mustaches() {
        let nodes = parse("<h1 class=title>{{message}}!</h1>").unwrap();
        let h1 = element(&nodes[0]);
        assert_eq!(h1.tag, "h1");
        assert_eq!(h1.attributes[0].name, "class");
        assert!(matches!(h1.children[0], Markup::Mustache { escaped: true, .. }));
        assert_eq!(h1.children[1], Markup::Text("!".into()));
    }

    #[test]
    fn sections_with_else() {
        let nodes = parse("{{#if ok}}yes{{else}}no{{/if}}").unwrap();
        match &nodes[0] {
            Markup::Section(section) => {
                assert_eq!(section.helper, BlockHelper::If);
                assert_eq!(section.body, vec![Markup::Text("yes".into())]);
                assert_eq!(section.otherwise, Some(vec![Markup::Text("no".into())]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn generic_and_inverse_sections() {
        let nodes = parse("{{#items}}x{{/items}}{{^items}}none{{/items}}").unwrap();
        assert!(matches!(&nodes[0], Markup::Section(s) if s.helper == BlockHelper::Section));
        assert!(matches!(&nodes[1], Markup::Section(s) if s.helper == BlockHelper::Inverse));
    }

    #[test]
    fn self_closing_and_void_tags_have_no_children() {
        let nodes = parse("<table><colgroup><col/><col span=2></colgroup></table>").unwrap();
        let colgroup = element(&element(&nodes[0]).children[0]);
        assert_eq!(colgroup.children.len(), 2);
        assert!(element(&colgroup.children[0]).self_closing);
    }

    #[test]
    fn attribute_position_sections() {
        let nodes = parse("<input {{#if on}}checked{{/if}} type=\"checkbox\">").unwrap();
        let input = element(&nodes[0]);
        assert_eq!(input.attribute_markup.len(), 1);
        assert_eq!(input.attributes[0].name, "type");
    }

    #[test]
    fn binding_attribute_names() {
        let nodes = parse("<input {($value)}=\"age\" ($click)='go'/>").unwrap();
        let input = element(&nodes[0]);
        assert_eq!(input.attributes[0].name, "{($value)}");
        assert_eq!(input.attributes[1].name, "($click)");
    }

    #[test]
    fn script_content_is_raw() {
        let nodes = parse("<script type=\"text/stache\"><b>{{x}}</b></script>").unwrap();
        let script = element(&nodes[0]);
        assert_eq!(script.children, vec![Markup::Text("<b>{{x}}</b>".into())]);
    }

    #[test]
    fn comments_are_dropped() {
        let nodes = parse("a{{! note }}b<!-- html -->c").unwrap();
        assert_eq!(nodes, vec![Markup::Text("abc".into())]);
    }

    #[test]
    fn mismatched_nesting_reports_position() {
        let err = parse("<div>\n{{#if a}}</div>{{/if}}").unwrap_err();
        assert!(matches!(err, TetherError::Parse { line: 2, .. }), "{err}");
        assert!(parse("{{#each}}x{{/each}}").is_err());
        assert!(parse("<p>").is_err());
        assert!(parse("{{/if}}").is_err());
        assert!(parse("{{> partial}}").is_err());
    }

    #[test]
    fn stray_angle_bracket_is_text() {
        let nodes = parse("1 < 2").unwrap();
        assert_eq!(nodes, vec![Markup::Text("1 < 2".into())]);
    }
}
