//! `{{…}}` expressions
//!
//! Grammar: an operand (`path`, `"string"`, number, `true`/`false`/`null`)
//! or a call `helper arg… key=value…`.

use crate::observable::ObservableMap;
use crate::scope::{KeyPath, ReadOptions, Scope};
use crate::value::Value;
use std::fmt;
use tracing::warn;

/// Literal operand. Plain data so compiled programs stay `Send + Sync`.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
    Undefined,
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Str(s) => Value::from(s.as_str()),
            Literal::Number(n) => Value::Number(*n),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
            Literal::Undefined => Value::Undefined,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Lookup(KeyPath),
    Call {
        helper: KeyPath,
        args: Vec<Expression>,
        hash: Vec<(String, Expression)>,
    },
}

impl Expression {
    /// Name a section is closed with: the helper of a call, the path of a
    /// lookup.
    pub fn head(&self) -> String {
        match self {
            Expression::Literal(_) => String::new(),
            Expression::Lookup(path) => path.as_str().to_string(),
            Expression::Call { helper, .. } => helper.as_str().to_string(),
        }
    }

    /// Evaluate against a data scope and a helper scope.
    ///
    /// A bare name reads data first and falls back to a helper; a function
    /// found either way is called with no arguments. In call position the
    /// helper chain is consulted first.
    pub fn evaluate(&self, scope: &Scope, helpers: &Scope) -> Value {
        match self {
            Expression::Literal(literal) => literal.to_value(),
            Expression::Lookup(path) => match scope.read(path, ReadOptions::raw()) {
                Value::Func(func) => func.call(&[]),
                Value::Undefined if path.is_simple_name() => helpers
                    .helper(path.as_str())
                    .map(|func| func.call(&[]))
                    .unwrap_or_default(),
                value => value,
            },
            Expression::Call { helper, args, hash } => {
                let func = helper
                    .is_simple_name()
                    .then(|| helpers.helper(helper.as_str()))
                    .flatten()
                    .or_else(|| scope.read(helper, ReadOptions::raw()).as_func().cloned());
                let Some(func) = func else {
                    warn!(helper = %helper, "unknown helper");
                    return Value::Undefined;
                };

                let mut values: Vec<Value> =
                    args.iter().map(|arg| arg.evaluate(scope, helpers)).collect();
                if !hash.is_empty() {
                    let named = ObservableMap::new();
                    for (key, expr) in hash {
                        named.set(key, expr.evaluate(scope, helpers));
                    }
                    values.push(Value::Map(named));
                }
                func.call(&values)
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(Literal::Str(s)) => write!(f, "{s:?}"),
            Expression::Literal(Literal::Number(n)) => write!(f, "{n}"),
            Expression::Literal(Literal::Bool(b)) => write!(f, "{b}"),
            Expression::Literal(Literal::Null) => write!(f, "null"),
            Expression::Literal(Literal::Undefined) => write!(f, "undefined"),
            Expression::Lookup(path) => write!(f, "{path}"),
            Expression::Call { helper, args, hash } => {
                write!(f, "{helper}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                for (key, value) in hash {
                    write!(f, " {key}={value}")?;
                }
                Ok(())
            }
        }
    }
}

/// Parse the inside of a mustache.
pub fn parse(source: &str) -> Result<Expression, String> {
    let tokens = tokenize(source)?;
    let Some((head, rest)) = tokens.split_first() else {
        return Err("empty expression".to_string());
    };
    if rest.is_empty() {
        return operand(head);
    }

    let helper = match operand(head)? {
        Expression::Lookup(path) => path,
        _ => return Err(format!("'{head}' cannot be called")),
    };
    let mut args = Vec::new();
    let mut hash = Vec::new();
    for token in rest {
        match split_hash(token) {
            Some((key, value)) => hash.push((key.to_string(), operand(value)?)),
            None if hash.is_empty() => args.push(operand(token)?),
            None => return Err(format!("positional argument '{token}' after key=value")),
        }
    }
    Ok(Expression::Call { helper, args, hash })
}

fn operand(token: &str) -> Result<Expression, String> {
    if let Some(quote) = token.chars().next().filter(|c| *c == '"' || *c == '\'') {
        return match token[1..].strip_suffix(quote) {
            Some(inner) => Ok(Expression::Literal(Literal::Str(inner.to_string()))),
            None => Err(format!("unterminated string {token}")),
        };
    }
    let literal = match token {
        "true" => Some(Literal::Bool(true)),
        "false" => Some(Literal::Bool(false)),
        "null" => Some(Literal::Null),
        "undefined" => Some(Literal::Undefined),
        _ => None,
    };
    if let Some(literal) = literal {
        return Ok(Expression::Literal(literal));
    }
    if token.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        if let Ok(n) = token.parse::<f64>() {
            return Ok(Expression::Literal(Literal::Number(n)));
        }
    }
    if token.contains(['{', '}', '(', ')', '=']) {
        return Err(format!("invalid name '{token}'"));
    }
    Ok(Expression::Lookup(KeyPath::parse(token)))
}

/// `key=value` outside quotes.
fn split_hash(token: &str) -> Option<(&str, &str)> {
    if token.starts_with(['"', '\'']) {
        return None;
    }
    let (key, value) = token.split_once('=')?;
    (!key.is_empty() && !value.is_empty()).then_some((key, value))
}

/// Whitespace-separated tokens; quoted strings stay whole.
fn tokenize(source: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in source.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
                current.push(ch);
            }
        }
    }
    if quote.is_some() {
        return Err("unterminated string".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}
