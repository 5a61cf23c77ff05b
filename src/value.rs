//! Data values flowing through scopes

use crate::observable::{ObservableList, ObservableMap};
use crate::pending::{Deferred, PendingSource, PendingState};
use std::fmt;
use std::rc::Rc;

/// Callable stored in data or helper scopes.
#[derive(Clone)]
pub struct Func(Rc<dyn Fn(&[Value]) -> Value>);

impl Func {
    pub fn new(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Func) -> bool {
        Rc::as_ptr(&self.0) as *const () == Rc::as_ptr(&other.0) as *const ()
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

#[derive(Clone, Default)]
pub enum Value {
    /// Defined-but-empty: what a path that resolves nowhere reads as.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Map(ObservableMap),
    List(ObservableList),
    Func(Func),
    Pending(PendingSource),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Map(_) => "map",
            Value::List(_) => "list",
            Value::Func(_) => "function",
            Value::Pending(_) => "pending",
        }
    }

    /// Follow a resolved pending source to its value. Unsettled and
    /// rejected sources come back as themselves.
    pub fn settled(&self) -> Value {
        match self {
            Value::Pending(source) => match source.state() {
                PendingState::Resolved(value) => value.settled(),
                _ => self.clone(),
            },
            other => other.clone(),
        }
    }

    /// Pending or rejected source.
    pub fn is_unsettled(&self) -> bool {
        matches!(self.settled(), Value::Pending(_))
    }

    pub fn truthy(&self) -> bool {
        match self.settled() {
            Value::Undefined | Value::Null | Value::Pending(_) => false,
            Value::Bool(b) => b,
            Value::Number(n) => n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(list) => !list.is_empty(),
            Value::Map(_) | Value::Func(_) => true,
        }
    }

    /// Text written into the DOM for this value.
    pub fn to_text(&self) -> String {
        match self.settled() {
            Value::Undefined | Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_text(n),
            Value::String(s) => s.to_string(),
            Value::List(list) => list
                .items()
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) | Value::Func(_) | Value::Pending(_) => String::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ObservableMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservableList> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Func> {
        match self {
            Value::Func(func) => Some(func),
            _ => None,
        }
    }

    pub fn as_pending(&self) -> Option<&PendingSource> {
        match self {
            Value::Pending(source) => Some(source),
            _ => None,
        }
    }

    /// Snapshot as JSON. Functions and unsettled sources become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self.settled() {
            Value::Undefined | Value::Null | Value::Func(_) | Value::Pending(_) => Json::Null,
            Value::Bool(b) => Json::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.to_string()),
            Value::List(list) => Json::Array(list.items().iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn number_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        n.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            (Value::Pending(a), Value::Pending(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", number_text(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Map(map) => map.fmt(f),
            Value::List(list) => list.fmt(f),
            Value::Func(func) => func.fmt(f),
            Value::Pending(source) => source.fmt(f),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<ObservableMap> for Value {
    fn from(map: ObservableMap) -> Self {
        Value::Map(map)
    }
}

impl From<ObservableList> for Value {
    fn from(list: ObservableList) -> Self {
        Value::List(list)
    }
}

impl From<Func> for Value {
    fn from(func: Func) -> Self {
        Value::Func(func)
    }
}

impl From<PendingSource> for Value {
    fn from(source: PendingSource) -> Self {
        Value::Pending(source)
    }
}

impl From<&Deferred> for Value {
    fn from(deferred: &Deferred) -> Self {
        Value::Pending(deferred.source())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Objects become observable maps and arrays observable lists, recursively.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_numbers_print_without_fraction() {
        assert_eq!(Value::from(3).to_text(), "3");
        assert_eq!(Value::from(2.5).to_text(), "2.5");
        assert_eq!(Value::from(-0.0).to_text(), "0");
    }

    #[test]
    fn empty_like_values_print_nothing() {
        assert_eq!(Value::Undefined.to_text(), "");
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::Map(ObservableMap::new()).to_text(), "");
        assert_eq!(Value::from(Func::new(|_| Value::Null)).to_text(), "");
    }

    #[test]
    fn truthiness_follows_template_rules() {
        assert!(!Value::from("").truthy());
        assert!(!Value::from(0).truthy());
        assert!(!Value::List(ObservableList::new()).truthy());
        assert!(Value::Map(ObservableMap::new()).truthy());
        assert!(Value::from("x").truthy());
        assert!(!Value::from(f64::NAN).truthy());
    }

    #[test]
    fn json_converts_deeply() {
        let value = Value::from(json!({"user": {"name": "Ada"}, "tags": ["a", "b"]}));
        let map = value.as_map().cloned().unwrap();
        let user = map.get("user");
        assert_eq!(user.as_map().unwrap().get("name"), Value::from("Ada"));
        assert_eq!(map.get("tags").to_text(), "a,b");
        assert_eq!(value.to_json(), json!({"user": {"name": "Ada"}, "tags": ["a", "b"]}));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = ObservableMap::new();
        let b = ObservableMap::new();
        assert_eq!(Value::Map(a.clone()), Value::Map(a));
        assert_ne!(Value::Map(b), Value::Map(ObservableMap::new()));
        assert_eq!(Value::from("x"), Value::from("x".to_string()));
    }

    #[test]
    fn settled_follows_resolved_sources() {
        let deferred = Deferred::new();
        let value = Value::from(&deferred);
        assert!(value.is_unsettled());
        assert_eq!(value.to_text(), "");
        deferred.resolve("done");
        assert_eq!(value.settled(), Value::from("done"));
        assert_eq!(value.to_text(), "done");
    }
}
