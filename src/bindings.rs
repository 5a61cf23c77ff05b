//! Built-in attribute bindings
//!
//! - `{($prop)}="key"`: two-way. The element's `prop` follows `key`, and a
//!   `change` event writes the element's current value back to the scope.
//! - `($event)="handler"`: calls the function stored at `handler` (read
//!   without auto-invocation) with the current context.

use crate::dom::Node;
use crate::error::TetherError;
use crate::registry::{Matcher, Registry, TagData};
use crate::render::LiveBinding;
use crate::scope::ReadOptions;
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static TWO_WAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\(\$?([\w-]+)\)\}$").expect("two-way pattern is valid"));

static EVENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\$?([\w-]+)\)$").expect("event pattern is valid"));

pub fn install(registry: &Registry) {
    registry.register_attribute(Matcher::Pattern(TWO_WAY.clone()), two_way);
    registry.register_attribute(Matcher::Pattern(EVENT.clone()), event);
}

fn captured(pattern: &Regex, data: &TagData) -> Option<(String, String)> {
    let name = data.attribute_name.as_deref()?;
    let prop = pattern.captures(name)?.get(1)?.as_str().to_string();
    Some((name.to_string(), prop))
}

fn two_way(element: &Node, data: &TagData) -> Result<(), TetherError> {
    let Some((attribute, prop)) = captured(&TWO_WAY, data) else {
        return Ok(());
    };
    let key = element.get_attribute(&attribute).unwrap_or_default();
    if key.is_empty() {
        return Err(TetherError::hookup(attribute, "two-way binding needs a key"));
    }

    let target = element.downgrade();
    let (scope, read_key, read_prop) = (data.scope.clone(), key.clone(), prop.clone());
    let binding = LiveBinding::new(format!("{attribute}={key}"), move || {
        let Some(element) = target.upgrade() else {
            return Ok(());
        };
        let text = scope.get(&read_key).to_text();
        element.set_attribute(&read_prop, &text);
        if read_prop == "value" {
            element.set_value(&text);
        }
        Ok(())
    });
    binding.run()?;
    if binding.is_live() {
        let held = binding.clone();
        element.on_detach(move |_| held.dispose());
    }

    let scope = data.scope.clone();
    element.add_event_listener("change", move |node| {
        let raw = if prop == "value" {
            node.value()
        } else {
            node.get_attribute(&prop).unwrap_or_default()
        };
        let value = match scope.get(&key) {
            Value::Number(_) => raw
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(raw)),
            Value::Bool(_) => Value::from(raw == "true" || raw == prop),
            _ => Value::from(raw),
        };
        if let Err(err) = scope.set(&key, value) {
            warn!(error = %err, "two-way binding could not write back");
        }
    });
    Ok(())
}

fn event(element: &Node, data: &TagData) -> Result<(), TetherError> {
    let Some((attribute, event)) = captured(&EVENT, data) else {
        return Ok(());
    };
    let handler = element.get_attribute(&attribute).unwrap_or_default();
    let scope = data.scope.clone();
    element.add_event_listener(&event, move |_| {
        match scope.get_with(&handler, ReadOptions::raw()) {
            Value::Func(func) => {
                func.call(&[scope.context().clone()]);
            }
            other => warn!(
                handler = %handler,
                found = other.type_name(),
                "event handler is not a function"
            ),
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_capture_the_property() {
        let caps = TWO_WAY.captures("{($value)}").unwrap();
        assert_eq!(&caps[1], "value");
        let caps = EVENT.captures("($click)").unwrap();
        assert_eq!(&caps[1], "click");
        assert!(EVENT.captures("{($value)}").is_none());
        assert!(TWO_WAY.captures("($value)").is_none());
    }
}
