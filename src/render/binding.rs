use super::{render_string, Env};
use crate::compiler::BlockId;
use crate::dom::{Node, WeakNode};
use crate::error::TetherError;
use crate::expression::Expression;
use crate::observable::{capture, Listener, Subscription};
use crate::pending::PendingState;
use crate::scope::Scope;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, error, warn};

/// A computation kept in sync with the observables it read last time.
///
/// Each run happens under dependency capture and replaces the previous
/// subscriptions, so the binding always listens to exactly what its latest
/// evaluation touched. Node detach hooks own the binding; listeners only
/// hold it weakly.
pub(crate) struct LiveBinding {
    label: String,
    compute: Box<dyn Fn() -> Result<(), TetherError>>,
    listener: Rc<Listener>,
    subscriptions: RefCell<Vec<Subscription>>,
    disposed: Cell<bool>,
    running: Cell<bool>,
}

impl LiveBinding {
    pub(crate) fn new(
        label: impl Into<String>,
        compute: impl Fn() -> Result<(), TetherError> + 'static,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<LiveBinding>| {
            let this = this.clone();
            LiveBinding {
                label: label.into(),
                compute: Box::new(compute),
                listener: Listener::new(move || {
                    if let Some(binding) = this.upgrade() {
                        binding.refresh();
                    }
                }),
                subscriptions: RefCell::new(Vec::new()),
                disposed: Cell::new(false),
                running: Cell::new(false),
            }
        })
    }

    pub(crate) fn run(&self) -> Result<(), TetherError> {
        if self.disposed.get() || self.running.get() {
            return Ok(());
        }
        self.running.set(true);
        let (result, deps) = capture(|| (self.compute)());
        self.running.set(false);
        if self.disposed.get() {
            return result;
        }
        let fresh: Vec<Subscription> = deps.iter().map(|dep| dep.subscribe(&self.listener)).collect();
        drop(self.subscriptions.replace(fresh));
        result
    }

    /// Re-run from a notification; nobody is waiting for the error.
    pub(crate) fn refresh(&self) {
        if let Err(err) = self.run() {
            error!(binding = %self.label, error = %err, "live update failed");
        }
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.listener.deactivate();
        self.subscriptions.borrow_mut().clear();
        debug!(binding = %self.label, "binding torn down");
    }

    /// Whether the last run read anything observable.
    pub(crate) fn is_live(&self) -> bool {
        !self.subscriptions.borrow().is_empty()
    }
}

/// Keep a live binding for as long as `node` stays in the tree.
fn attach(binding: &Rc<LiveBinding>, node: &Node) {
    if !binding.is_live() {
        return;
    }
    let held = binding.clone();
    node.on_detach(move |_| held.dispose());
}

/// A form reset restores markup defaults; put the bound value back.
fn reassert_on_reset(binding: &Rc<LiveBinding>, control: &Node) {
    if !binding.is_live() {
        return;
    }
    let weak = Rc::downgrade(binding);
    control.add_event_listener("reset", move |_| {
        if let Some(binding) = weak.upgrade() {
            binding.refresh();
        }
    });
}

/// `{{expr}}` in content position: one text node.
pub(super) fn text(
    expr: &Expression,
    scope: &Scope,
    helpers: &Scope,
    parent: &Node,
) -> Result<Node, TetherError> {
    let node = Node::text("");
    parent.append_child(&node);

    let target = node.downgrade();
    let textarea = (parent.tag_name() == Some("textarea")).then(|| parent.downgrade());
    let (expr, scope, helpers) = (expr.clone(), scope.clone(), helpers.clone());
    let label = expr.to_string();
    let binding = LiveBinding::new(label, move || {
        let Some(node) = target.upgrade() else {
            return Ok(());
        };
        let value = expr.evaluate(&scope, &helpers);
        match value.settled().as_pending().map(|source| source.state()) {
            Some(PendingState::Rejected(reason)) => {
                warn!(expr = %expr, error = %reason, "pending source rejected, keeping placeholder");
            }
            Some(_) => debug!(expr = %expr, "pending source, writing placeholder"),
            None => {}
        }
        let text = value.to_text();
        if node.data() != text {
            node.set_data(&text);
        }
        if let Some(control) = textarea.as_ref().and_then(WeakNode::upgrade) {
            control.set_value(&control.text_content());
        }
        Ok(())
    });
    binding.run()?;

    attach(&binding, &node);
    if parent.tag_name() == Some("textarea") {
        reassert_on_reset(&binding, parent);
    }
    Ok(node)
}

/// `name="…{{expr}}…"`.
pub(super) fn attribute(
    env: &Env,
    block: BlockId,
    name: &str,
    element: &Node,
    scope: &Scope,
    helpers: &Scope,
) -> Result<(), TetherError> {
    let form_value = name == "value" && element.is_form_control();
    let target = element.downgrade();
    let (env, scope, helpers) = (env.clone(), scope.clone(), helpers.clone());
    let attr = name.to_string();
    let binding = LiveBinding::new(format!("{name}=…"), move || {
        let Some(element) = target.upgrade() else {
            return Ok(());
        };
        let text = render_string(&env, block, &scope, &helpers);
        element.set_attribute(&attr, &text);
        if form_value {
            element.set_value(&text);
        }
        Ok(())
    });
    binding.run()?;
    attach(&binding, element);
    if form_value {
        reassert_on_reset(&binding, element);
    }
    Ok(())
}

/// `<el {{…}}>`: the rendered string is a list of `name="value"` pairs;
/// pairs that disappear on a later run are removed.
pub(super) fn attribute_list(
    env: &Env,
    block: BlockId,
    element: &Node,
    scope: &Scope,
    helpers: &Scope,
) -> Result<(), TetherError> {
    let is_control = element.is_form_control();
    let target = element.downgrade();
    let (env, scope, helpers) = (env.clone(), scope.clone(), helpers.clone());
    let applied: RefCell<Vec<String>> = RefCell::new(Vec::new());
    let binding = LiveBinding::new("{{…}} attributes", move || {
        let Some(element) = target.upgrade() else {
            return Ok(());
        };
        let pairs = parse_pairs(&render_string(&env, block, &scope, &helpers));
        for stale in applied.borrow().iter() {
            if !pairs.iter().any(|(name, _)| name == stale) {
                element.remove_attribute(stale);
            }
        }
        for (name, value) in &pairs {
            element.set_attribute(name, value);
            if is_control && name == "value" {
                element.set_value(value);
            }
        }
        *applied.borrow_mut() = pairs.into_iter().map(|(name, _)| name).collect();
        Ok(())
    });
    binding.run()?;
    attach(&binding, element);
    if is_control {
        reassert_on_reset(&binding, element);
    }
    Ok(())
}

/// `a="1" b=2 c` → `[(a, 1), (b, 2), (c, "")]`. Values keep any `=`.
pub(crate) fn parse_pairs(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        rest = &rest[name_end..];

        let mut value = String::new();
        if let Some(after) = rest.trim_start().strip_prefix('=') {
            let after = after.trim_start();
            match after.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after[1..];
                    let end = body.find(quote).unwrap_or(body.len());
                    value = body[..end].to_string();
                    rest = body.get(end + 1..).unwrap_or("");
                }
                _ => {
                    let end = after.find(char::is_whitespace).unwrap_or(after.len());
                    value = after[..end].to_string();
                    rest = &after[end..];
                }
            }
        }
        if !name.is_empty() {
            pairs.push((name.to_string(), value));
        }
        rest = rest.trim_start();
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::ObservableMap;

    #[test]
    fn pairs_keep_equals_signs_in_values() {
        assert_eq!(
            parse_pairs("class=\"do=not=truncate=me\" checked  id=x"),
            vec![
                ("class".to_string(), "do=not=truncate=me".to_string()),
                ("checked".to_string(), String::new()),
                ("id".to_string(), "x".to_string()),
            ]
        );
        assert!(parse_pairs("   ").is_empty());
    }

    #[test]
    fn binding_follows_its_latest_reads() {
        let data = ObservableMap::new();
        data.set("flag", true);
        data.set("a", "A");
        data.set("b", "B");
        let seen = Rc::new(RefCell::new(String::new()));

        let (source, out) = (data.clone(), seen.clone());
        let binding = LiveBinding::new("test", move || {
            let key = if source.get("flag").truthy() { "a" } else { "b" };
            *out.borrow_mut() = source.get(key).to_text();
            Ok(())
        });
        binding.run().unwrap();
        assert_eq!(*seen.borrow(), "A");

        data.set("flag", false);
        assert_eq!(*seen.borrow(), "B");
        data.set("a", "ignored");
        assert_eq!(*seen.borrow(), "B");
        data.set("b", "B2");
        assert_eq!(*seen.borrow(), "B2");
    }

    #[test]
    fn dispose_drops_every_subscription() {
        let data = ObservableMap::new();
        let source = data.clone();
        let binding = LiveBinding::new("test", move || {
            source.get("x");
            Ok(())
        });
        binding.run().unwrap();
        assert_eq!(data.listener_count(), 1);
        binding.dispose();
        assert_eq!(data.listener_count(), 0);
    }
}
