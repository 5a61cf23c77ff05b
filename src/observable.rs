//! Observable containers and dependency capture
//!
//! Reads made while a capture frame is open are recorded as dependencies.
//! Live bindings capture one evaluation, then subscribe to exactly what it
//! read. Writes notify subscribers through the container's [`Batch`].

use crate::batch::Batch;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
    static CAPTURES: RefCell<Vec<Vec<Dependency>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn next_id() -> u64 {
    NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

// ═══════════════════════════════════════════════════════════════
// Listeners and subscriptions
// ═══════════════════════════════════════════════════════════════

/// Callback run when a subscribed dependency changes.
pub struct Listener {
    id: u64,
    callback: Box<dyn Fn()>,
    active: Cell<bool>,
}

impl Listener {
    pub fn new(callback: impl Fn() + 'static) -> Rc<Self> {
        Rc::new(Self {
            id: next_id(),
            callback: Box::new(callback),
            active: Cell::new(true),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Queued notifications for an inactive listener are skipped at flush.
    pub fn deactivate(&self) {
        self.active.set(false);
    }

    pub(crate) fn fire(&self) {
        if self.active.get() {
            (self.callback)();
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("active", &self.active.get())
            .finish()
    }
}

struct Entry {
    key: Option<Rc<str>>,
    listener: Rc<Listener>,
}

/// Subscriber list shared by every observable kind.
///
/// A `None` key subscribes to every change; a `None` notification reaches
/// every subscriber.
#[derive(Default)]
pub(crate) struct Subscribers {
    entries: RefCell<Vec<Entry>>,
}

impl Subscribers {
    fn add(&self, key: Option<Rc<str>>, listener: Rc<Listener>) {
        self.entries.borrow_mut().push(Entry { key, listener });
    }

    fn remove(&self, listener_id: u64, key: &Option<Rc<str>>) {
        let mut entries = self.entries.borrow_mut();
        if let Some(pos) = entries
            .iter()
            .position(|e| e.listener.id == listener_id && &e.key == key)
        {
            entries.remove(pos);
        }
    }

    fn matching(&self, key: Option<&str>) -> Vec<Rc<Listener>> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| match (&e.key, key) {
                (Some(wanted), Some(changed)) => &**wanted == changed,
                _ => true,
            })
            .map(|e| e.listener.clone())
            .collect()
    }

    pub(crate) fn notify(&self, batch: &Batch, key: Option<&str>) {
        let listeners = self.matching(key);
        if !listeners.is_empty() {
            batch.enqueue(listeners);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// Anything a live binding can depend on.
pub(crate) trait Observed {
    fn subscribers(&self) -> &Subscribers;
}

/// One recorded read: a source plus the key that was read (`None` for
/// whole-container reads).
#[derive(Clone)]
pub struct Dependency {
    source: Rc<dyn Observed>,
    key: Option<Rc<str>>,
}

impl Dependency {
    pub(crate) fn new(source: Rc<dyn Observed>, key: Option<&str>) -> Self {
        Self {
            source,
            key: key.map(Rc::from),
        }
    }

    fn same(&self, other: &Dependency) -> bool {
        source_addr(&self.source) == source_addr(&other.source) && self.key == other.key
    }

    pub fn subscribe(&self, listener: &Rc<Listener>) -> Subscription {
        self.source
            .subscribers()
            .add(self.key.clone(), listener.clone());
        Subscription {
            source: Rc::downgrade(&self.source),
            key: self.key.clone(),
            listener_id: listener.id,
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("source", &source_addr(&self.source))
            .field("key", &self.key)
            .finish()
    }
}

fn source_addr(source: &Rc<dyn Observed>) -> *const () {
    Rc::as_ptr(source) as *const ()
}

/// Unsubscribes on drop.
pub struct Subscription {
    source: Weak<dyn Observed>,
    key: Option<Rc<str>>,
    listener_id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.subscribers().remove(self.listener_id, &self.key);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("listener", &self.listener_id)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
// Dependency capture
// ═══════════════════════════════════════════════════════════════

struct Frame;

impl Drop for Frame {
    fn drop(&mut self) {
        CAPTURES.with(|c| c.borrow_mut().pop());
    }
}

/// Run `f` and return every observable read it made, deduplicated.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Dependency>) {
    CAPTURES.with(|c| c.borrow_mut().push(Vec::new()));
    let frame = Frame;
    let result = f();
    let recorded = CAPTURES.with(|c| {
        c.borrow_mut()
            .last_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    });
    drop(frame);

    let mut deps: Vec<Dependency> = Vec::with_capacity(recorded.len());
    for dep in recorded {
        if !deps.iter().any(|d| d.same(&dep)) {
            deps.push(dep);
        }
    }
    (result, deps)
}

/// Run `f` without recording its reads into the enclosing capture.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    capture(f).0
}

pub(crate) fn is_capturing() -> bool {
    CAPTURES.with(|c| !c.borrow().is_empty())
}

pub(crate) fn record(make: impl FnOnce() -> Dependency) {
    if !is_capturing() {
        return;
    }
    let dep = make();
    CAPTURES.with(|c| {
        if let Some(frame) = c.borrow_mut().last_mut() {
            frame.push(dep);
        }
    });
}

// ═══════════════════════════════════════════════════════════════
// ObservableMap
// ═══════════════════════════════════════════════════════════════

pub(crate) struct MapInner {
    entries: RefCell<Vec<(Rc<str>, Value)>>,
    subscribers: Subscribers,
    batch: Batch,
}

impl Observed for MapInner {
    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

/// String-keyed observable object. Keys keep insertion order.
#[derive(Clone)]
pub struct ObservableMap(Rc<MapInner>);

impl Default for ObservableMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableMap {
    pub fn new() -> Self {
        Self::with_batch(&Batch::current())
    }

    pub fn with_batch(batch: &Batch) -> Self {
        Self(Rc::new(MapInner {
            entries: RefCell::new(Vec::new()),
            subscribers: Subscribers::default(),
            batch: batch.clone(),
        }))
    }

    fn track(&self, key: Option<&str>) {
        record(|| Dependency::new(self.0.clone(), key));
    }

    /// Value under `key`, `None` when the key is absent.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.track(Some(key));
        self.0
            .entries
            .borrow()
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn get(&self, key: &str) -> Value {
        self.lookup(key).unwrap_or(Value::Undefined)
    }

    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Write `value` under `key`; subscribers of the key are notified when
    /// the stored value changes.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let changed = {
            let mut entries = self.0.entries.borrow_mut();
            match entries.iter_mut().find(|(k, _)| &**k == key) {
                Some((_, slot)) if *slot == value => false,
                Some((_, slot)) => {
                    *slot = value;
                    true
                }
                None => {
                    entries.push((Rc::from(key), value));
                    true
                }
            }
        };
        if changed {
            self.0.subscribers.notify(&self.0.batch, Some(key));
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = {
            let mut entries = self.0.entries.borrow_mut();
            entries
                .iter()
                .position(|(k, _)| &**k == key)
                .map(|pos| entries.remove(pos).1)
        };
        if removed.is_some() {
            self.0.subscribers.notify(&self.0.batch, Some(key));
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.track(None);
        self.0
            .entries
            .borrow()
            .iter()
            .map(|(k, _)| k.to_string())
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.track(None);
        self.0
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.track(None);
        self.0.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch(&self) -> Batch {
        self.0.batch.clone()
    }

    /// Number of live subscriptions on this map.
    pub fn listener_count(&self) -> usize {
        self.0.subscribers.len()
    }

    pub fn ptr_eq(&self, other: &ObservableMap) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for ObservableMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = ObservableMap::new();
        for (k, v) in iter {
            map.set(k.as_ref(), v);
        }
        map
    }
}

impl fmt::Debug for ObservableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.entries.borrow().iter().map(|(k, v)| (k.clone(), v.clone())))
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
// ObservableList
// ═══════════════════════════════════════════════════════════════

pub(crate) struct ListInner {
    items: RefCell<Vec<Value>>,
    subscribers: Subscribers,
    batch: Batch,
}

impl Observed for ListInner {
    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

/// Observable sequence. Every mutation is a whole-list change.
#[derive(Clone)]
pub struct ObservableList(Rc<ListInner>);

impl Default for ObservableList {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableList {
    pub fn new() -> Self {
        Self::with_batch(&Batch::current())
    }

    pub fn with_batch(batch: &Batch) -> Self {
        Self(Rc::new(ListInner {
            items: RefCell::new(Vec::new()),
            subscribers: Subscribers::default(),
            batch: batch.clone(),
        }))
    }

    fn track(&self) {
        record(|| Dependency::new(self.0.clone(), None));
    }

    fn changed(&self) {
        self.0.subscribers.notify(&self.0.batch, None);
    }

    pub fn get(&self, index: usize) -> Value {
        self.track();
        self.0
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    pub fn len(&self) -> usize {
        self.track();
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> Vec<Value> {
        self.track();
        self.0.items.borrow().clone()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.items.borrow_mut().push(value.into());
        self.changed();
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.0.items.borrow_mut().pop();
        if popped.is_some() {
            self.changed();
        }
        popped
    }

    /// Insert at `index`, clamped to the list length.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        {
            let mut items = self.0.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, value.into());
        }
        self.changed();
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            (index < items.len()).then(|| items.remove(index))
        };
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    /// Overwrite `index`; `index == len` appends. Returns `false`, leaving
    /// the list untouched, for an index past the end.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        {
            let mut items = self.0.items.borrow_mut();
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = value.into(),
                std::cmp::Ordering::Equal => items.push(value.into()),
                std::cmp::Ordering::Greater => return false,
            }
        }
        self.changed();
        true
    }

    pub fn replace(&self, values: impl IntoIterator<Item = Value>) {
        *self.0.items.borrow_mut() = values.into_iter().collect();
        self.changed();
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    pub fn batch(&self) -> Batch {
        self.0.batch.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.0.subscribers.len()
    }

    pub fn ptr_eq(&self, other: &ObservableList) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<V: Into<Value>> FromIterator<V> for ObservableList {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let list = ObservableList::new();
        list.0
            .items
            .borrow_mut()
            .extend(iter.into_iter().map(Into::into));
        list
    }
}

impl fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.items.borrow().iter()).finish()
    }
}
