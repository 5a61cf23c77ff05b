//! Batch Coordinator
//!
//! Collapses bursts of mutations into one ordered flush. Depth is explicit
//! state on the coordinator, so independent views can own separate ones;
//! [`Batch::current`] is the thread's default.

use crate::observable::Listener;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

thread_local! {
    static CURRENT: Batch = Batch::new();
}

struct Inner {
    depth: Cell<usize>,
    queue: RefCell<VecDeque<Vec<Rc<Listener>>>>,
    flushing: Cell<bool>,
    flushes: Cell<u64>,
}

#[derive(Clone)]
pub struct Batch(Rc<Inner>);

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self(Rc::new(Inner {
            depth: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            flushing: Cell::new(false),
            flushes: Cell::new(0),
        }))
    }

    /// The thread's default coordinator.
    pub fn current() -> Batch {
        CURRENT.with(Batch::clone)
    }

    pub fn start(&self) {
        self.0.depth.set(self.0.depth.get() + 1);
        debug!(depth = self.0.depth.get(), "batch start");
    }

    /// Decrement the depth; the queue flushes when it reaches zero.
    /// A stop without a matching start is ignored.
    pub fn stop(&self) {
        let depth = self.0.depth.get();
        if depth == 0 {
            warn!("batch stop without a matching start, ignored");
            return;
        }
        self.0.depth.set(depth - 1);
        debug!(depth = depth - 1, "batch stop");
        if depth == 1 {
            self.flush();
        }
    }

    /// Start a batch that stops when the guard drops.
    pub fn guard(&self) -> BatchGuard {
        self.start();
        BatchGuard(self.clone())
    }

    pub fn depth(&self) -> usize {
        self.0.depth.get()
    }

    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }

    /// Number of flush passes run so far.
    pub fn flush_count(&self) -> u64 {
        self.0.flushes.get()
    }

    /// Changes waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.0.queue.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Batch) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn enqueue(&self, listeners: Vec<Rc<Listener>>) {
        self.0.queue.borrow_mut().push_back(listeners);
        if self.depth() == 0 {
            self.flush();
        }
    }

    fn flush(&self) {
        // Changes made by listeners join the running pass as extra rounds.
        if self.0.flushing.get() {
            return;
        }
        self.0.flushing.set(true);
        let _reset = FlushReset(self);
        self.0.flushes.set(self.0.flushes.get() + 1);

        loop {
            let changes: Vec<_> = self.0.queue.borrow_mut().drain(..).collect();
            if changes.is_empty() {
                break;
            }
            let mut seen = HashSet::new();
            let listeners: Vec<Rc<Listener>> = changes
                .into_iter()
                .flatten()
                .filter(|l| seen.insert(l.id()))
                .collect();
            debug!(listeners = listeners.len(), "flushing batch");
            for listener in listeners {
                listener.fire();
            }
        }
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("depth", &self.depth())
            .field("pending", &self.pending())
            .field("flushes", &self.flush_count())
            .finish()
    }
}

struct FlushReset<'a>(&'a Batch);

impl Drop for FlushReset<'_> {
    fn drop(&mut self) {
        self.0 .0.flushing.set(false);
    }
}

/// RAII batch scope from [`Batch::guard`].
pub struct BatchGuard(Batch);

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}
