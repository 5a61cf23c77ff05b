//! Async Resolution Layer
//!
//! A [`PendingSource`] settles exactly once, to a value or a [`Rejection`].
//! It is awaitable, and it is observable: bindings that read an unsettled
//! source show a placeholder and refresh when it settles.

use crate::batch::Batch;
use crate::error::TetherError;
use crate::observable::{self, record, Dependency, ObservableMap, Observed, Subscribers};
use crate::value::Value;
use futures::stream::{FuturesUnordered, StreamExt};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::debug;

/// Why a source rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    message: String,
}

impl Rejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&str> for Rejection {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Rejection {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<Rejection> for TetherError {
    fn from(rejection: Rejection) -> Self {
        TetherError::Resolution {
            message: rejection.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PendingState {
    Pending,
    Resolved(Value),
    Rejected(Rejection),
}

pub(crate) struct Inner {
    state: RefCell<PendingState>,
    wakers: RefCell<Vec<Waker>>,
    subscribers: Subscribers,
    batch: Batch,
}

impl Observed for Inner {
    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

/// Read side of an async value.
#[derive(Clone)]
pub struct PendingSource(Rc<Inner>);

impl PendingSource {
    fn with_state(state: PendingState, batch: &Batch) -> Self {
        Self(Rc::new(Inner {
            state: RefCell::new(state),
            wakers: RefCell::new(Vec::new()),
            subscribers: Subscribers::default(),
            batch: batch.clone(),
        }))
    }

    /// A source that is already resolved.
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self::with_state(PendingState::Resolved(value.into()), &Batch::current())
    }

    /// A source that is already rejected.
    pub fn rejected(rejection: impl Into<Rejection>) -> Self {
        Self::with_state(PendingState::Rejected(rejection.into()), &Batch::current())
    }

    pub fn state(&self) -> PendingState {
        record(|| Dependency::new(self.0.clone(), None));
        self.0.state.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.0.state.borrow(), PendingState::Pending)
    }

    pub fn listener_count(&self) -> usize {
        self.0.subscribers.len()
    }

    pub fn ptr_eq(&self, other: &PendingSource) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn settle(&self, outcome: PendingState) -> bool {
        {
            let mut state = self.0.state.borrow_mut();
            if !matches!(*state, PendingState::Pending) {
                debug!("source already settled, ignoring");
                return false;
            }
            *state = outcome;
        }
        for waker in self.0.wakers.borrow_mut().drain(..) {
            waker.wake();
        }
        self.0.subscribers.notify(&self.0.batch, None);
        true
    }
}

impl Future for PendingSource {
    type Output = Result<Value, Rejection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &*self.0.state.borrow() {
            PendingState::Resolved(value) => return Poll::Ready(Ok(value.clone())),
            PendingState::Rejected(rejection) => return Poll::Ready(Err(rejection.clone())),
            PendingState::Pending => {}
        }
        let mut wakers = self.0.wakers.borrow_mut();
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl fmt::Debug for PendingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0.state.borrow() {
            PendingState::Pending => write!(f, "Pending"),
            PendingState::Resolved(value) => write!(f, "Resolved({value:?})"),
            PendingState::Rejected(rejection) => write!(f, "Rejected({:?})", rejection.message),
        }
    }
}

/// Write side of a [`PendingSource`].
pub struct Deferred {
    source: PendingSource,
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl Deferred {
    pub fn new() -> Self {
        Self::with_batch(&Batch::current())
    }

    pub fn with_batch(batch: &Batch) -> Self {
        Self {
            source: PendingSource::with_state(PendingState::Pending, batch),
        }
    }

    pub fn source(&self) -> PendingSource {
        self.source.clone()
    }

    /// Returns `false` if the source had already settled.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.source.settle(PendingState::Resolved(value.into()))
    }

    /// Returns `false` if the source had already settled.
    pub fn reject(&self, rejection: impl Into<Rejection>) -> bool {
        self.source.settle(PendingState::Rejected(rejection.into()))
    }
}

/// Wait for every source. The first rejection to arrive wins and the rest
/// are no longer awaited.
pub async fn settle_all(sources: Vec<PendingSource>) -> Result<Vec<Value>, Rejection> {
    let mut results: Vec<Option<Value>> = vec![None; sources.len()];
    let mut waiting: FuturesUnordered<_> = sources
        .into_iter()
        .enumerate()
        .map(|(i, source)| async move { (i, source.await) })
        .collect();

    while let Some((i, outcome)) = waiting.next().await {
        results[i] = Some(outcome?);
    }
    Ok(results
        .into_iter()
        .map(|v| v.unwrap_or_default())
        .collect())
}

/// Settle the data handed to an async render.
///
/// A pending root is awaited; when it resolves to a map, that map's pending
/// properties are settled too. A map holding pending properties yields a
/// shallow copy with the settled values substituted; the caller's map is
/// never written to. Anything else passes through.
pub async fn resolve_context(data: Value) -> Result<Value, TetherError> {
    match data {
        Value::Pending(source) => match source.await? {
            Value::Map(map) => settle_properties(map).await,
            other => Ok(other),
        },
        Value::Map(map) => settle_properties(map).await,
        other => Ok(other),
    }
}

async fn settle_properties(map: ObservableMap) -> Result<Value, TetherError> {
    let entries = observable::untracked(|| map.entries());
    let pending: Vec<(usize, PendingSource)> = entries
        .iter()
        .enumerate()
        .filter_map(|(i, (_, v))| v.as_pending().map(|s| (i, s.clone())))
        .collect();
    if pending.is_empty() {
        return Ok(Value::Map(map));
    }
    debug!(sources = pending.len(), "waiting on pending properties");

    let (slots, sources): (Vec<usize>, Vec<PendingSource>) = pending.into_iter().unzip();
    let settled = settle_all(sources).await?;

    let mut entries = entries;
    for (slot, value) in slots.into_iter().zip(settled) {
        entries[slot].1 = value;
    }
    let copy = ObservableMap::with_batch(&map.batch());
    for (key, value) in entries {
        copy.set(&key, value);
    }
    Ok(Value::Map(copy))
}
