#![forbid(unsafe_code)]

//! Deterministic producers and scheduling helpers for testing Riptide's
//! resource controllers.
//!
//! Tests of race behavior need producers whose settle *order* is chosen by
//! the test, not by timing. [`ManualProducer`] hands out one pending future
//! per invocation and lets the test resolve them by call index, in any
//! order. [`InstantProducer`] settles immediately and counts invocations,
//! for collapse and polling assertions.
//!
//! # Usage
//!
//! ```ignore
//! let producer = ManualProducer::<&str>::new();
//! let resource = Resource::new(producer.fetch(), (), ResourceConfig::new(""));
//!
//! producer.resolve_ok(0, "first");
//! drain().await;
//! assert_eq!(resource.value(), "first");
//! ```
//!
//! # Invariants
//!
//! 1. Call indices are assigned in invocation order, starting at 0.
//! 2. Resolving a call settles exactly that call's future; other pending
//!    calls are unaffected.
//! 3. A call can be resolved at most once.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;

/// Error type used by harness producers when a concrete error is needed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// A failure injected by the test.
    #[error("simulated failure: {0}")]
    Simulated(String),
}

impl HarnessError {
    /// Construct a simulated failure.
    pub fn simulated(message: impl Into<String>) -> Self {
        Self::Simulated(message.into())
    }
}

/// Let spawned local tasks run until pending settles are committed.
pub async fn drain() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// ManualProducer
// ---------------------------------------------------------------------------

/// A producer whose futures settle only when the test says so.
///
/// Each invocation registers a pending call and returns a future that
/// resolves once [`resolve`](Self::resolve) is called with that call's
/// index. Cloning shares the call table.
pub struct ManualProducer<T, E = HarnessError> {
    pending: Rc<RefCell<Vec<Option<oneshot::Sender<Result<T, E>>>>>>,
}

impl<T, E> Clone for ManualProducer<T, E> {
    fn clone(&self) -> Self {
        Self {
            pending: Rc::clone(&self.pending),
        }
    }
}

impl<T: 'static, E: 'static> std::fmt::Debug for ManualProducer<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualProducer")
            .field("calls", &self.pending.borrow().len())
            .field("unresolved", &self.unresolved())
            .finish()
    }
}

impl<T: 'static, E: 'static> Default for ManualProducer<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> ManualProducer<T, E> {
    /// Create a producer with no recorded calls.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Record one invocation and return its pending future.
    ///
    /// # Panics
    ///
    /// The returned future panics if its call is abandoned (the producer is
    /// dropped without resolving it); tests should resolve every call they
    /// await.
    pub fn produce(&self) -> LocalBoxFuture<'static, Result<T, E>> {
        let (tx, rx) = oneshot::channel();
        let index = {
            let mut pending = self.pending.borrow_mut();
            pending.push(Some(tx));
            pending.len() - 1
        };
        async move {
            rx.await
                .unwrap_or_else(|_| panic!("producer call {index} dropped unresolved"))
        }
        .boxed_local()
    }

    /// Closure form of [`produce`](Self::produce), handed directly to a
    /// controller.
    pub fn fetch(&self) -> impl Fn() -> LocalBoxFuture<'static, Result<T, E>> + 'static {
        let this = self.clone();
        move || this.produce()
    }

    /// Settle call `call` with `outcome`.
    ///
    /// # Panics
    ///
    /// Panics if `call` was never recorded or was already resolved.
    pub fn resolve(&self, call: usize, outcome: Result<T, E>) {
        let tx = self
            .pending
            .borrow_mut()
            .get_mut(call)
            .unwrap_or_else(|| panic!("no recorded call {call}"))
            .take()
            .unwrap_or_else(|| panic!("call {call} already resolved"));
        // A dropped receiver is fine: the attempt was abandoned wholesale.
        let _ = tx.send(outcome);
    }

    /// Settle call `call` successfully.
    pub fn resolve_ok(&self, call: usize, value: T) {
        self.resolve(call, Ok(value));
    }

    /// Settle call `call` with a failure.
    pub fn resolve_err(&self, call: usize, error: E) {
        self.resolve(call, Err(error));
    }

    /// Number of invocations recorded so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Number of calls not yet resolved.
    #[must_use]
    pub fn unresolved(&self) -> usize {
        self.pending
            .borrow()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

// ---------------------------------------------------------------------------
// InstantProducer
// ---------------------------------------------------------------------------

/// A producer that settles immediately with its current outcome and counts
/// invocations. Cloning shares the outcome cell and the counter.
pub struct InstantProducer<T, E = HarnessError> {
    outcome: Rc<RefCell<Result<T, E>>>,
    calls: Rc<Cell<usize>>,
}

impl<T, E> Clone for InstantProducer<T, E> {
    fn clone(&self) -> Self {
        Self {
            outcome: Rc::clone(&self.outcome),
            calls: Rc::clone(&self.calls),
        }
    }
}

impl<T: std::fmt::Debug, E: std::fmt::Debug> std::fmt::Debug for InstantProducer<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantProducer")
            .field("outcome", &*self.outcome.borrow())
            .field("calls", &self.calls.get())
            .finish()
    }
}

impl<T, E> InstantProducer<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Producer that always succeeds with `value` until told otherwise.
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self {
            outcome: Rc::new(RefCell::new(Ok(value))),
            calls: Rc::new(Cell::new(0)),
        }
    }

    /// Replace the outcome returned by subsequent invocations.
    pub fn set(&self, outcome: Result<T, E>) {
        *self.outcome.borrow_mut() = outcome;
    }

    /// Record one invocation and settle immediately.
    pub fn produce(&self) -> futures::future::Ready<Result<T, E>> {
        self.calls.set(self.calls.get() + 1);
        futures::future::ready(self.outcome.borrow().clone())
    }

    /// Closure form of [`produce`](Self::produce).
    pub fn fetch(&self) -> impl Fn() -> futures::future::Ready<Result<T, E>> + 'static {
        let this = self.clone();
        move || this.produce()
    }

    /// Number of invocations recorded so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
