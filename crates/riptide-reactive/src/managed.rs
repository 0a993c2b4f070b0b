#![forbid(unsafe_code)]

//! Dual-track resolution engine.
//!
//! [`Managed<T, E, D>`] generalizes the fetch controller: its compute
//! function may return an immediate value, a deferred future, or a staged
//! pair of both (a placeholder made visible synchronously, refined once the
//! future settles), and an [`update`](Managed::update) path funnels external
//! mutations through the same dispatch-order authority rules as automatic
//! recomputation.
//!
//! The return shapes are a tagged [`Output`] enum rather than a positional
//! value-or-pair convention, so a compute that legitimately resolves to a
//! 2-element collection is unambiguous.
//!
//! # Usage
//!
//! ```ignore
//! use riptide_reactive::{Managed, Output, Update};
//!
//! let prediction = Managed::new(
//!     move |_prev, _err| Output::staged(
//!         cached_estimate(input),           // visible immediately
//!         client.predict(input),            // refines it once settled
//!     ),
//!     (input,),
//!     Prediction::default(),
//! );
//!
//! // External mutation competing with recomputation on dispatch order:
//! prediction.set(Prediction::cleared());
//! ```
//!
//! # Invariants
//!
//! 1. Last-dispatched-wins across *all* dispatch sources: recomputation and
//!    `update` compete purely on dispatch order, never on settle order.
//! 2. An immediate (computed-track) transition is visible synchronously; an
//!    async-track transition is visible only once settled while still
//!    authoritative. A placeholder may precede its refinement; a refinement
//!    is never followed by its own placeholder.
//! 3. Transitions equal to the current state are suppressed (no version bump,
//!    no notification), preventing feedback loops in consuming views.
//! 4. A synchronously produced failure ([`Output::Failed`]) is committed the
//!    same way an async rejection is, so callers never special-case timing.
//!
//! # Failure Modes
//!
//! - Compute/update failure: committed into `error`, `value` untouched.
//! - Engine dropped with attempts in flight: attempts settle but commit
//!   nowhere.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tracing::{debug, trace};

use crate::deps::Deps;
use crate::latest::Latest;
use crate::state::{ResourceState, SettleFuture, Snapshot, SubscriberSet, Subscription};

type ComputeFn<T, E> = Rc<dyn Fn(&T, Option<&E>) -> Output<T, E>>;

// ---------------------------------------------------------------------------
// Output / Update shapes
// ---------------------------------------------------------------------------

/// What a compute (or applied update) produces.
pub enum Output<T, E> {
    /// An immediate value, committed synchronously.
    Ready(T),
    /// An immediate failure, committed synchronously. This is the normalized
    /// form of a compute that fails before producing any future.
    Failed(E),
    /// A future whose settled outcome is committed if still authoritative.
    Deferred(LocalBoxFuture<'static, Result<T, E>>),
    /// A placeholder committed synchronously, refined by the future's
    /// outcome once it settles while still authoritative.
    Staged {
        /// Immediately visible value.
        placeholder: T,
        /// Deferred refinement of the placeholder.
        refine: LocalBoxFuture<'static, Result<T, E>>,
    },
}

impl<T, E> Output<T, E> {
    /// Defer to `future`'s settled outcome.
    pub fn deferred(future: impl Future<Output = Result<T, E>> + 'static) -> Self {
        Self::Deferred(future.boxed_local())
    }

    /// Show `placeholder` now, refine with `future`'s outcome later.
    pub fn staged(placeholder: T, future: impl Future<Output = Result<T, E>> + 'static) -> Self {
        Self::Staged {
            placeholder,
            refine: future.boxed_local(),
        }
    }
}

impl<T: std::fmt::Debug, E: std::fmt::Debug> std::fmt::Debug for Output<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Staged { placeholder, .. } => f
                .debug_struct("Staged")
                .field("placeholder", placeholder)
                .finish_non_exhaustive(),
        }
    }
}

/// An external mutation fed to [`Managed::update`].
pub enum Update<T, E> {
    /// Commit a literal value.
    Set(T),
    /// Commit a future's settled outcome.
    Defer(LocalBoxFuture<'static, Result<T, E>>),
    /// Derive an [`Output`] from the current value and error. A failure
    /// produced here is committed as an error result, not propagated.
    Apply(Box<dyn FnOnce(&T, Option<&E>) -> Output<T, E>>),
}

impl<T, E> Update<T, E> {
    /// Commit a future's settled outcome.
    pub fn defer(future: impl Future<Output = Result<T, E>> + 'static) -> Self {
        Self::Defer(future.boxed_local())
    }

    /// Derive the next output from the current value and error.
    pub fn apply(f: impl FnOnce(&T, Option<&E>) -> Output<T, E> + 'static) -> Self {
        Self::Apply(Box::new(f))
    }
}

impl<T: std::fmt::Debug, E> std::fmt::Debug for Update<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Set(value) => f.debug_tuple("Set").field(value).finish(),
            Self::Defer(_) => f.write_str("Defer(..)"),
            Self::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// `Idle` or the ticket of the one attempt allowed to commit asynchronously.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending(u64),
}

struct ManagedInner<T, E, D> {
    compute: Latest<ComputeFn<T, E>>,
    deps: D,
    state: ResourceState<T, E>,
    phase: Phase,
    next_ticket: u64,
    subscribers: Rc<SubscriberSet<ResourceState<T, E>>>,
    version: u64,
}

impl<T, E, D> ManagedInner<T, E, D> {
    fn mint(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }
}

/// Dual-track resolution engine.
///
/// Cloning creates a new handle to the **same** engine. Must be created and
/// driven inside a `tokio::task::LocalSet` on a current-thread runtime.
pub struct Managed<T, E, D> {
    inner: Rc<RefCell<ManagedInner<T, E, D>>>,
}

impl<T, E, D> Clone for Managed<T, E, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E, D> std::fmt::Debug for Managed<T, E, D>
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Managed")
            .field("state", &inner.state)
            .field("phase", &inner.phase)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T, E, D> Managed<T, E, D>
where
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
    D: Deps,
{
    /// Create an engine and run the first computation immediately. The
    /// compute receives `default` as its previous value.
    pub fn new<C>(compute: C, deps: D, default: T) -> Self
    where
        C: Fn(&T, Option<&E>) -> Output<T, E> + 'static,
    {
        let erased: ComputeFn<T, E> = Rc::new(compute);
        let inner = Rc::new(RefCell::new(ManagedInner {
            compute: Latest::new(erased),
            deps,
            state: ResourceState::initial(default),
            phase: Phase::Idle,
            next_ticket: 0,
            subscribers: Rc::new(SubscriberSet::new()),
            version: 0,
        }));
        let this = Self { inner };
        let _first = this.recompute();
        this
    }

    /// Evaluate with a fresh compute and the current dependency vector,
    /// recomputing if `deps` changed element-wise.
    pub fn sync<C>(&self, compute: C, deps: D)
    where
        C: Fn(&T, Option<&E>) -> Output<T, E> + 'static,
    {
        let erased: ComputeFn<T, E> = Rc::new(compute);
        let changed = {
            let mut inner = self.inner.borrow_mut();
            inner.compute.set(erased);
            let changed = !deps.unchanged(&inner.deps);
            if changed {
                inner.deps = deps;
            }
            changed
        };
        if changed {
            let _pending = self.recompute();
        }
    }

    /// Force a recomputation regardless of the dependency vector.
    pub fn invalidate(&self) -> SettleFuture<T, E> {
        self.recompute()
    }

    /// Commit a literal value through the authority rules.
    pub fn set(&self, value: T) -> SettleFuture<T, E> {
        self.update(Update::Set(value))
    }

    /// Dispatch an external mutation. Competes with recomputation purely on
    /// dispatch order. The returned future resolves once the dispatched
    /// attempt settles — by committing, or by being superseded and discarded.
    pub fn update(&self, next: Update<T, E>) -> SettleFuture<T, E> {
        let output = match next {
            Update::Set(value) => Output::Ready(value),
            Update::Defer(future) => Output::Deferred(future),
            Update::Apply(derive) => {
                let (value, error) = {
                    let inner = self.inner.borrow();
                    (inner.state.value.clone(), inner.state.error.clone())
                };
                derive(&value, error.as_ref())
            }
        };
        self.apply(output)
    }

    // -- accessors ----------------------------------------------------------

    /// Clone of the live `{value, error, is_loading}` triple.
    #[must_use]
    pub fn state(&self) -> ResourceState<T, E> {
        self.inner.borrow().state.clone()
    }

    /// Latest committed value.
    #[must_use]
    pub fn value(&self) -> T {
        self.inner.borrow().state.value.clone()
    }

    /// Latest committed failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<E> {
        self.inner.borrow().state.error.clone()
    }

    /// Whether an async-track attempt is still pending.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.borrow().state.is_loading
    }

    /// Counter bumped once per committed value/error transition.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Subscribe to state transitions. Redundant transitions are suppressed.
    pub fn subscribe(&self, callback: impl Fn(&ResourceState<T, E>) + 'static) -> Subscription {
        self.inner.borrow().subscribers.subscribe(callback)
    }

    // -- internals ----------------------------------------------------------

    fn recompute(&self) -> SettleFuture<T, E> {
        let (compute, value, error) = {
            let inner = self.inner.borrow();
            (
                inner.compute.get(),
                inner.state.value.clone(),
                inner.state.error.clone(),
            )
        };
        // Invoked outside the borrow: the compute may read the engine.
        let output = compute(&value, error.as_ref());
        self.apply(output)
    }

    /// Dispatch one attempt. Minting the ticket and recording the phase (or
    /// committing, for immediate shapes) happen under a single borrow, so
    /// dispatch order is authority order.
    fn apply(&self, output: Output<T, E>) -> SettleFuture<T, E> {
        match output {
            Output::Ready(value) => self.commit_immediate(Ok(value)),
            Output::Failed(error) => self.commit_immediate(Err(error)),
            Output::Deferred(work) => self.dispatch_deferred(None, work),
            Output::Staged { placeholder, refine } => {
                self.dispatch_deferred(Some(placeholder), refine)
            }
        }
    }

    /// Computed-track commit: synchronous, unconditionally authoritative
    /// (the ticket is minted and retired under one borrow).
    fn commit_immediate(&self, outcome: Result<T, E>) -> SettleFuture<T, E> {
        let (snapshot, notification) = {
            let mut inner = self.inner.borrow_mut();
            let ticket = inner.mint();
            // Any older pending attempt is superseded from this instant.
            inner.phase = Phase::Idle;

            let previous = inner.state.clone();
            match outcome {
                Ok(value) => {
                    inner.state.value = value;
                    inner.state.error = None;
                }
                Err(error) => {
                    inner.state.error = Some(error);
                }
            }
            inner.state.is_loading = false;
            let changed = inner.state != previous;
            if changed {
                inner.version += 1;
            }
            trace!(ticket, changed, "committed immediate output");

            let snapshot = Snapshot {
                value: inner.state.value.clone(),
                error: inner.state.error.clone(),
            };
            let notification =
                changed.then(|| (Rc::clone(&inner.subscribers), inner.state.clone()));
            (snapshot, notification)
        };
        if let Some((subscribers, state)) = notification {
            subscribers.notify(&state);
        }
        futures::future::ready(snapshot).boxed_local().shared()
    }

    /// Async-track dispatch, with an optional computed-track placeholder
    /// made visible synchronously first.
    fn dispatch_deferred(
        &self,
        placeholder: Option<T>,
        work: LocalBoxFuture<'static, Result<T, E>>,
    ) -> SettleFuture<T, E> {
        let (handle, notification) = {
            let mut inner = self.inner.borrow_mut();
            let ticket = inner.mint();
            let previous = inner.state.clone();

            if let Some(placeholder) = placeholder {
                // Placeholder is a computed-track success commit.
                inner.state.value = placeholder;
                inner.state.error = None;
            }
            inner.state.is_loading = true;
            inner.phase = Phase::Pending(ticket);

            let committed_value =
                inner.state.value != previous.value || inner.state.error != previous.error;
            if committed_value {
                inner.version += 1;
            }
            trace!(
                ticket,
                placeholder_committed = committed_value,
                "dispatched deferred attempt"
            );

            let fallback = inner.state.value.clone();
            let weak = Rc::downgrade(&self.inner);
            let handle = async move {
                let outcome = work.await;
                match weak.upgrade() {
                    Some(cell) => settle(&cell, ticket, outcome),
                    None => Snapshot::from_outcome(outcome, fallback),
                }
            }
            .boxed_local()
            .shared();

            let notification = (inner.state != previous)
                .then(|| (Rc::clone(&inner.subscribers), inner.state.clone()));
            (handle, notification)
        };

        if let Some((subscribers, state)) = notification {
            subscribers.notify(&state);
        }

        // Drive the attempt even if no caller awaits the returned handle.
        let driver = handle.clone();
        tokio::task::spawn_local(async move {
            let _settled = driver.await;
        });
        handle
    }
}

/// Async-track settle: commit iff `ticket` is still the pending phase.
fn settle<T, E, D>(
    cell: &Rc<RefCell<ManagedInner<T, E, D>>>,
    ticket: u64,
    outcome: Result<T, E>,
) -> Snapshot<T, E>
where
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    let (snapshot, notification) = {
        let mut inner = cell.borrow_mut();
        if inner.phase != Phase::Pending(ticket) {
            trace!(ticket, "discarding stale settle");
            let current = inner.state.value.clone();
            return Snapshot::from_outcome(outcome, current);
        }

        let previous = inner.state.clone();
        match outcome {
            Ok(value) => {
                inner.state.value = value;
                inner.state.error = None;
            }
            Err(error) => {
                inner.state.error = Some(error);
            }
        }
        inner.state.is_loading = false;
        inner.phase = Phase::Idle;
        let changed = inner.state != previous;
        if changed {
            inner.version += 1;
        }
        debug!(
            ticket,
            ok = inner.state.error.is_none(),
            version = inner.version,
            "committed deferred attempt"
        );

        let snapshot = Snapshot {
            value: inner.state.value.clone(),
            error: inner.state.error.clone(),
        };
        let notification = changed.then(|| (Rc::clone(&inner.subscribers), inner.state.clone()));
        (snapshot, notification)
    };
    if let Some((subscribers, state)) = notification {
        subscribers.notify(&state);
    }
    snapshot
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
