#![forbid(unsafe_code)]

//! Single-flight fetch controller.
//!
//! [`Resource<T, E, D>`] binds a zero-argument asynchronous producer and a
//! dependency vector to a live [`ResourceState`], invoking the producer
//! automatically on construction and on dependency change, on demand via
//! [`reload()`](Resource::reload), and optionally on a fixed polling
//! interval. Overlapping attempts are serialized by dispatch order: the most
//! recently dispatched attempt is the only one allowed to commit, regardless
//! of the order in which attempts settle.
//!
//! # Usage
//!
//! ```ignore
//! use riptide_reactive::{Resource, ResourceConfig};
//!
//! // Inside a tokio LocalSet on a current-thread runtime:
//! let datasets = Resource::new(
//!     move || client.list_datasets(project_id),
//!     (project_id,),
//!     ResourceConfig::new(Vec::new()).update_interval(Duration::from_secs(30)),
//! );
//!
//! // On every re-evaluation of the owning view:
//! datasets.sync(move || client.list_datasets(project_id), (project_id,));
//!
//! let state = datasets.state(); // { value, error, is_loading }
//! ```
//!
//! # Invariants
//!
//! 1. Last-dispatched-wins: if attempt A is dispatched before attempt B and
//!    A settles after B, A's result never overwrites B's.
//! 2. Single-flight: while an attempt is pending, `reload()` returns a clone
//!    of its shared future without invoking the producer again.
//! 3. A committed failure sets `error` and leaves `value` untouched; a
//!    committed success overwrites `value` and clears `error`.
//! 4. `is_loading` is true from dispatch of the authoritative attempt until
//!    its commit; a superseded attempt's settle touches neither `is_loading`
//!    nor the flight slot.
//! 5. A dependency change supersedes any pending attempt; the polling timer
//!    and manual `reload()` never do.
//! 6. The authority check and the commit happen under one borrow, with no
//!    await point between them.
//!
//! # Failure Modes
//!
//! - Producer failure: captured into `error`; `reload()` resolves (it never
//!   rejects) with the failure in its [`Snapshot`].
//! - Hung producer: `is_loading` stays true indefinitely; timeouts are the
//!   producer's responsibility.
//! - Controller dropped while attempts are in flight: the attempts run to
//!   completion but commit nowhere, and the poll loop exits at its next tick.
//!
//! Superseded attempts are never aborted early; discard happens at commit
//! time only. Producers should therefore be idempotent with respect to being
//! superseded.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tracing::{debug, trace};

use crate::deps::Deps;
use crate::latest::Latest;
use crate::state::{ResourceState, SettleFuture, Snapshot, SubscriberSet, Subscription};

type ProducerFn<T, E> = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<T, E>>>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction options for a [`Resource`].
pub struct ResourceConfig<T> {
    default: T,
    update_interval: Option<Duration>,
    lazy: bool,
    on_reload: Option<Rc<dyn Fn()>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ResourceConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("default", &self.default)
            .field("update_interval", &self.update_interval)
            .field("lazy", &self.lazy)
            .field("on_reload", &self.on_reload.is_some())
            .finish()
    }
}

impl<T> ResourceConfig<T> {
    /// Start from a default value; no polling, eager first fetch.
    #[must_use]
    pub fn new(default: T) -> Self {
        Self {
            default,
            update_interval: None,
            lazy: false,
            on_reload: None,
        }
    }

    /// Reload on a fixed interval. The timer goes through the normal
    /// single-flight `reload()` path.
    #[must_use]
    pub fn update_interval(mut self, every: Duration) -> Self {
        self.update_interval = Some(every);
        self
    }

    /// Suppress the automatic first fetch. The dependency vector is still
    /// tracked, so the first *change* dispatches normally.
    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Side-effect callback fired synchronously whenever a reload cycle
    /// begins, before any new data arrives.
    #[must_use]
    pub fn on_reload(mut self, callback: impl Fn() + 'static) -> Self {
        self.on_reload = Some(Rc::new(callback));
        self
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// One pending attempt, or none. Replaces the separate in-flight flag and
/// authoritative-pointer slot so the two can never disagree.
enum Flight<T, E> {
    Idle,
    Pending {
        ticket: u64,
        handle: SettleFuture<T, E>,
    },
}

struct ResourceInner<T, E, D> {
    producer: Latest<ProducerFn<T, E>>,
    deps: D,
    state: ResourceState<T, E>,
    flight: Flight<T, E>,
    next_ticket: u64,
    poll_epoch: u64,
    on_reload: Option<Rc<dyn Fn()>>,
    subscribers: Rc<SubscriberSet<ResourceState<T, E>>>,
    version: u64,
}

impl<T, E, D> ResourceInner<T, E, D> {
    fn mint(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }
}

/// Single-flight fetch controller binding an async producer to a live state.
///
/// Cloning creates a new handle to the **same** controller. All handles must
/// stay on one thread; spawning happens via `tokio::task::spawn_local`, so a
/// controller must be created and driven inside a `tokio::task::LocalSet` on
/// a current-thread runtime.
pub struct Resource<T, E, D> {
    inner: Rc<RefCell<ResourceInner<T, E, D>>>,
}

impl<T, E, D> Clone for Resource<T, E, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E, D> std::fmt::Debug for Resource<T, E, D>
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Resource")
            .field("state", &inner.state)
            .field("pending", &matches!(inner.flight, Flight::Pending { .. }))
            .field("version", &inner.version)
            .finish()
    }
}

impl<T, E, D> Resource<T, E, D>
where
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
    D: Deps,
{
    /// Create a controller and, unless `config` is lazy, dispatch the first
    /// fetch immediately.
    pub fn new<F, Fut>(producer: F, deps: D, config: ResourceConfig<T>) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let erased: ProducerFn<T, E> = Rc::new(move || producer().boxed_local());
        let inner = Rc::new(RefCell::new(ResourceInner {
            producer: Latest::new(erased),
            deps,
            state: ResourceState::initial(config.default),
            flight: Flight::Idle,
            next_ticket: 0,
            poll_epoch: 0,
            on_reload: config.on_reload,
            subscribers: Rc::new(SubscriberSet::new()),
            version: 0,
        }));
        let this = Self { inner };
        if !config.lazy {
            let _first = this.dispatch(true);
        }
        if let Some(every) = config.update_interval {
            this.start_polling(every);
        }
        this
    }

    /// Evaluate with a fresh producer and the current dependency vector.
    ///
    /// The producer is mirrored so pending continuations and the poll loop
    /// always invoke the most recent one. If `deps` differs element-wise from
    /// the previous vector, a superseding fetch is dispatched.
    pub fn sync<F, Fut>(&self, producer: F, deps: D)
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let erased: ProducerFn<T, E> = Rc::new(move || producer().boxed_local());
        let changed = {
            let mut inner = self.inner.borrow_mut();
            inner.producer.set(erased);
            let changed = !deps.unchanged(&inner.deps);
            if changed {
                inner.deps = deps;
            }
            changed
        };
        if changed {
            let _pending = self.dispatch(true);
        }
    }

    /// Trigger a fetch, collapsing into the pending attempt if one exists.
    ///
    /// The returned future resolves to the attempt's [`Snapshot`]; producer
    /// failures are carried in the snapshot, never as a rejection.
    pub fn reload(&self) -> SettleFuture<T, E> {
        self.dispatch(false)
    }

    /// Force a superseding fetch regardless of the dependency vector, as if
    /// a dependency had changed.
    pub fn invalidate(&self) -> SettleFuture<T, E> {
        self.dispatch(true)
    }

    /// Replace the polling interval, restarting the timer; `None` stops
    /// polling.
    pub fn set_update_interval(&self, every: Option<Duration>) {
        match every {
            Some(every) => self.start_polling(every),
            None => {
                // Bumping the epoch makes the running loop exit at its next
                // tick.
                self.inner.borrow_mut().poll_epoch += 1;
            }
        }
    }

    // -- accessors ----------------------------------------------------------

    /// Clone of the live `{value, error, is_loading}` triple.
    #[must_use]
    pub fn state(&self) -> ResourceState<T, E> {
        self.inner.borrow().state.clone()
    }

    /// Latest committed value (or the default before any commit).
    #[must_use]
    pub fn value(&self) -> T {
        self.inner.borrow().state.value.clone()
    }

    /// Latest committed failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<E> {
        self.inner.borrow().state.error.clone()
    }

    /// Whether the authoritative attempt is still pending.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.borrow().state.is_loading
    }

    /// Counter bumped once per committed value/error transition.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Subscribe to state transitions. Redundant transitions (state equal to
    /// the previous one) are suppressed.
    pub fn subscribe(&self, callback: impl Fn(&ResourceState<T, E>) + 'static) -> Subscription {
        self.inner.borrow().subscribers.subscribe(callback)
    }

    // -- internals ----------------------------------------------------------

    /// Dispatch an attempt. `force` supersedes a pending attempt (dependency
    /// change); otherwise a pending attempt is shared (single-flight).
    fn dispatch(&self, force: bool) -> SettleFuture<T, E> {
        let (on_reload, subscribers, transition, handle) = {
            let mut inner = self.inner.borrow_mut();
            if !force {
                if let Flight::Pending { handle, .. } = &inner.flight {
                    trace!("collapsing reload into pending attempt");
                    return handle.clone();
                }
            }

            let ticket = inner.mint();
            let previous = inner.state.clone();
            inner.state.is_loading = true;

            let producer = inner.producer.get();
            let fallback = inner.state.value.clone();
            let weak = Rc::downgrade(&self.inner);
            let handle = async move {
                let outcome = producer().await;
                match weak.upgrade() {
                    Some(cell) => settle(&cell, ticket, outcome),
                    // Controller gone: the attempt is abandoned, only its own
                    // outcome remains observable to direct awaiters.
                    None => Snapshot::from_outcome(outcome, fallback),
                }
            }
            .boxed_local()
            .shared();

            inner.flight = Flight::Pending {
                ticket,
                handle: handle.clone(),
            };
            trace!(ticket, force, "dispatched fetch attempt");

            let transition = (inner.state != previous).then(|| inner.state.clone());
            (
                inner.on_reload.clone(),
                Rc::clone(&inner.subscribers),
                transition,
                handle,
            )
        };

        // Outside the borrow: callbacks may re-enter the controller.
        if let Some(callback) = on_reload {
            callback();
        }
        if let Some(state) = transition {
            subscribers.notify(&state);
        }

        // Drive the attempt even if no caller awaits the returned handle.
        let driver = handle.clone();
        tokio::task::spawn_local(async move {
            let _settled = driver.await;
        });
        handle
    }

    fn start_polling(&self, every: Duration) {
        let epoch = {
            let mut inner = self.inner.borrow_mut();
            inner.poll_epoch += 1;
            inner.poll_epoch
        };
        let weak = Rc::downgrade(&self.inner);
        tokio::task::spawn_local(async move {
            let start = tokio::time::Instant::now() + every;
            let mut interval = tokio::time::interval_at(start, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let controller = match weak.upgrade() {
                    Some(inner) => Resource { inner },
                    None => break,
                };
                if controller.inner.borrow().poll_epoch != epoch {
                    break;
                }
                let _pending = controller.reload();
            }
        });
    }
}

/// Commit `outcome` iff `ticket` is still the pending attempt; otherwise
/// discard it silently. Returns the snapshot the attempt resolves to.
fn settle<T, E, D>(
    cell: &Rc<RefCell<ResourceInner<T, E, D>>>,
    ticket: u64,
    outcome: Result<T, E>,
) -> Snapshot<T, E>
where
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    let (snapshot, notification) = {
        let mut inner = cell.borrow_mut();
        let authoritative =
            matches!(inner.flight, Flight::Pending { ticket: t, .. } if t == ticket);
        if !authoritative {
            // A newer attempt owns the flight slot and is_loading; this
            // settle is a structurally normal stale discard, not a failure.
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
        inner.flight = Flight::Idle;
        let changed = inner.state != previous;
        if changed {
            inner.version += 1;
        }
        debug!(
            ticket,
            ok = inner.state.error.is_none(),
            version = inner.version,
            "committed fetch attempt"
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
