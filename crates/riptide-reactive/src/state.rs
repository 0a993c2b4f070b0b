#![forbid(unsafe_code)]

//! Shared state types for the resource controllers.
//!
//! - [`ResourceState`]: the live `{value, error, is_loading}` triple a
//!   consuming view renders from.
//! - [`Snapshot`]: the settled outcome a dispatched attempt resolves to.
//! - [`SubscriberSet`] / [`Subscription`]: change notification with RAII
//!   unsubscription.
//!
//! # Invariants
//!
//! 1. `value` is only overwritten by a committed success; a committed failure
//!    sets `error` and leaves `value` untouched.
//! 2. A committed success clears `error`.
//! 3. Subscribers are notified in registration order; dead entries are pruned
//!    lazily during notification.
//! 4. Dropping a [`Subscription`] removes its callback before the next
//!    notification cycle.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::future::{LocalBoxFuture, Shared};

/// The future returned by `reload()` / `update()`: a shared handle to one
/// dispatched attempt, resolving to that attempt's [`Snapshot`].
///
/// Cloning the handle shares the underlying attempt; it is never re-run.
pub type SettleFuture<T, E> = Shared<LocalBoxFuture<'static, Snapshot<T, E>>>;

// ---------------------------------------------------------------------------
// ResourceState / Snapshot
// ---------------------------------------------------------------------------

/// The externally visible state of a controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceState<T, E> {
    /// Latest committed value, starting from the caller-supplied default.
    pub value: T,
    /// Latest committed failure, cleared by the next committed success.
    pub error: Option<E>,
    /// True from dispatch of the authoritative attempt until its commit.
    pub is_loading: bool,
}

impl<T, E> ResourceState<T, E> {
    /// Initial state around a default value: no error, not loading.
    #[must_use]
    pub fn initial(default: T) -> Self {
        Self {
            value: default,
            error: None,
            is_loading: false,
        }
    }
}

/// The settled outcome of one dispatched attempt.
///
/// Carries the attempt's value on success, or the value that was visible when
/// the attempt was dispatched alongside its error on failure. An attempt that
/// lost authority still resolves to its own outcome; it just commits nowhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot<T, E> {
    /// Resulting value.
    pub value: T,
    /// Failure, if the attempt settled with one.
    pub error: Option<E>,
}

impl<T, E> Snapshot<T, E> {
    /// Snapshot of a successful settle.
    #[must_use]
    pub fn success(value: T) -> Self {
        Self {
            value,
            error: None,
        }
    }

    /// Snapshot of a failed settle; `value` is the last visible value.
    #[must_use]
    pub fn failure(value: T, error: E) -> Self {
        Self {
            value,
            error: Some(error),
        }
    }

    /// Whether the attempt settled without an error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Fold a producer outcome into a snapshot, falling back to `fallback`
    /// for the value on failure.
    pub(crate) fn from_outcome(outcome: Result<T, E>, fallback: T) -> Self {
        match outcome {
            Ok(value) => Self::success(value),
            Err(error) => Self::failure(fallback, error),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// RAII guard for a subscriber callback. Dropping it unsubscribes.
pub struct Subscription {
    _callback: Rc<dyn Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish()
    }
}

/// Registered change callbacks, stored weakly and pruned lazily.
pub(crate) struct SubscriberSet<S> {
    entries: RefCell<Vec<Weak<dyn Fn(&S)>>>,
}

impl<S: 'static> SubscriberSet<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    /// Register `callback`, keeping it alive through the returned guard.
    pub(crate) fn subscribe(&self, callback: impl Fn(&S) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&S)> = Rc::new(callback);
        self.entries.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            _callback: Rc::new(strong),
        }
    }

    /// Notify all live subscribers in registration order.
    ///
    /// Callbacks run after the internal borrow is released, so a callback may
    /// re-enter the owning controller.
    pub(crate) fn notify(&self, state: &S) {
        let live: Vec<Rc<dyn Fn(&S)>> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|weak| weak.strong_count() > 0);
            entries.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback(state);
        }
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl<S> std::fmt::Debug for SubscriberSet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
