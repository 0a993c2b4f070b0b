#![forbid(unsafe_code)]

//! Latest-value mirror: a one-cell holder for the freshest caller-supplied
//! value.
//!
//! [`Latest<T>`] always reflects the most recently stored value. Both
//! controllers keep their producer/compute closure in a `Latest` so that
//! asynchronous continuations and poll loops, which are created once, read the
//! closure supplied by the most recent [`sync`](crate::Resource::sync) call
//! instead of the one captured at construction.
//!
//! # Invariants
//!
//! 1. `get()` returns the value passed to the most recent `set()` (or the
//!    construction value if `set()` was never called).
//! 2. All clones of a `Latest` share the same cell; a `set()` through one
//!    handle is visible through every other.

use std::cell::RefCell;
use std::rc::Rc;

/// One-cell holder always reflecting the most recently stored value.
///
/// Cloning is cheap and shares the cell.
pub struct Latest<T> {
    cell: Rc<RefCell<T>>,
}

impl<T> Clone for Latest<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Latest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latest")
            .field("value", &*self.cell.borrow())
            .finish()
    }
}

impl<T> Latest<T> {
    /// Create a mirror holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    /// Store a new value, discarding the previous one.
    pub fn set(&self, value: T) {
        *self.cell.borrow_mut() = value;
    }

    /// Store a new value and return the previous one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut self.cell.borrow_mut(), value)
    }

    /// Access the current value by reference.
    ///
    /// # Panics
    ///
    /// Panics if the closure calls `set()` on the same mirror (re-entrant
    /// borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.borrow())
    }
}

impl<T: Clone> Latest<T> {
    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
