#![forbid(unsafe_code)]

//! Reactive resource synchronization core for Riptide.
//!
//! This crate provides the state controllers that bind asynchronous data
//! producers to a view's lifecycle and dependency set while staying correct
//! under overlapping, out-of-order, and manually triggered operations:
//!
//! - [`Resource`]: single-flight fetch controller. Auto-fetches on
//!   construction and on dependency change, collapses concurrent reloads
//!   into one producer invocation, optionally polls on an interval.
//! - [`Managed`]: dual-track resolution engine. Accepts immediate, deferred,
//!   or staged (placeholder + refinement) compute outputs, and funnels
//!   external [`update`](Managed::update)s through the same authority rules
//!   as automatic recomputation.
//! - [`Latest`]: one-cell mirror of the freshest caller-supplied value,
//!   used so long-lived continuations invoke the most recent closure.
//!
//! # Architecture
//!
//! Controllers are `Rc<RefCell<..>>` handles for single-threaded shared
//! ownership; deferred work is spawned with `tokio::task::spawn_local`, so
//! everything must run inside a `tokio::task::LocalSet` on a current-thread
//! runtime. Each dispatched attempt is tagged with a monotonically
//! increasing ticket; an attempt may commit its settled outcome only while
//! its ticket is still the authoritative one, and the authority check and
//! the commit happen under a single borrow with no await point between
//! them.
//!
//! # Invariants
//!
//! 1. Last-dispatched-wins: the most recently *dispatched* attempt's result
//!    prevails, independent of settle order.
//! 2. Superseded attempts are never aborted; they run to completion and
//!    their results are discarded at commit time.
//! 3. `value` is only overwritten by a committed success; a committed
//!    failure sets `error` and leaves `value` untouched.
//! 4. `reload()` and `update()` resolve with a [`Snapshot`]; producer
//!    failures never surface as rejections or panics.
//! 5. Dropping a controller abandons its in-flight attempts and stops its
//!    poll loop.

pub mod deps;
pub mod latest;
pub mod managed;
pub mod resource;
pub mod state;

pub use deps::Deps;
pub use latest::Latest;
pub use managed::{Managed, Output, Update};
pub use resource::{Resource, ResourceConfig};
pub use state::{ResourceState, SettleFuture, Snapshot, Subscription};
