//! End-to-end ordering tests for the resource controllers.
//!
//! Every test drives overlapping attempts to settle in an order chosen by
//! the test (via `ManualProducer`) and asserts the dispatch-order authority
//! rules:
//!
//! 1. Last-dispatched-wins, independent of settle order.
//! 2. Single-flight collapse shares one producer invocation.
//! 3. Failures preserve the previous value; successes clear the error.
//! 4. Placeholders precede refinements, never the reverse.
//! 5. `update` and recomputation compete purely on dispatch order.
//! 6. Polling reloads on the interval without bypassing single-flight.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use riptide_harness::{HarnessError, InstantProducer, ManualProducer, drain};
use riptide_reactive::{Managed, Output, Resource, ResourceConfig, Snapshot, Update};
use tokio::task::LocalSet;

// ── Single-flight fetch controller ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn last_dispatched_wins_when_settles_invert() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<&str>::new();
            let resource =
                Resource::new(producer.fetch(), (0,), ResourceConfig::new(""));
            drain().await;
            assert_eq!(producer.calls(), 1);

            // Attempt B dispatched by a dependency change before A settles.
            resource.sync(producer.fetch(), (1,));
            drain().await;
            assert_eq!(producer.calls(), 2);

            // B settles first and commits.
            producer.resolve_ok(1, "B");
            drain().await;
            assert_eq!(resource.value(), "B");
            assert!(!resource.is_loading());

            // A settles later; its result must be discarded.
            producer.resolve_ok(0, "A");
            drain().await;
            assert_eq!(resource.value(), "B");
            assert_eq!(resource.error(), None);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn stale_failure_is_discarded_too() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let resource =
                Resource::new(producer.fetch(), (0,), ResourceConfig::new(0));
            drain().await;

            resource.sync(producer.fetch(), (1,));
            drain().await;

            // The superseded attempt fails: nothing visible may change.
            producer.resolve_err(0, HarnessError::simulated("old attempt"));
            drain().await;
            assert_eq!(resource.error(), None);
            assert!(resource.is_loading(), "newer attempt still owns is_loading");

            producer.resolve_ok(1, 42);
            drain().await;
            assert_eq!(resource.value(), 42);
            assert_eq!(resource.error(), None);
            assert!(!resource.is_loading());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_reloads_share_one_attempt() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let resource = Resource::new(
                producer.fetch(),
                (),
                ResourceConfig::new(0).lazy(),
            );

            let first = resource.reload();
            let second = resource.reload();
            let third = resource.reload();
            drain().await;
            assert_eq!(producer.calls(), 1);

            producer.resolve_ok(0, 7);
            let (a, b, c) = futures::join!(first, second, third);
            assert_eq!(a, Snapshot::success(7));
            assert_eq!(a, b);
            assert_eq!(b, c);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn failure_keeps_value_success_clears_error() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<Vec<i32>>::new();
            let resource =
                Resource::new(producer.fetch(), (), ResourceConfig::new(Vec::new()));
            drain().await;
            producer.resolve_ok(0, vec![1, 2]);
            drain().await;
            assert_eq!(resource.value(), vec![1, 2]);

            let pending = resource.reload();
            drain().await;
            producer.resolve_err(1, HarnessError::simulated("refresh failed"));
            let snapshot = pending.await;
            assert_eq!(snapshot.value, vec![1, 2]);
            assert_eq!(
                snapshot.error,
                Some(HarnessError::simulated("refresh failed"))
            );
            assert_eq!(resource.value(), vec![1, 2]);
            assert_eq!(
                resource.error(),
                Some(HarnessError::simulated("refresh failed"))
            );

            let pending = resource.reload();
            drain().await;
            producer.resolve_ok(2, vec![3]);
            assert_eq!(pending.await, Snapshot::success(vec![3]));
            assert_eq!(resource.error(), None);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn lazy_tracks_deps_without_first_fetch() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let resource = Resource::new(
                producer.fetch(),
                (7,),
                ResourceConfig::new(0).lazy(),
            );
            drain().await;
            assert_eq!(producer.calls(), 0, "lazy suppresses the first fetch");

            resource.sync(producer.fetch(), (7,));
            drain().await;
            assert_eq!(producer.calls(), 0, "unchanged vector is not a change");

            resource.sync(producer.fetch(), (8,));
            drain().await;
            assert_eq!(producer.calls(), 1, "first change dispatches normally");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn polling_reloads_on_interval_and_stops_on_none() {
    LocalSet::new()
        .run_until(async {
            let producer = InstantProducer::<i32>::ok(1);
            let resource = Resource::new(
                producer.fetch(),
                (),
                ResourceConfig::new(0).update_interval(Duration::from_millis(50)),
            );
            drain().await;
            assert_eq!(producer.calls(), 1);

            tokio::time::sleep(Duration::from_millis(120)).await;
            drain().await;
            assert_eq!(producer.calls(), 3, "ticks at 50ms and 100ms");

            resource.set_update_interval(None);
            tokio::time::sleep(Duration::from_millis(200)).await;
            drain().await;
            assert_eq!(producer.calls(), 3, "loop exits at its next tick");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn polling_never_bypasses_single_flight() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let _resource = Resource::new(
                producer.fetch(),
                (),
                ResourceConfig::new(0).update_interval(Duration::from_millis(50)),
            );
            drain().await;
            assert_eq!(producer.calls(), 1);

            // The first attempt never settles; every tick collapses into it.
            tokio::time::sleep(Duration::from_millis(500)).await;
            drain().await;
            assert_eq!(producer.calls(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn replacing_update_interval_restarts_the_timer() {
    LocalSet::new()
        .run_until(async {
            let producer = InstantProducer::<i32>::ok(1);
            let resource = Resource::new(
                producer.fetch(),
                (),
                ResourceConfig::new(0).update_interval(Duration::from_millis(50)),
            );
            drain().await;
            assert_eq!(producer.calls(), 1);

            tokio::time::sleep(Duration::from_millis(120)).await;
            drain().await;
            assert_eq!(producer.calls(), 3, "ticks at 50ms and 100ms");

            resource.set_update_interval(Some(Duration::from_millis(200)));

            // The old cadence would have fired twice more in this window;
            // the replaced loop exits at its next wakeup without reloading.
            tokio::time::sleep(Duration::from_millis(150)).await;
            drain().await;
            assert_eq!(producer.calls(), 3, "old timer is torn down");

            // The new cadence fires 200ms after the replacement.
            tokio::time::sleep(Duration::from_millis(100)).await;
            drain().await;
            assert_eq!(producer.calls(), 4);

            tokio::time::sleep(Duration::from_millis(200)).await;
            drain().await;
            assert_eq!(producer.calls(), 5);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn dropping_controller_stops_polling() {
    LocalSet::new()
        .run_until(async {
            let producer = InstantProducer::<i32>::ok(1);
            let resource = Resource::new(
                producer.fetch(),
                (),
                ResourceConfig::new(0).update_interval(Duration::from_millis(50)),
            );
            drain().await;
            tokio::time::sleep(Duration::from_millis(60)).await;
            drain().await;
            assert_eq!(producer.calls(), 2);

            // The poll loop holds only a weak handle; once the last strong
            // handle is gone it exits at its next tick.
            drop(resource);
            tokio::time::sleep(Duration::from_millis(300)).await;
            drain().await;
            assert_eq!(producer.calls(), 2, "no reloads after the last handle");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn dropped_controller_abandons_inflight_attempt() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let resource =
                Resource::new(producer.fetch(), (), ResourceConfig::new(0));
            drain().await;

            let pending = resource.reload();
            drop(resource);

            // The attempt still settles for direct awaiters, but there is no
            // controller left to commit into.
            producer.resolve_ok(0, 9);
            assert_eq!(pending.await, Snapshot::success(9));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn subscriber_sees_loading_then_commit() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let resource = Resource::new(
                producer.fetch(),
                (),
                ResourceConfig::new(0).lazy(),
            );

            let events: Rc<RefCell<Vec<(i32, bool)>>> = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&events);
            let _sub = resource.subscribe(move |state| {
                sink.borrow_mut().push((state.value, state.is_loading));
            });

            let _pending = resource.reload();
            drain().await;
            producer.resolve_ok(0, 5);
            drain().await;

            assert_eq!(*events.borrow(), vec![(0, true), (5, false)]);
        })
        .await;
}

// ── Dual-track resolution engine ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn update_beats_slower_recomputation() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<&str>::new();
            let engine = Managed::new(
                {
                    let producer = producer.clone();
                    move |_: &&str, _: Option<&HarnessError>| {
                        Output::Deferred(producer.produce())
                    }
                },
                (0,),
                "initial",
            );
            drain().await;
            assert!(engine.is_loading());

            // The literal update dispatches after the recomputation, so it
            // wins no matter when the recomputation settles.
            let settled = engine.set("manual").await;
            assert_eq!(settled, Snapshot::success("manual"));
            assert_eq!(engine.value(), "manual");
            assert!(!engine.is_loading());

            producer.resolve_ok(0, "slow recompute");
            drain().await;
            assert_eq!(engine.value(), "manual");
            assert_eq!(engine.error(), None);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn recomputation_beats_slower_update() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let engine = Managed::new(
                |prev: &i32, _: Option<&HarnessError>| Output::Ready(*prev),
                (0,),
                1,
            );

            // Deferred update dispatched first...
            let pending = engine.update(Update::defer(producer.produce()));
            assert!(engine.is_loading());

            // ...then a dependency change recomputes synchronously.
            engine.sync(
                |_: &i32, _: Option<&HarnessError>| Output::Ready(100),
                (1,),
            );
            assert_eq!(engine.value(), 100);
            assert!(!engine.is_loading());

            // The update settles afterwards and is discarded; its future
            // still resolves with the attempt's own outcome.
            producer.resolve_ok(0, 7);
            assert_eq!(pending.await, Snapshot::success(7));
            assert_eq!(engine.value(), 100);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn dropped_engine_abandons_inflight_attempt() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let engine = Managed::new(
                |prev: &i32, _: Option<&HarnessError>| Output::Ready(*prev),
                (),
                0,
            );

            let pending = engine.update(Update::defer(producer.produce()));
            assert!(engine.is_loading());
            drop(engine);

            // The attempt still settles for direct awaiters, but there is no
            // engine left to commit into.
            producer.resolve_ok(0, 9);
            assert_eq!(pending.await, Snapshot::success(9));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn refinement_never_regresses_to_older_placeholder() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<String>::new();
            let compute = {
                let producer = producer.clone();
                move |_: &String, _: Option<&HarnessError>| {
                    let call = producer.calls();
                    Output::staged(format!("guess-{call}"), producer.produce())
                }
            };
            let engine = Managed::new(compute.clone(), (0,), String::new());
            assert_eq!(engine.value(), "guess-0");

            // Newer staged attempt replaces the placeholder immediately.
            engine.sync(compute, (1,));
            assert_eq!(engine.value(), "guess-1");
            assert!(engine.is_loading());

            // The *older* refinement settles now; it must not regress the
            // newer placeholder.
            producer.resolve_ok(0, String::from("refined-0"));
            drain().await;
            assert_eq!(engine.value(), "guess-1");
            assert!(engine.is_loading());

            producer.resolve_ok(1, String::from("refined-1"));
            drain().await;
            assert_eq!(engine.value(), "refined-1");
            assert!(!engine.is_loading());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn deferred_failure_commits_error_and_keeps_placeholder() {
    LocalSet::new()
        .run_until(async {
            let producer = ManualProducer::<i32>::new();
            let engine = Managed::new(
                {
                    let producer = producer.clone();
                    move |_: &i32, _: Option<&HarnessError>| {
                        Output::staged(-1, producer.produce())
                    }
                },
                (),
                0,
            );
            assert_eq!(engine.value(), -1);

            producer.resolve_err(0, HarnessError::simulated("predict failed"));
            drain().await;
            assert_eq!(engine.value(), -1, "failure leaves the value untouched");
            assert_eq!(
                engine.error(),
                Some(HarnessError::simulated("predict failed"))
            );
            assert!(!engine.is_loading());
        })
        .await;
}
