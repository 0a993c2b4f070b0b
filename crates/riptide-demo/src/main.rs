//! Simulated dashboard session driving the reactive core end to end.
//!
//! Two controllers cooperate the way a real dashboard wires them:
//!
//! - a polled [`Resource`] that refreshes the dataset list on an interval,
//!   re-fetching immediately when the selected project changes, and
//! - a [`Managed`] prediction that commits a cheap placeholder right away,
//!   refines it asynchronously, and accepts direct user adjustments that
//!   race (and beat) any in-flight refinement.
//!
//! Run with `RUST_LOG=debug` to watch ticket minting and discard decisions
//! inside the core; the demo itself logs committed transitions at `info`.

#![forbid(unsafe_code)]

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use riptide_reactive::{Managed, Output, Resource, ResourceConfig, Update};
use tokio::task::LocalSet;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum DemoError {
    #[error("dataset service unavailable: {0}")]
    DatasetService(String),
    #[error("prediction backend rejected {model}: {reason}")]
    Prediction { model: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
struct Prediction {
    model: String,
    score: f64,
    refined: bool,
}

// ---------------------------------------------------------------------------
// Simulated backends
// ---------------------------------------------------------------------------

/// Dataset listing for a project. Fails every fourth round to show that a
/// failed refresh keeps the previous listing on screen.
fn list_datasets(
    project: String,
    round: Rc<Cell<u32>>,
) -> impl Fn() -> futures::future::LocalBoxFuture<'static, Result<Vec<String>, DemoError>> {
    use futures::FutureExt;
    move || {
        let project = project.clone();
        let n = round.get();
        round.set(n + 1);
        async move {
            sleep(Duration::from_millis(40)).await;
            if n % 4 == 3 {
                return Err(DemoError::DatasetService(format!("round {n} timed out")));
            }
            Ok((0..=n % 3)
                .map(|i| format!("{project}/dataset-{i}"))
                .collect())
        }
        .boxed_local()
    }
}

/// A prediction in two stages: a coarse score immediately, a refined one
/// after the backend round-trip.
fn predict(model: &str) -> Output<Prediction, DemoError> {
    let coarse = Prediction {
        model: model.to_owned(),
        score: 0.5,
        refined: false,
    };
    let model = model.to_owned();
    Output::staged(coarse, async move {
        sleep(Duration::from_millis(90)).await;
        if model == "broken" {
            return Err(DemoError::Prediction {
                model,
                reason: "weights missing".into(),
            });
        }
        Ok(Prediction {
            score: 0.5 + 0.01 * model.len() as f64,
            refined: true,
            model,
        })
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn run_session() {
    let round = Rc::new(Cell::new(0u32));
    let project = "riptide".to_owned();

    let datasets = Resource::new(
        list_datasets(project.clone(), Rc::clone(&round)),
        (project.clone(),),
        ResourceConfig::new(Vec::new())
            .update_interval(Duration::from_millis(150))
            .on_reload(|| info!("refreshing dataset list")),
    );
    let _datasets_sub = datasets.subscribe(|state| {
        info!(
            loading = state.is_loading,
            datasets = state.value.len(),
            error = ?state.error,
            "dataset listing changed"
        );
    });

    let model = "baseline".to_owned();
    let prediction = Managed::new(
        {
            let model = model.clone();
            move |_prev: &Prediction, _err| predict(&model)
        },
        (model,),
        Prediction {
            model: String::new(),
            score: 0.0,
            refined: false,
        },
    );
    let _prediction_sub = prediction.subscribe(|state| {
        info!(
            loading = state.is_loading,
            model = %state.value.model,
            score = state.value.score,
            refined = state.value.refined,
            error = ?state.error,
            "prediction changed"
        );
    });

    // Let the first fetch, the placeholder, and the refinement land.
    sleep(Duration::from_millis(200)).await;

    // The user drags a threshold slider: the adjustment derives from the
    // committed prediction and wins over anything still in flight.
    prediction
        .update(Update::apply(|current: &Prediction, _| {
            Output::Ready(Prediction {
                score: current.score * 0.9,
                ..current.clone()
            })
        }))
        .await;

    // Switching models re-dispatches the two-stage computation.
    let model = "wide-resnet".to_owned();
    prediction.sync(
        {
            let model = model.clone();
            move |_prev: &Prediction, _err| predict(&model)
        },
        (model,),
    );

    // Switching projects forces a dataset refresh ahead of the poll tick.
    let project = "riptide-staging".to_owned();
    datasets.sync(
        list_datasets(project.clone(), Rc::clone(&round)),
        (project,),
    );

    sleep(Duration::from_millis(400)).await;
    datasets.set_update_interval(None);
    info!(version = datasets.version(), "session over, polling stopped");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("current-thread runtime");
    runtime.block_on(LocalSet::new().run_until(run_session()));
}
