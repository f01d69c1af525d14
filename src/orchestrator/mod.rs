//! Test Orchestration: build_image -> deploy -> validate, with teardown
//! deferred before the first stage runs.
//!
//! Every stage goes through the [`StageRunner`], so each one can be selected
//! or skipped independently. Stages only talk to each other through the
//! [`FixtureStore`], which is what lets a later invocation resume a run
//! (e.g. re-run only `validate` against a cluster deployed earlier).

pub mod checkpoint;
pub mod executor;
pub mod stages;
pub mod state;
pub mod teardown;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

pub use checkpoint::FixtureStore;
pub use executor::StageRunner;
pub use stages::{StageContext, UniqueIdSource};
pub use state::{RunReport, Stage, StageRecord, StageStatus};
pub use teardown::TeardownGuard;

use crate::config::{HarnessConfig, StageSelection};
use crate::error::{RunError, StageError};
use crate::system::Collaborators;

const INTERRUPT_REASON: &str = "interrupted by signal";

/// Produces a future that resolves when the run should be interrupted.
/// Called once per run.
pub type InterruptSource = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Drives one Consul + Vault cluster test against a fixture scope.
#[derive(Clone)]
pub struct ClusterTestOrchestrator {
    config: HarnessConfig,
    selection: StageSelection,
    collaborators: Collaborators,
    unique_id: UniqueIdSource,
    interrupt: InterruptSource,
}

/// What one invocation did, and why it failed if it did.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<RunError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> crate::error::Result<RunReport> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

enum SequenceOutcome {
    Finished(Result<(), StageError>),
    Panicked(Box<dyn Any + Send>),
    Interrupted,
}

impl ClusterTestOrchestrator {
    /// The fixture scope is `config.working_dir`.
    pub fn new(
        config: HarnessConfig,
        selection: StageSelection,
        collaborators: Collaborators,
    ) -> Self {
        ClusterTestOrchestrator {
            config,
            selection,
            collaborators,
            unique_id: Arc::new(stages::unique_id),
            interrupt: Arc::new(|| wait_for_interrupt().boxed()),
        }
    }

    /// Replace the run-unique id source (deterministic names in tests).
    pub fn with_unique_id(mut self, source: UniqueIdSource) -> Self {
        self.unique_id = source;
        self
    }

    /// Replace the Ctrl-C listener. Only consulted when
    /// `config.trap_interrupt` is set.
    pub fn with_interrupt(mut self, source: InterruptSource) -> Self {
        self.interrupt = source;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn selection(&self) -> &StageSelection {
        &self.selection
    }

    /// Run the selected stages in order, then the teardown.
    ///
    /// A stage failure stops the sequence and is the reported cause; a
    /// teardown failure after it is attached as a secondary diagnostic. A
    /// panic inside a stage still runs the teardown before it resumes.
    pub async fn run(&self) -> RunOutcome {
        let store = match FixtureStore::open(&self.config.working_dir) {
            Ok(store) => store,
            Err(e) => {
                log::error!("[Run] cannot open fixture store: {}", e);
                return RunOutcome {
                    report: RunReport::default(),
                    error: Some(RunError::Fixture(e)),
                };
            }
        };
        log::info!("[Run] fixture scope: {}", store.data_dir().display());

        let ctx = StageContext::new(store, self.config.clone(), self.collaborators.clone())
            .with_unique_id(self.unique_id.clone());
        let mut runner = StageRunner::new(self.selection.clone());

        let teardown_name = Stage::Teardown.as_str();
        let teardown_ctx = ctx.clone();
        let guard = TeardownGuard::register(teardown_name, runner.is_selected(teardown_name), move || {
            async move { stages::teardown(&teardown_ctx).await }.boxed()
        });

        let outcome = {
            let sequence = AssertUnwindSafe(run_sequence(&ctx, &mut runner)).catch_unwind();
            if self.config.trap_interrupt {
                tokio::select! {
                    result = sequence => SequenceOutcome::from_caught(result),
                    _ = (self.interrupt)() => SequenceOutcome::Interrupted,
                }
            } else {
                SequenceOutcome::from_caught(sequence.await)
            }
        };

        let stage_result = match outcome {
            SequenceOutcome::Finished(result) => result,
            SequenceOutcome::Panicked(panic) => {
                if let Err(e) = guard.execute(&mut runner).await {
                    log::error!("[Run] teardown after panic failed: {}", e);
                }
                log::error!("[Run] summary:\n{}", runner.report().summary());
                std::panic::resume_unwind(panic)
            }
            SequenceOutcome::Interrupted => {
                log::warn!("[Run] {}, tearing down", INTERRUPT_REASON);
                let stage = runner
                    .abort_current(INTERRUPT_REASON)
                    .unwrap_or_else(|| "run".to_string());
                Err(StageError::new(stage, anyhow::anyhow!(INTERRUPT_REASON)))
            }
        };

        let teardown_result = guard.execute(&mut runner).await;

        let error = match (stage_result, teardown_result) {
            (Ok(()), Ok(())) => None,
            (Err(source), teardown) => Some(RunError::Stage {
                source,
                teardown: teardown.err(),
            }),
            (Ok(()), Err(e)) => Some(RunError::Teardown(e)),
        };

        let report = runner.into_report();
        match &error {
            None => log::info!("[Run] passed:\n{}", report.summary()),
            Some(e) => log::error!("[Run] failed: {}\n{}", e, report.summary()),
        }
        RunOutcome { report, error }
    }
}

impl SequenceOutcome {
    fn from_caught(result: Result<Result<(), StageError>, Box<dyn Any + Send>>) -> Self {
        match result {
            Ok(result) => SequenceOutcome::Finished(result),
            Err(panic) => SequenceOutcome::Panicked(panic),
        }
    }
}

async fn run_sequence(ctx: &StageContext, runner: &mut StageRunner) -> Result<(), StageError> {
    for stage in Stage::sequence() {
        runner
            .run_stage(stage.as_str(), || stages::body(stage, ctx))
            .await?;
    }
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run simply
/// proceeds without interrupt handling.
///
/// The handler is process-wide and stays installed after the run (see
/// `HarnessConfig::trap_interrupt`).
async fn wait_for_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("[Run] cannot listen for Ctrl-C: {}", e);
        futures::future::pending::<()>().await;
    }
}
