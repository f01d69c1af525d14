//! Deferred teardown guard.
//!
//! Registered right after the run scope is opened and before any stage
//! runs. The orchestrator calls [`TeardownGuard::execute`] on every exit
//! path it controls (success, stage error, caught panic, interrupt). If the
//! guard is dropped while still armed (the run future itself was dropped, or
//! a panic escaped before `execute`), `Drop` runs the teardown synchronously.
//! Once `execute` has started the teardown, it lives on a spawned task, so a
//! caller dropped mid-teardown leaves it running to the end.
//!
//! The teardown task owns everything it needs (fixture store handle,
//! collaborators) and reads its inputs from the fixture store, so it does not
//! depend on any in-memory state of the stages that ran before it.

use futures::future::BoxFuture;
use tokio::runtime::{Handle, RuntimeFlavor};

use super::executor::StageRunner;
use crate::error::TeardownError;

pub type TeardownTask =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<(), TeardownError>> + Send + 'static>;

pub struct TeardownGuard {
    name: String,
    selected: bool,
    task: Option<TeardownTask>,
}

impl TeardownGuard {
    /// Arm the guard. `selected` is the stage selection verdict for the
    /// teardown stage; an unselected teardown is recorded as skipped and
    /// never runs, not even from `Drop`.
    pub fn register<F>(name: &str, selected: bool, task: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, Result<(), TeardownError>> + Send + 'static,
    {
        log::info!(
            "[Teardown] registered '{}'{}",
            name,
            if selected { "" } else { " (not selected, will be skipped)" }
        );
        TeardownGuard {
            name: name.to_string(),
            selected,
            task: Some(Box::new(task)),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// Run the teardown once through the stage runner and disarm the guard.
    ///
    /// The teardown future runs as its own task: dropping the caller while
    /// it is in flight does not cancel it, the task still runs to completion.
    pub async fn execute(mut self, runner: &mut StageRunner) -> Result<(), TeardownError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        if !self.selected {
            runner.record_skipped(&self.name);
            return Ok(());
        }
        runner
            .run(&self.name, || {
                let handle = tokio::spawn(task());
                async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                        Err(e) => {
                            let mut err = TeardownError::default();
                            err.push("teardown", e);
                            Err(err)
                        }
                    }
                }
            })
            .await
            .map(|_| ())
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if !self.selected {
            return;
        }

        log::warn!(
            "[Teardown] guard for '{}' dropped while armed, running teardown now",
            self.name
        );
        match run_blocking(task) {
            Ok(()) => log::info!("[Teardown] '{}' completed from drop", self.name),
            Err(e) => log::error!("[Teardown] '{}' failed from drop: {}", self.name, e),
        }
    }
}

/// Drive the teardown future to completion from synchronous code.
fn run_blocking(task: TeardownTask) -> Result<(), TeardownError> {
    let future = task();
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(future))
        }
        // current-thread runtime (cannot block it) or no runtime at all:
        // give the teardown its own runtime on a helper thread
        _ => {
            let joined = std::thread::spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| {
                        let mut err = TeardownError::default();
                        err.push("runtime", e);
                        err
                    })?;
                runtime.block_on(future)
            })
            .join();
            match joined {
                Ok(result) => result,
                Err(panic) => {
                    let mut err = TeardownError::default();
                    err.push("teardown", super::executor::panic_message(panic.as_ref()));
                    Err(err)
                }
            }
        }
    }
}
