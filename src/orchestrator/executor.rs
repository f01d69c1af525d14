//! Stage execution: selection check, single invocation, outcome recording.
//!
//! The runner knows nothing about what a stage does. It answers "is this
//! stage selected?", runs the body once if so, records the outcome in the
//! invocation's `RunReport` and hands the body's error back unchanged (wrapped
//! with the stage name for `run_stage`). It never retries and never swallows.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;

use super::state::{RunReport, StageRecord, StageStatus};
use crate::config::StageSelection;
use crate::error::StageError;

/// Runs named stages according to a `StageSelection`.
#[derive(Debug)]
pub struct StageRunner {
    selection: StageSelection,
    report: RunReport,
    /// Stage whose body is currently executing, with its start time
    current: Option<(String, Instant)>,
}

impl StageRunner {
    pub fn new(selection: StageSelection) -> Self {
        StageRunner {
            selection,
            report: RunReport::default(),
            current: None,
        }
    }

    pub fn selection(&self) -> &StageSelection {
        &self.selection
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selection.is_selected(name)
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn into_report(self) -> RunReport {
        self.report
    }

    /// Name of the stage whose body started but has not finished. Only
    /// observable when the body's future was dropped (interrupt).
    pub fn current_stage(&self) -> Option<&str> {
        self.current.as_ref().map(|(name, _)| name.as_str())
    }

    /// Run a stage body returning `anyhow::Result`, wrapping failures in a
    /// `StageError` that names the stage.
    pub async fn run_stage<F, Fut>(&mut self, name: &str, body: F) -> Result<StageStatus, StageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.run(name, body)
            .await
            .map_err(|source| StageError::new(name, source))
    }

    /// Run a stage body with its own error type.
    ///
    /// Not selected: the body is not called and `Skipped` is recorded.
    /// Selected: the body is awaited exactly once; the outcome is recorded
    /// before an error is returned or a panic resumes.
    pub async fn run<F, Fut, E>(&mut self, name: &str, body: F) -> Result<StageStatus, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        if !self.selection.is_selected(name) {
            self.record_skipped(name);
            return Ok(StageStatus::Skipped);
        }

        log::info!("[Stage] [{}] starting", name);
        let started = Instant::now();
        self.current = Some((name.to_string(), started));

        let outcome = AssertUnwindSafe(body()).catch_unwind().await;
        self.current = None;
        let duration = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                log::info!("[Stage] [{}] passed in {:.1}s", name, duration.as_secs_f64());
                self.report.record(StageRecord {
                    name: name.to_string(),
                    status: StageStatus::Passed,
                    duration,
                    error: None,
                });
                Ok(StageStatus::Passed)
            }
            Ok(Err(err)) => {
                log::error!("[Stage] [{}] failed after {:.1}s: {:#}", name, duration.as_secs_f64(), err);
                self.report.record(StageRecord {
                    name: name.to_string(),
                    status: StageStatus::Failed,
                    duration,
                    error: Some(format!("{:#}", err)),
                });
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("[Stage] [{}] panicked: {}", name, message);
                self.report.record(StageRecord {
                    name: name.to_string(),
                    status: StageStatus::Failed,
                    duration,
                    error: Some(format!("panicked: {}", message)),
                });
                std::panic::resume_unwind(panic)
            }
        }
    }

    pub fn record_skipped(&mut self, name: &str) {
        log::info!("[Stage] [{}] skipped (not selected)", name);
        self.report.record(StageRecord {
            name: name.to_string(),
            status: StageStatus::Skipped,
            duration: Duration::ZERO,
            error: None,
        });
    }

    /// Record the in-flight stage as failed after its future was dropped.
    /// Returns the stage name, if one was running.
    pub fn abort_current(&mut self, reason: &str) -> Option<String> {
        let (name, started) = self.current.take()?;
        log::error!("[Stage] [{}] aborted: {}", name, reason);
        self.report.record(StageRecord {
            name: name.clone(),
            status: StageStatus::Failed,
            duration: started.elapsed(),
            error: Some(reason.to_string()),
        });
        Some(name)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
