//! Unified error type hierarchy for the stage harness
//!
//! Provides structured error handling with FixtureError, StageError,
//! TeardownError, ConfigError and the top-level RunError.

use std::fmt;
use std::io;
use thiserror::Error;

/// Fixture store errors.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// The key was never saved in this run scope. Always a sequencing defect:
    /// a stage read a value that no earlier stage wrote.
    #[error("Fixture '{key}' not found in {scope}")]
    NotFound { scope: String, key: String },

    #[error("Invalid JSON in fixture '{key}': {source}")]
    InvalidJson {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid fixture key: {0}")]
    InvalidKey(String),

    #[error("IO error during fixture operations: {0}")]
    IoError(#[from] io::Error),
}

impl FixtureError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FixtureError::NotFound { .. })
    }
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// A stage body failed. Carries the stage name so the run report can name
/// the originating stage.
#[derive(Error, Debug)]
#[error("Stage '{stage}' failed: {source:#}")]
pub struct StageError {
    pub stage: String,
    #[source]
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(stage: impl Into<String>, source: anyhow::Error) -> Self {
        StageError {
            stage: stage.into(),
            source,
        }
    }
}

/// Cleanup failures collected while tearing down. Teardown keeps going after
/// each failure, so one error can hold several resource kinds.
#[derive(Error, Debug, Default)]
pub struct TeardownError {
    pub failures: Vec<String>,
}

impl TeardownError {
    pub fn push(&mut self, resource: &str, err: impl fmt::Display) {
        self.failures.push(format!("{}: {}", resource, err));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> std::result::Result<(), TeardownError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown failed: {}", self.failures.join("; "))
    }
}

/// Outcome of a failed orchestrator run.
///
/// A stage failure is always the reported cause. A teardown failure that
/// happened afterwards rides along as a secondary diagnostic.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("{source}{}", teardown_suffix(.teardown))]
    Stage {
        #[source]
        source: StageError,
        teardown: Option<TeardownError>,
    },

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error("Fixture store unavailable: {0}")]
    Fixture(#[from] FixtureError),
}

fn teardown_suffix(teardown: &Option<TeardownError>) -> String {
    match teardown {
        Some(err) => format!(" (additionally: {})", err),
        None => String::new(),
    }
}

impl RunError {
    /// Name of the stage that caused the failure, if a stage did.
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            RunError::Stage { source, .. } => Some(source.stage.as_str()),
            _ => None,
        }
    }

    pub fn teardown_error(&self) -> Option<&TeardownError> {
        match self {
            RunError::Stage { teardown, .. } => teardown.as_ref(),
            RunError::Teardown(err) => Some(err),
            RunError::Fixture(_) => None,
        }
    }
}

/// Top-level result type for harness operations.
pub type Result<T> = std::result::Result<T, RunError>;
