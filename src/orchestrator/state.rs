//! Stage names and per-invocation run bookkeeping.
//!
//! **Architecture**:
//! - `Stage`: the stages of the cluster test, in execution order
//! - `StageStatus` / `StageRecord`: what happened to one stage in this invocation
//! - `RunReport`: the records of one invocation, in the order stages were reached
//!
//! None of this is persisted. Resuming a run relies on fixture contents, not
//! on these records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stages of the cluster test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Pick project/region/zone, generate TLS material, bake the image
    BuildImage,

    /// Apply the Consul + Vault infrastructure from the image
    Deploy,

    /// SSH access, initialize + unseal, health probe
    Validate,

    /// Destroy infrastructure, delete the image, purge TLS material
    Teardown,
}

impl Stage {
    /// Stage name as used in the selection variables (`SKIP_<name>`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BuildImage => "build_image",
            Stage::Deploy => "deploy",
            Stage::Validate => "validate",
            Stage::Teardown => "teardown",
        }
    }

    /// Effectful stages in execution order. Teardown is deferred, not listed.
    pub fn sequence() -> [Stage; 3] {
        [Stage::BuildImage, Stage::Deploy, Stage::Validate]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Not selected in this invocation; the body never ran
    Skipped,
    Passed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Skipped => "skipped",
            StageStatus::Passed => "passed",
            StageStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    pub duration: Duration,
    /// Failure message when `status` is `Failed`
    pub error: Option<String>,
}

/// Records of one orchestrator invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub stages: Vec<StageRecord>,
}

impl RunReport {
    pub fn record(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.stages
            .iter()
            .rev()
            .find(|r| r.name == name)
            .map(|r| r.status)
    }

    /// Names of the stages whose body actually ran, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| r.status != StageStatus::Skipped)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.stages.iter().all(|r| r.status != StageStatus::Failed)
    }

    /// One line per stage, e.g. `deploy: passed (12.3s)`.
    pub fn summary(&self) -> String {
        self.stages
            .iter()
            .map(|r| {
                let mut line = format!(
                    "{}: {} ({:.1}s)",
                    r.name,
                    r.status.as_str(),
                    r.duration.as_secs_f64()
                );
                if let Some(err) = &r.error {
                    line.push_str(&format!(" - {}", err));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
