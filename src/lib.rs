//! Vault Stage Harness
//!
//! Staged integration test for a Consul + Vault cluster image: bake the image,
//! deploy both clusters from it, validate the Vault cluster, tear everything
//! down. Each stage can be selected or skipped on its own, and stages only
//! exchange data through an on-disk fixture store, so a later invocation can
//! resume a run (e.g. re-validate a cluster that is still up).
//!
//! The system is organized into functional modules:
//! - **error**: Error type hierarchy
//! - **models**: Data exchanged with collaborators and saved as fixtures
//! - **config**: Harness configuration and stage selection
//! - **system**: Collaborator traits (cloud, infra engine, TLS, SSH, handshake,
//!   probe) and the terraform / HTTP adapters
//! - **orchestrator**: Fixture store, stage runner, teardown guard and the
//!   cluster test itself
//! - **log_collector**: Per-run log file behind the `log` facade

pub mod error;
pub mod models;

// Configuration and stage selection
pub mod config;

// External collaborators and concrete adapters
pub mod system;

// Run log file
pub mod log_collector;

// Fixture store, stage runner, teardown, cluster test
pub mod orchestrator;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::RunLogCollector;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ConfigError, FixtureError, Result, RunError, StageError, TeardownError};

pub use models::{
    ClusterNames, HealthStatus, Image, ImageBuildRequest, ImageId, InfraOptions, KeyPair,
    TlsCert,
};

pub use config::{HarnessConfig, StageSelection};

pub use system::{
    ClusterHandshake, CloudProvider, Collaborators, HandshakeTarget, HealthProbe,
    HttpHealthProbe, InfraEngine, Instance, InstanceGroup, SshKeys, TerraformCli,
    TlsCertificates,
};

pub use orchestrator::{
    ClusterTestOrchestrator, FixtureStore, RunOutcome, RunReport, Stage, StageRunner,
    StageStatus, TeardownGuard,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
