//! Core data types for the stage harness.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier of a built machine image (the run's artifact).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        ImageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A built image as returned by the cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub project: String,
    pub id: ImageId,
}

/// Everything the image builder needs to bake one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuildRequest {
    /// Image template file (builder configuration).
    pub template: PathBuf,
    pub os_name: String,
    pub project: String,
    pub zone: String,
    pub cert: TlsCert,
}

/// Self-signed TLS material baked into the image.
///
/// Paths are filled in once the certificate has been persisted to disk;
/// before that only the PEM bodies are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCert {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// SSH key pair used to reach the cluster instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Working directory plus named variables handed to the infrastructure
/// engine. Apply and destroy must see the exact same bag, so it is saved as a
/// fixture and read back for teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraOptions {
    pub working_dir: PathBuf,
    pub vars: IndexMap<String, serde_json::Value>,
}

impl InfraOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        InfraOptions {
            working_dir: working_dir.into(),
            vars: IndexMap::new(),
        }
    }

    pub fn with_var(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    /// Render the variables as `name=value` pairs, strings unquoted.
    pub fn var_args(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(name, value)| match value {
                serde_json::Value::String(s) => format!("{}={}", name, s),
                other => format!("{}={}", name, other),
            })
            .collect()
    }
}

/// Names of the two clusters deployed by one run. Both share the run's
/// unique suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNames {
    pub consul: String,
    pub vault: String,
}

/// Result of a health probe against one cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}
