//! System module: the external collaborators the orchestrator drives.
//!
//! Every effect on the outside world (cloud API, infrastructure engine, TLS
//! material, SSH keys, cluster handshake, health probe) goes through one of
//! the traits below. The orchestrator only sequences them; tests swap in
//! recording fakes.

pub mod health;
pub mod terraform;

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::models::{
    HealthStatus, Image, ImageBuildRequest, ImageId, InfraOptions, KeyPair, TlsCert,
};

pub use health::HttpHealthProbe;
pub use terraform::TerraformCli;

/// Collaborator failures are opaque to the harness.
pub type ExternalResult<T> = anyhow::Result<T>;

/// Cloud provider API: project/region/zone selection, images, instance groups.
pub trait CloudProvider: Send + Sync {
    fn resolve_project(&self) -> BoxFuture<'_, ExternalResult<String>>;

    fn pick_region<'a>(&'a self, project: &'a str) -> BoxFuture<'a, ExternalResult<String>>;

    fn pick_zone<'a>(
        &'a self,
        project: &'a str,
        region: &'a str,
    ) -> BoxFuture<'a, ExternalResult<String>>;

    fn build_image<'a>(
        &'a self,
        request: &'a ImageBuildRequest,
    ) -> BoxFuture<'a, ExternalResult<ImageId>>;

    /// `Ok(None)` when the image does not exist (any more).
    fn fetch_image<'a>(
        &'a self,
        project: &'a str,
        id: &'a ImageId,
    ) -> BoxFuture<'a, ExternalResult<Option<Image>>>;

    fn delete_image<'a>(&'a self, image: &'a Image) -> BoxFuture<'a, ExternalResult<()>>;

    /// Regional managed instance group backing a deployed cluster.
    fn fetch_instance_group<'a>(
        &'a self,
        project: &'a str,
        region: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, ExternalResult<Arc<dyn InstanceGroup>>>;
}

pub trait InstanceGroup: Send + Sync {
    fn name(&self) -> &str;

    fn list_instances<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, ExternalResult<Vec<Arc<dyn Instance>>>>;
}

pub trait Instance: Send + Sync {
    fn name(&self) -> &str;

    /// Idempotent per instance.
    fn inject_ssh_key<'a>(
        &'a self,
        user: &'a str,
        public_key: &'a str,
    ) -> BoxFuture<'a, ExternalResult<()>>;

    fn public_address(&self) -> BoxFuture<'_, ExternalResult<String>>;
}

/// Infrastructure-as-code engine. Apply and destroy must receive identical
/// options.
pub trait InfraEngine: Send + Sync {
    fn apply_all<'a>(&'a self, options: &'a InfraOptions) -> BoxFuture<'a, ExternalResult<()>>;

    fn destroy_all<'a>(&'a self, options: &'a InfraOptions)
        -> BoxFuture<'a, ExternalResult<()>>;
}

/// Self-signed TLS material baked into the image and removed at teardown.
pub trait TlsCertificates: Send + Sync {
    fn generate_self_signed(&self) -> ExternalResult<TlsCert>;

    /// Write the certificate files into `dir`; the returned cert knows its paths.
    fn persist(&self, cert: &TlsCert, dir: &Path) -> ExternalResult<TlsCert>;

    /// `Ok(None)` when no certificate was persisted in `dir`.
    fn load(&self, dir: &Path) -> ExternalResult<Option<TlsCert>>;

    fn purge(&self, cert: &TlsCert) -> ExternalResult<()>;
}

pub trait SshKeys: Send + Sync {
    fn generate_rsa_key_pair(&self, bits: u32) -> ExternalResult<KeyPair>;
}

/// Inputs of the initialize-and-unseal handshake.
#[derive(Debug, Clone)]
pub struct HandshakeTarget {
    pub project: String,
    pub region: String,
    pub cluster_name: String,
    pub ssh_user: String,
    pub key_pair: KeyPair,
}

/// Drives a sealed cluster to initialized + unsealed, or fails.
pub trait ClusterHandshake: Send + Sync {
    fn initialize_and_unseal<'a>(
        &'a self,
        target: &'a HandshakeTarget,
    ) -> BoxFuture<'a, ExternalResult<()>>;
}

pub trait HealthProbe: Send + Sync {
    fn check_healthy<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ExternalResult<HealthStatus>>;
}

/// The full set of collaborators one run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub cloud: Arc<dyn CloudProvider>,
    pub infra: Arc<dyn InfraEngine>,
    pub tls: Arc<dyn TlsCertificates>,
    pub ssh: Arc<dyn SshKeys>,
    pub handshake: Arc<dyn ClusterHandshake>,
    pub probe: Arc<dyn HealthProbe>,
}
