//! Stage bodies of the Consul + Vault cluster test.
//!
//! Each body reads what it needs from the fixture store, performs its
//! effect through the collaborators and writes its outputs back. Nothing is
//! passed between bodies in memory, so any body can be run on its own against
//! fixtures left by an earlier process.

use std::sync::Arc;

use anyhow::{bail, Context};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use uuid::Uuid;

use super::checkpoint::FixtureStore;
use super::state::Stage;
use crate::config::{is_valid_resource_name, HarnessConfig};
use crate::error::TeardownError;
use crate::models::{ClusterNames, ImageBuildRequest, InfraOptions};
use crate::system::{Collaborators, HandshakeTarget};

// Saved fixture names
pub const SAVED_GCP_PROJECT_ID: &str = "GcpProjectId";
pub const SAVED_GCP_REGION_NAME: &str = "GcpRegionName";
pub const SAVED_GCP_ZONE_NAME: &str = "GcpZoneName";
pub const SAVED_CONSUL_CLUSTER_NAME: &str = "ConsulClusterName";
pub const SAVED_VAULT_CLUSTER_NAME: &str = "VaultClusterName";

// Infrastructure module variables
pub const TFVAR_NAME_GCP_PROJECT_ID: &str = "gcp_project_id";
pub const TFVAR_NAME_GCP_REGION: &str = "gcp_region";
pub const TFVAR_NAME_CONSUL_SERVER_CLUSTER_NAME: &str = "consul_server_cluster_name";
pub const TFVAR_NAME_CONSUL_SOURCE_IMAGE: &str = "consul_server_source_image";
pub const TFVAR_NAME_CONSUL_SERVER_CLUSTER_MACHINE_TYPE: &str = "consul_server_machine_type";
pub const TFVAR_NAME_VAULT_CLUSTER_NAME: &str = "vault_cluster_name";
pub const TFVAR_NAME_VAULT_SOURCE_IMAGE: &str = "vault_source_image";
pub const TFVAR_NAME_VAULT_CLUSTER_MACHINE_TYPE: &str = "vault_cluster_machine_type";

/// Length of the run-unique id: 12 hex chars = 48 random bits.
pub const UNIQUE_ID_LEN: usize = 12;

/// Source of run-unique ids.
pub type UniqueIdSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Lowercase (cloud resource names reject uppercase) random id.
///
/// Two concurrent runs in the same project collide with probability 2^-48.
pub fn unique_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    // the first 12 hex chars of a v4 UUID are fully random
    simple[..UNIQUE_ID_LEN].to_string()
}

pub fn cluster_names(config: &HarnessConfig, id: &str) -> anyhow::Result<ClusterNames> {
    let names = ClusterNames {
        consul: format!("{}-{}", config.consul_cluster_prefix, id),
        vault: format!("{}-{}", config.vault_cluster_prefix, id),
    };
    for name in [&names.consul, &names.vault] {
        if !is_valid_resource_name(name) {
            bail!("generated cluster name '{}' is not a valid resource name", name);
        }
    }
    Ok(names)
}

/// Everything a stage body may touch.
#[derive(Clone)]
pub struct StageContext {
    pub store: FixtureStore,
    pub config: HarnessConfig,
    pub collaborators: Collaborators,
    pub unique_id: UniqueIdSource,
}

impl StageContext {
    pub fn new(store: FixtureStore, config: HarnessConfig, collaborators: Collaborators) -> Self {
        StageContext {
            store,
            config,
            collaborators,
            unique_id: Arc::new(unique_id),
        }
    }

    pub fn with_unique_id(mut self, source: UniqueIdSource) -> Self {
        self.unique_id = source;
        self
    }
}

/// Body of `stage`, boxed so the orchestrator can drive the stages in a loop.
pub fn body(stage: Stage, ctx: &StageContext) -> BoxFuture<'_, anyhow::Result<()>> {
    match stage {
        Stage::BuildImage => build_image(ctx).boxed(),
        Stage::Deploy => deploy(ctx).boxed(),
        Stage::Validate => validate(ctx).boxed(),
        Stage::Teardown => async move {
            teardown(ctx).await?;
            Ok(())
        }
        .boxed(),
    }
}

/// Pick project/region/zone, generate and persist TLS material, bake the
/// image, record its id as the run's artifact.
pub async fn build_image(ctx: &StageContext) -> anyhow::Result<()> {
    let cloud = &ctx.collaborators.cloud;

    let project = cloud.resolve_project().await.context("resolving project")?;
    let region = cloud.pick_region(&project).await.context("picking region")?;
    let zone = cloud
        .pick_zone(&project, &region)
        .await
        .context("picking zone")?;
    log::info!("[Stage] [build_image] project={} region={} zone={}", project, region, zone);

    ctx.store.save_string(SAVED_GCP_PROJECT_ID, &project)?;
    ctx.store.save_string(SAVED_GCP_REGION_NAME, &region)?;
    ctx.store.save_string(SAVED_GCP_ZONE_NAME, &zone)?;

    let tls = &ctx.collaborators.tls;
    let cert = tls
        .generate_self_signed()
        .context("generating self-signed TLS certificate")?;
    let cert_dir = ctx.config.image_template_dir();
    let cert = tls
        .persist(&cert, &cert_dir)
        .with_context(|| format!("saving TLS certificate to {}", cert_dir.display()))?;

    let request = ImageBuildRequest {
        template: ctx.config.image_template_path(),
        os_name: ctx.config.os_name.clone(),
        project,
        zone,
        cert,
    };
    let image_id = cloud.build_image(&request).await.context("building image")?;
    log::info!("[Stage] [build_image] built image {}", image_id);

    ctx.store.save_artifact_id(&image_id)?;
    Ok(())
}

/// Name the clusters, record the infrastructure options and apply them.
pub async fn deploy(ctx: &StageContext) -> anyhow::Result<()> {
    let project = ctx.store.load_string(SAVED_GCP_PROJECT_ID)?;
    let region = ctx.store.load_string(SAVED_GCP_REGION_NAME)?;
    let image_id = ctx.store.load_artifact_id()?;

    let id = (ctx.unique_id)().to_lowercase();
    let names = cluster_names(&ctx.config, &id)?;
    ctx.store.save_string(SAVED_CONSUL_CLUSTER_NAME, &names.consul)?;
    ctx.store.save_string(SAVED_VAULT_CLUSTER_NAME, &names.vault)?;

    let machine_type = ctx.config.machine_type.as_str();
    let options = InfraOptions::new(&ctx.config.working_dir)
        .with_var(TFVAR_NAME_GCP_PROJECT_ID, project)
        .with_var(TFVAR_NAME_GCP_REGION, region)
        .with_var(TFVAR_NAME_CONSUL_SERVER_CLUSTER_NAME, names.consul.as_str())
        .with_var(TFVAR_NAME_CONSUL_SOURCE_IMAGE, image_id.as_str())
        .with_var(TFVAR_NAME_CONSUL_SERVER_CLUSTER_MACHINE_TYPE, machine_type)
        .with_var(TFVAR_NAME_VAULT_CLUSTER_NAME, names.vault.as_str())
        .with_var(TFVAR_NAME_VAULT_SOURCE_IMAGE, image_id.as_str())
        .with_var(TFVAR_NAME_VAULT_CLUSTER_MACHINE_TYPE, machine_type);

    // saved before apply: a half-applied deployment must still be destroyable
    ctx.store.save_infra_options(&options)?;

    log::info!(
        "[Stage] [deploy] applying consul={} vault={} from image {}",
        names.consul,
        names.vault,
        image_id
    );
    ctx.collaborators
        .infra
        .apply_all(&options)
        .await
        .context("applying infrastructure")?;
    Ok(())
}

/// SSH access to every instance, initialize + unseal, then probe one node.
pub async fn validate(ctx: &StageContext) -> anyhow::Result<()> {
    let project = ctx.store.load_string(SAVED_GCP_PROJECT_ID)?;
    let region = ctx.store.load_string(SAVED_GCP_REGION_NAME)?;
    let cluster_name = ctx.store.load_string(SAVED_VAULT_CLUSTER_NAME)?;

    let ssh_user = ctx.config.ssh_user.clone();
    let key_pair = ctx
        .collaborators
        .ssh
        .generate_rsa_key_pair(ctx.config.ssh_key_bits)
        .context("generating SSH key pair")?;

    let group = ctx
        .collaborators
        .cloud
        .fetch_instance_group(&project, &region, &cluster_name)
        .await
        .with_context(|| format!("fetching instance group {}", cluster_name))?;
    let instances = group
        .list_instances(&project)
        .await
        .with_context(|| format!("listing instances of {}", group.name()))?;
    if instances.is_empty() {
        bail!("instance group {} has no running instances", group.name());
    }
    log::info!("[Stage] [validate] {} instances in {}", instances.len(), group.name());

    // instances are independent and injection is idempotent per instance
    try_join_all(instances.iter().map(|instance| {
        let user = ssh_user.as_str();
        let public_key = key_pair.public_key.as_str();
        async move {
            instance
                .inject_ssh_key(user, public_key)
                .await
                .with_context(|| format!("adding SSH key to {}", instance.name()))
        }
    }))
    .await?;

    let target = HandshakeTarget {
        project,
        region,
        cluster_name,
        ssh_user,
        key_pair,
    };
    ctx.collaborators
        .handshake
        .initialize_and_unseal(&target)
        .await
        .context("initializing and unsealing cluster")?;

    let address = instances[0]
        .public_address()
        .await
        .with_context(|| format!("reading public address of {}", instances[0].name()))?;
    let status = ctx
        .collaborators
        .probe
        .check_healthy(&address)
        .await
        .with_context(|| format!("probing {}", address))?;
    if !status.is_healthy() {
        bail!("cluster node {} is {}", address, status.as_str());
    }
    log::info!("[Stage] [validate] {} is healthy", address);
    Ok(())
}

/// Reverse every effect an earlier stage may have had.
///
/// Every resource kind is attempted even when an earlier one failed. Inputs
/// that were never recorded (the stage producing them did not run or did not
/// finish) are logged and skipped, as are resources that no longer exist.
pub async fn teardown(ctx: &StageContext) -> Result<(), TeardownError> {
    let mut errors = TeardownError::default();

    destroy_infrastructure(ctx, &mut errors).await;
    delete_image(ctx, &mut errors).await;
    purge_certificate(ctx, &mut errors);

    if !errors.is_empty() {
        log::error!("[Teardown] {} cleanup failure(s)", errors.failures.len());
    }
    errors.into_result()
}

async fn destroy_infrastructure(ctx: &StageContext, errors: &mut TeardownError) {
    match ctx.store.try_load_infra_options() {
        Ok(Some(options)) => {
            log::info!("[Teardown] destroying infrastructure in {}", options.working_dir.display());
            if let Err(e) = ctx.collaborators.infra.destroy_all(&options).await {
                errors.push("infrastructure", format!("{:#}", e));
            }
        }
        Ok(None) => log::info!("[Teardown] no infrastructure options recorded, nothing to destroy"),
        Err(e) => errors.push("infrastructure", e),
    }
}

async fn delete_image(ctx: &StageContext, errors: &mut TeardownError) {
    let image_id = match ctx.store.try_load_artifact_id() {
        Ok(Some(id)) => id,
        Ok(None) => {
            log::info!("[Teardown] no image artifact recorded, nothing to delete");
            return;
        }
        Err(e) => {
            errors.push("image", e);
            return;
        }
    };
    let project = match ctx.store.try_load_string(SAVED_GCP_PROJECT_ID) {
        Ok(Some(project)) => project,
        Ok(None) => {
            log::warn!("[Teardown] image {} recorded without a project, cannot delete it", image_id);
            return;
        }
        Err(e) => {
            errors.push("image", e);
            return;
        }
    };

    let cloud = &ctx.collaborators.cloud;
    match cloud.fetch_image(&project, &image_id).await {
        Ok(Some(image)) => {
            log::info!("[Teardown] deleting image {}", image.id);
            if let Err(e) = cloud.delete_image(&image).await {
                errors.push("image", format!("{:#}", e));
            }
        }
        Ok(None) => log::warn!("[Teardown] image {} no longer exists", image_id),
        Err(e) => errors.push("image", format!("{:#}", e)),
    }
}

fn purge_certificate(ctx: &StageContext, errors: &mut TeardownError) {
    let tls = &ctx.collaborators.tls;
    let cert_dir = ctx.config.image_template_dir();
    match tls.load(&cert_dir) {
        Ok(Some(cert)) => {
            log::info!("[Teardown] purging TLS certificate files in {}", cert_dir.display());
            if let Err(e) = tls.purge(&cert) {
                errors.push("tls certificate", format!("{:#}", e));
            }
        }
        Ok(None) => log::info!("[Teardown] no TLS certificate in {}", cert_dir.display()),
        Err(e) => errors.push("tls certificate", format!("{:#}", e)),
    }
}
