//! Configuration module for the stage harness.
//!
//! # Module Structure
//!
//! - `loader`: load/save `HarnessConfig` as JSON
//! - `StageSelection`: which stages run in this invocation
//!
//! Stage selection is read from the environment so a developer can iterate
//! on one stage locally:
//!
//! - `RUN_STAGES=validate,teardown` runs only the listed stages (empty or
//!   unset means all stages)
//! - `SKIP_<stage>=1` skips one stage, e.g. `SKIP_teardown=1` to keep the
//!   deployed cluster around for another `validate` pass

pub mod loader;

use std::collections::BTreeSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Comma separated allow-list of stage names.
pub const RUN_STAGES_ENV: &str = "RUN_STAGES";

/// Prefix of the per-stage skip variables.
pub const SKIP_ENV_PREFIX: &str = "SKIP_";

/// Prefix of the environment overrides for `HarnessConfig` fields.
pub const CONFIG_ENV_PREFIX: &str = "STAGE_HARNESS_";

// GCE resource names: lowercase letter first, then lowercase letters, digits
// and dashes, no trailing dash, at most 63 characters.
static RESOURCE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid resource name pattern")
});

/// True when `name` is usable as a cloud resource name.
pub fn is_valid_resource_name(name: &str) -> bool {
    RESOURCE_NAME.is_match(name)
}

/// Settings of one harness run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Run scope: the infrastructure module lives here and fixtures are
    /// stored under `<working_dir>/.test-data`.
    pub working_dir: PathBuf,
    /// Image builder template, relative to `working_dir`.
    pub image_template: PathBuf,
    pub os_name: String,
    pub machine_type: String,
    pub ssh_user: String,
    pub ssh_key_bits: u32,
    pub consul_cluster_prefix: String,
    pub vault_cluster_prefix: String,
    /// Treat Ctrl-C as a stage failure so teardown still runs.
    ///
    /// Listening for Ctrl-C replaces the default SIGINT action for the whole
    /// process and it is never restored: once a run has started, Ctrl-C no
    /// longer kills the process, and a second Ctrl-C during teardown is
    /// ignored. Stop a stuck teardown with SIGTERM/SIGKILL, or turn this off
    /// when the embedding program handles signals itself.
    pub trap_interrupt: bool,
    /// Accept the self-signed certificate when probing cluster health.
    pub accept_invalid_certs: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            working_dir: PathBuf::from("."),
            image_template: PathBuf::from("examples/vault-consul-image/vault-consul.json"),
            os_name: "ubuntu-16".to_string(),
            machine_type: "g1-small".to_string(),
            ssh_user: "terratest".to_string(),
            ssh_key_bits: 2048,
            consul_cluster_prefix: "consul-test".to_string(),
            vault_cluster_prefix: "vault-test".to_string(),
            trap_interrupt: true,
            accept_invalid_certs: true,
        }
    }
}

impl HarnessConfig {
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn image_template_path(&self) -> PathBuf {
        self.working_dir.join(&self.image_template)
    }

    /// Directory holding the image template; the TLS certificate is
    /// persisted here so the image builder can pick it up.
    pub fn image_template_dir(&self) -> PathBuf {
        match self.image_template_path().parent() {
            Some(parent) => parent.to_path_buf(),
            None => self.working_dir.clone(),
        }
    }

    /// Apply `STAGE_HARNESS_<FIELD>` overrides from the given variables.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(CONFIG_ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match field {
                "WORKING_DIR" => self.working_dir = PathBuf::from(value),
                "IMAGE_TEMPLATE" => self.image_template = PathBuf::from(value),
                "OS_NAME" => self.os_name = value.to_string(),
                "MACHINE_TYPE" => self.machine_type = value.to_string(),
                "SSH_USER" => self.ssh_user = value.to_string(),
                "SSH_KEY_BITS" => {
                    self.ssh_key_bits = value.parse().map_err(|_| {
                        ConfigError::ValidationFailed(format!(
                            "{}SSH_KEY_BITS must be a number, got '{}'",
                            CONFIG_ENV_PREFIX, value
                        ))
                    })?
                }
                "TRAP_INTERRUPT" => self.trap_interrupt = parse_flag(value),
                "ACCEPT_INVALID_CERTS" => self.accept_invalid_certs = parse_flag(value),
                other => log::warn!("[Config] ignoring unknown override {}{}", CONFIG_ENV_PREFIX, other),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("os_name", &self.os_name),
            ("machine_type", &self.machine_type),
            ("ssh_user", &self.ssh_user),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot be empty",
                    field
                )));
            }
        }

        // prefix + "-" + 12 char suffix must still be a valid resource name
        for prefix in [&self.consul_cluster_prefix, &self.vault_cluster_prefix] {
            let sample = format!("{}-{}", prefix, "a".repeat(12));
            if !is_valid_resource_name(&sample) {
                return Err(ConfigError::ValidationFailed(format!(
                    "cluster prefix '{}' does not produce valid resource names",
                    prefix
                )));
            }
        }

        if self.ssh_key_bits < 2048 {
            return Err(ConfigError::ValidationFailed(format!(
                "ssh_key_bits must be at least 2048, got {}",
                self.ssh_key_bits
            )));
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Which stages run in this invocation.
///
/// Pure data: resolving a stage never looks at the stage body or at fixture
/// contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageSelection {
    only: Option<BTreeSet<String>>,
    skipped: BTreeSet<String>,
}

impl StageSelection {
    /// Every stage runs.
    pub fn all() -> Self {
        StageSelection::default()
    }

    /// Only the named stages run. An empty list means all stages.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        StageSelection {
            only: if names.is_empty() { None } else { Some(names) },
            skipped: BTreeSet::new(),
        }
    }

    pub fn skip(mut self, name: impl Into<String>) -> Self {
        self.skipped.insert(name.into());
        self
    }

    pub fn is_selected(&self, stage: &str) -> bool {
        if self.skipped.contains(stage) {
            return false;
        }
        match &self.only {
            Some(only) => only.contains(stage),
            None => true,
        }
    }

    /// Selection from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Selection from `RUN_STAGES` and `SKIP_<stage>` variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut selection = StageSelection::all();
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref();
            if key == RUN_STAGES_ENV {
                let names: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect();
                selection.only = StageSelection::only(names).only;
            } else if let Some(stage) = key.strip_prefix(SKIP_ENV_PREFIX) {
                if !stage.is_empty() && !value.is_empty() {
                    selection.skipped.insert(stage.to_string());
                }
            }
        }
        selection
    }
}
