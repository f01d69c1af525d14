//! Fixture store: durable per-run key/value persistence between stages.
//!
//! Stages of one run may execute in different processes (a failed run is
//! resumed by re-invoking only some stages), so every value a later stage or
//! teardown needs is written here instead of being kept in memory.
//!
//! Layout: `<scope>/.test-data/<key>.json`, one JSON document per key. The
//! artifact identifier and the infrastructure option bag are ordinary keys
//! with reserved names.
//!
//! Writes go to a temp file in the same directory, are fsynced, atomically
//! renamed over the target, and the directory is fsynced. A crash right after
//! a `save_*` call returns cannot lose the value.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::FixtureError;
use crate::models::{ImageId, InfraOptions};

/// Directory (inside the scope) holding the fixtures.
pub const DATA_DIR_NAME: &str = ".test-data";

/// Reserved key of the single artifact slot.
pub const ARTIFACT_KEY: &str = "Artifact";

/// Reserved key of the saved infrastructure options.
pub const INFRA_OPTIONS_KEY: &str = "InfraOptions";

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid key pattern"));

type FixtureResult<T> = Result<T, FixtureError>;

/// Durable fixture store bound to one run scope.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    scope: PathBuf,
    data_dir: PathBuf,
}

impl FixtureStore {
    /// Open (creating if needed) the store of the given run scope directory.
    pub fn open(scope: impl Into<PathBuf>) -> FixtureResult<Self> {
        let scope = scope.into();
        let data_dir = scope.join(DATA_DIR_NAME);
        fs::create_dir_all(&data_dir)?;
        Ok(FixtureStore { scope, data_dir })
    }

    pub fn scope(&self) -> &Path {
        &self.scope
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, key: &str) -> FixtureResult<PathBuf> {
        if !KEY_PATTERN.is_match(key) {
            return Err(FixtureError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(format!("{}.json", key)))
    }

    fn not_found(&self, key: &str) -> FixtureError {
        FixtureError::NotFound {
            scope: self.scope.display().to_string(),
            key: key.to_string(),
        }
    }

    /// Store `value` under `key`, replacing any earlier value.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> FixtureResult<()> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| {
            FixtureError::InvalidJson {
                key: key.to_string(),
                source,
            }
        })?;

        // The data dir may have been cleaned by an operator between stages.
        fs::create_dir_all(&self.data_dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.data_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| FixtureError::IoError(e.error))?;
        sync_dir(&self.data_dir)?;

        log::debug!("[Fixture] saved {} -> {}", key, path.display());
        Ok(())
    }

    /// Load the value stored under `key`. A missing key is `NotFound`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> FixtureResult<T> {
        self.try_load(key)?.ok_or_else(|| self.not_found(key))
    }

    /// Like [`load`](Self::load) but a missing key is `Ok(None)`.
    pub fn try_load<T: DeserializeOwned>(&self, key: &str) -> FixtureResult<Option<T>> {
        let path = self.path_for(key)?;
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FixtureError::IoError(e)),
        };
        let value = serde_json::from_slice(&content).map_err(|source| {
            FixtureError::InvalidJson {
                key: key.to_string(),
                source,
            }
        })?;
        Ok(Some(value))
    }

    pub fn save_string(&self, key: &str, value: &str) -> FixtureResult<()> {
        self.save(key, value)
    }

    pub fn load_string(&self, key: &str) -> FixtureResult<String> {
        self.load(key)
    }

    pub fn try_load_string(&self, key: &str) -> FixtureResult<Option<String>> {
        self.try_load(key)
    }

    pub fn save_artifact_id(&self, id: &ImageId) -> FixtureResult<()> {
        self.save(ARTIFACT_KEY, id)
    }

    pub fn load_artifact_id(&self) -> FixtureResult<ImageId> {
        self.load(ARTIFACT_KEY)
    }

    pub fn try_load_artifact_id(&self) -> FixtureResult<Option<ImageId>> {
        self.try_load(ARTIFACT_KEY)
    }

    pub fn save_infra_options(&self, options: &InfraOptions) -> FixtureResult<()> {
        self.save(INFRA_OPTIONS_KEY, options)
    }

    pub fn load_infra_options(&self) -> FixtureResult<InfraOptions> {
        self.load(INFRA_OPTIONS_KEY)
    }

    pub fn try_load_infra_options(&self) -> FixtureResult<Option<InfraOptions>> {
        self.try_load(INFRA_OPTIONS_KEY)
    }

    pub fn contains(&self, key: &str) -> FixtureResult<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> FixtureResult<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(FixtureError::IoError(e)),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.insert(stem.to_string());
                }
            }
        }
        Ok(keys)
    }

    /// Delete every fixture of this scope. Only ever called on explicit
    /// operator request; the orchestrator never cleans up fixtures itself.
    pub fn clean(&self) -> FixtureResult<()> {
        match fs::remove_dir_all(&self.data_dir) {
            Ok(()) => {
                log::info!("[Fixture] removed {}", self.data_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FixtureError::IoError(e)),
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
