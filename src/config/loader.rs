//! Config file loader and serialization.

use crate::config::HarnessConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::Path;

/// Load config from JSON file.
pub fn load_config_from_file(path: &Path) -> Result<HarnessConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: HarnessConfig = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    config.validate()?;

    Ok(config)
}

/// Save config to JSON file.
pub fn save_config_to_file(config: &HarnessConfig, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content = serde_json::to_string_pretty(config).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Load the config at `path` if given (defaults otherwise), then apply
/// `STAGE_HARNESS_*` overrides from the process environment.
pub fn load_effective_config(path: Option<&Path>) -> Result<HarnessConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config_from_file(path)?,
        None => HarnessConfig::default(),
    };
    config.apply_env(std::env::vars())?;
    config.validate()?;
    Ok(config)
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Configuration file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Configuration file must have .json extension".to_string(),
            ))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/harness.json");

        let original = HarnessConfig {
            machine_type: "n1-standard-2".to_string(),
            os_name: "ubuntu-18".to_string(),
            ..HarnessConfig::default()
        };

        save_config_to_file(&original, &config_path).expect("Failed to save config");
        assert!(config_path.exists(), "Config file should exist after save");

        let loaded = load_config_from_file(&config_path).expect("Failed to load config");
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.json");
        let mut file = fs::File::create(&config_path).unwrap();
        file.write_all(br#"{ "ssh_user": "ops" }"#).unwrap();

        let loaded = load_config_from_file(&config_path).unwrap();
        assert_eq!(loaded.ssh_user, "ops");
        assert_eq!(loaded.machine_type, "g1-small");
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_config_from_file(&temp_dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.json");
        fs::write(&config_path, "{ not json").unwrap();

        let result = load_config_from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::InvalidJson(_))));
    }

    #[test]
    fn test_effective_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("harness.json");
        fs::write(&config_path, r#"{ "os_name": "ubuntu-18" }"#).unwrap();

        let config = load_effective_config(Some(&config_path)).unwrap();
        assert_eq!(config.os_name, "ubuntu-18");
        assert!(load_effective_config(Some(&temp_dir.path().join("harness.toml"))).is_err());
    }

    #[test]
    fn test_validate_config_path() {
        assert!(validate_config_path(Path::new("harness.json")).is_ok());
        assert!(validate_config_path(Path::new("harness.toml")).is_err());
        assert!(validate_config_path(Path::new("harness")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }
}
