use super::types::*;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load configuration from a TOML file without validating it
///
/// Callers apply command-line overrides first and validate afterwards.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ControllerConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ControllerConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Validate the configuration
pub fn validate_config(config: &ControllerConfig) -> Result<()> {
    if config.namespace.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "namespace is not set".to_string(),
        ));
    }

    if config.restic_name.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "restic_name is not set".to_string(),
        ));
    }

    if config.scratch_dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "scratch_dir is not set".to_string(),
        ));
    }

    if !config.pushgateway_url.is_empty()
        && !config.pushgateway_url.starts_with("http://")
        && !config.pushgateway_url.starts_with("https://")
    {
        return Err(ConfigError::ValidationError(format!(
            "pushgateway_url must be an http(s) URL: {}",
            config.pushgateway_url
        )));
    }

    if !config.workload.kind.is_empty() && config.workload.kind().is_none() {
        return Err(ConfigError::ValidationError(format!(
            "unsupported workload kind: {}",
            config.workload.kind
        )));
    }

    if config.num_threads == 0 {
        return Err(ConfigError::ValidationError(
            "num_threads must be at least 1".to_string(),
        ));
    }

    if config.max_num_requeues == 0 {
        return Err(ConfigError::ValidationError(
            "max_num_requeues must be at least 1".to_string(),
        ));
    }

    if config.enable_rbac && config.docker_registry.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "docker_registry is required to build the check job image".to_string(),
        ));
    }

    Ok(())
}
