//! Configuration module for restic-sidecar
//!
//! The sidecar is configured from an optional TOML file whose values are
//! then overridden by command-line flags (or the environment variables
//! backing them), and validated last.
//!
//! ## Example Usage
//!
//! ```no_run
//! use restic_sidecar::config;
//!
//! let mut config = config::load_config("sidecar.toml")?;
//! config.pod_name = "stash-demo-0".to_string();
//! config::validate_config(&config)?;
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{load_config, validate_config, ConfigError, Result};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
