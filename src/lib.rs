//! Restic Sidecar Library
//!
//! Runs backup sessions for a `Restic` resource: back up each file group with
//! restic, apply retention, record status and metrics, and create a job that
//! checks the repository afterwards.

pub mod api;
pub mod config;
pub mod error;
pub mod managers;
pub mod utils;

// Re-export commonly used types
pub use api::{Restic, ResticSpec, ResticStatus};
pub use config::{load_config, validate_config, ControllerConfig};
pub use error::{ProvisionError, SessionError, SetupError};
pub use managers::controller::{BackupController, SessionOutcome};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
