//! Custom resource types read by the backup sidecar
//!
//! The `Restic` resource declares what to back up (file groups), where to
//! store it (backend) and how long to keep it (retention policies). The
//! sidecar only reads the spec and writes the `status` subresource.

mod restic;

pub use restic::*;

/// API group of the Restic resource
pub const GROUP: &str = "stash.appscode.com";

/// API version of the Restic resource
pub const VERSION: &str = "v1alpha1";

/// Label value shared by every object the sidecar creates
pub const APP_LABEL_STASH: &str = "stash";
