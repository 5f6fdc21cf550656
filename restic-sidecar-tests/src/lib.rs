//! Test utilities for restic-sidecar
//!
//! Shared fixtures, a fluent `Restic` builder and a harness that wires a
//! `BackupController` to in-memory collaborators.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ResticBuilder, TestContext};
//!
//! #[test]
//! fn my_test() {
//!     let restic = ResticBuilder::s3("stash-demo").file_group("/data").build();
//!     let ctx = TestContext::new().with_restic(restic);
//!     let outcome = ctx.controller().backup();
//!     // ... assertions against ctx.cluster, ctx.restic, ctx.events
//! }
//! ```

pub mod fixtures;
pub mod restic_builder;
pub mod test_context;

// Re-export commonly used items
pub use fixtures::*;
pub use restic_builder::ResticBuilder;
pub use test_context::TestContext;

// Re-export types from the main crate for convenience
pub use restic_sidecar::api::{Backend, FileGroup, Restic, ResticSpec, ResticStatus, RetentionPolicy};
pub use restic_sidecar::config::ControllerConfig;
pub use restic_sidecar::managers::events::EventReason;
pub use restic_sidecar::utils::restic::ResticEnv;
pub use restic_sidecar::{BackupController, ProvisionError, SessionError, SessionOutcome, SetupError};

// Re-export mock implementations from the main crate
pub use restic_sidecar::managers::events::mock::MockEventRecorder;
pub use restic_sidecar::utils::cluster_ops::mock::MockClusterOps;
pub use restic_sidecar::utils::executor::mock::MockExecutor;
pub use restic_sidecar::utils::metrics::mock::MockPusher;
pub use restic_sidecar::utils::restic_ops::mock::MockResticOps;

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
