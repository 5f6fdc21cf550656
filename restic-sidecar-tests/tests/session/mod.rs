//! Session scenarios for restic-sidecar
//!
//! Each scenario runs a full session through `BackupController` against an
//! in-memory cluster and restic.

mod metrics;
mod rbac;
mod scenarios;
mod status;
