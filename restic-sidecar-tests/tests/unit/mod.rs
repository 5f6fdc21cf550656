//! Unit tests for restic-sidecar building blocks
//!
//! These tests exercise pure functions through the public API.

mod config;
mod provisioner;
mod restic;
