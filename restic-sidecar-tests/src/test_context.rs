//! Test context and harness for session testing
//!
//! Provides a controller wired to in-memory collaborators plus a scratch
//! directory that lives as long as the context.

use crate::fixtures::{NAMESPACE, POD_NAME, RESTIC_NAME};
use k8s_openapi::api::core::v1::Secret;
use restic_sidecar::api::Restic;
use restic_sidecar::config::ControllerConfig;
use restic_sidecar::managers::events::mock::MockEventRecorder;
use restic_sidecar::utils::cluster_ops::mock::MockClusterOps;
use restic_sidecar::utils::metrics::mock::MockPusher;
use restic_sidecar::utils::restic_ops::mock::MockResticOps;
use restic_sidecar::BackupController;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    /// Temporary directory used as scratch space
    temp_dir: TempDir,
    pub config: ControllerConfig,
    pub cluster: MockClusterOps,
    pub restic: MockResticOps,
    pub events: MockEventRecorder,
    /// Set by [`TestContext::with_pushgateway`]
    pub pusher: Option<MockPusher>,
}

impl TestContext {
    /// Create a new test context for [`RESTIC_NAME`] in [`NAMESPACE`]
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = ControllerConfig {
            namespace: NAMESPACE.to_string(),
            restic_name: RESTIC_NAME.to_string(),
            scratch_dir: temp_dir.path().join("scratch"),
            pod_name: POD_NAME.to_string(),
            local_hostname: POD_NAME.to_string(),
            ..Default::default()
        };
        Self {
            temp_dir,
            config,
            cluster: MockClusterOps::new(),
            restic: MockResticOps::new(),
            events: MockEventRecorder::new(),
            pusher: None,
        }
    }

    pub fn with_restic(mut self, restic: Restic) -> Self {
        self.cluster = self.cluster.with_restic(restic);
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.cluster = self.cluster.with_secret(secret);
        self
    }

    pub fn with_cluster(mut self, cluster: MockClusterOps) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_restic_ops(mut self, restic: MockResticOps) -> Self {
        self.restic = restic;
        self
    }

    pub fn with_pushgateway(mut self, pusher: MockPusher) -> Self {
        self.config.pushgateway_url = "http://pushgateway:9091".to_string();
        self.pusher = Some(pusher);
        self
    }

    pub fn with_rbac(mut self) -> Self {
        self.config.enable_rbac = true;
        self
    }

    /// Adjust the controller configuration
    pub fn configure(mut self, f: impl FnOnce(&mut ControllerConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Build a controller sharing this context's mocks
    ///
    /// Every controller built from one context sees the same cluster, so
    /// calling this twice models two consecutive sidecar runs.
    pub fn controller(&self) -> BackupController {
        let controller = BackupController::new(
            self.config.clone(),
            Box::new(self.cluster.clone()),
            Box::new(self.restic.clone()),
            Box::new(self.events.clone()),
        );
        match self.pusher {
            Some(ref pusher) => controller.with_pusher(Box::new(pusher.clone())),
            None => controller,
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.config.scratch_dir
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
