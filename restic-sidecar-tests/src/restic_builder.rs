//! Fluent builder for `Restic` resources

use crate::fixtures::{NAMESPACE, SECRET_NAME};
use k8s_openapi::api::core::v1::HostPathVolumeSource;
use restic_sidecar::api::{
    Backend, FileGroup, LocalSpec, LocalVolumeSource, Restic, ResticSpec, ResticStatus,
    RetentionPolicy, S3Spec,
};

pub const DEFAULT_POLICY: &str = "keep-last-5";

/// Builder for creating test Restic resources
pub struct ResticBuilder {
    name: String,
    spec: ResticSpec,
    status: Option<ResticStatus>,
}

impl ResticBuilder {
    fn with_backend(name: &str, backend: Backend) -> Self {
        Self {
            name: name.to_string(),
            spec: ResticSpec {
                selector: None,
                file_groups: Vec::new(),
                backend,
                schedule: "@every 1m".to_string(),
                retention_policies: vec![RetentionPolicy {
                    name: DEFAULT_POLICY.to_string(),
                    keep_last: Some(5),
                    prune: true,
                    ..Default::default()
                }],
                paused: false,
            },
            status: None,
        }
    }

    /// Restic backed by an S3 bucket
    pub fn s3(name: &str) -> Self {
        Self::with_backend(
            name,
            Backend {
                storage_secret_name: SECRET_NAME.to_string(),
                s3: Some(S3Spec {
                    endpoint: "s3.amazonaws.com".to_string(),
                    bucket: "stash-qa".to_string(),
                    prefix: "demo".to_string(),
                }),
                ..Default::default()
            },
        )
    }

    /// Restic backed by a host path
    pub fn local(name: &str) -> Self {
        Self::with_backend(
            name,
            Backend {
                storage_secret_name: SECRET_NAME.to_string(),
                local: Some(LocalSpec {
                    volume_source: LocalVolumeSource {
                        host_path: Some(HostPathVolumeSource {
                            path: "/data/stash-test/restic-repo".to_string(),
                            type_: None,
                        }),
                        ..Default::default()
                    },
                    mount_path: "/safe/data".to_string(),
                    sub_path: None,
                }),
                ..Default::default()
            },
        )
    }

    /// Add a file group under the default retention policy
    pub fn file_group(self, path: &str) -> Self {
        self.file_group_with_policy(path, DEFAULT_POLICY)
    }

    pub fn file_group_with_policy(mut self, path: &str, policy: &str) -> Self {
        self.spec.file_groups.push(FileGroup {
            path: path.to_string(),
            retention_policy_name: policy.to_string(),
            tags: Vec::new(),
        });
        self
    }

    pub fn retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.spec.retention_policies.push(policy);
        self
    }

    pub fn paused(mut self) -> Self {
        self.spec.paused = true;
        self
    }

    /// Start from an existing status, as left by earlier sessions
    pub fn status(mut self, status: ResticStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> Restic {
        let mut restic = Restic::new(&self.name, self.spec);
        restic.metadata.namespace = Some(NAMESPACE.to_string());
        restic.status = self.status;
        restic
    }
}
