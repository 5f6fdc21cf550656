use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, HostPathVolumeSource, NFSVolumeSource, PersistentVolumeClaimVolumeSource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Specification for a Restic backup
///
/// Declares the file groups a sidecar archives on every session, the
/// repository backend, and the named retention policies file groups refer to.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stash.appscode.com",
    version = "v1alpha1",
    kind = "Restic",
    plural = "restics",
    namespaced,
    status = "ResticStatus",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Backups","type":"integer","jsonPath":".status.backupCount"}"#,
    printcolumn = r#"{"name":"Last","type":"date","jsonPath":".status.lastBackupTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResticSpec {
    /// Selects the workloads whose pods run the sidecar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Paths to back up, processed in declaration order
    #[serde(default)]
    pub file_groups: Vec<FileGroup>,

    /// Repository backend
    pub backend: Backend,

    /// Cron schedule; interpreted by whatever triggers sessions, not by the sidecar
    #[serde(default)]
    pub schedule: String,

    /// Named retention policies referenced by file groups
    #[serde(default)]
    pub retention_policies: Vec<RetentionPolicy>,

    /// Skip sessions while set
    #[serde(default)]
    pub paused: bool,
}

/// One path plus the retention policy applied to its snapshots
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    /// Absolute path inside the sidecar container
    pub path: String,

    /// Name of an entry in `retentionPolicies`
    pub retention_policy_name: String,

    /// Tags attached to every snapshot of this path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Snapshot retention rule, mapped onto `restic forget` flags
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_hourly: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_yearly: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keep_tags: Vec<String>,
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Repository backend; exactly one storage kind must be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Secret holding `RESTIC_PASSWORD` and the storage credentials
    pub storage_secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b2: Option<B2Spec>,
}

/// Repository on a volume mounted into the pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpec {
    #[serde(flatten)]
    pub volume_source: LocalVolumeSource,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

/// Volume holding a local repository; exactly one source is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NFSVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
}

impl LocalVolumeSource {
    /// Number of sources set
    pub fn source_count(&self) -> usize {
        [
            self.host_path.is_some(),
            self.persistent_volume_claim.is_some(),
            self.nfs.is_some(),
            self.empty_dir.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcsSpec {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSpec {
    pub container: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwiftSpec {
    pub container: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct B2Spec {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

/// Bookkeeping for successful sessions only
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResticStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_backup_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_duration: Option<String>,
    #[serde(default)]
    pub backup_count: i64,
}

/// Storage kind selected by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    S3,
    Gcs,
    Azure,
    Swift,
    B2,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::S3 => write!(f, "s3"),
            Self::Gcs => write!(f, "gcs"),
            Self::Azure => write!(f, "azure"),
            Self::Swift => write!(f, "swift"),
            Self::B2 => write!(f, "b2"),
        }
    }
}

impl Backend {
    /// Storage kinds that are configured on this backend
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        if self.local.is_some() {
            kinds.push(BackendKind::Local);
        }
        if self.s3.is_some() {
            kinds.push(BackendKind::S3);
        }
        if self.gcs.is_some() {
            kinds.push(BackendKind::Gcs);
        }
        if self.azure.is_some() {
            kinds.push(BackendKind::Azure);
        }
        if self.swift.is_some() {
            kinds.push(BackendKind::Swift);
        }
        if self.b2.is_some() {
            kinds.push(BackendKind::B2);
        }
        kinds
    }

    /// The single configured storage kind, if the backend is well formed
    pub fn kind(&self) -> Option<BackendKind> {
        match self.kinds().as_slice() {
            [kind] => Some(*kind),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.storage_secret_name.trim().is_empty() {
            return Err("backend.storageSecretName is empty".to_string());
        }

        let kinds = self.kinds();
        match kinds.len() {
            0 => return Err("backend has no storage configured".to_string()),
            1 => {}
            _ => {
                let names: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
                return Err(format!(
                    "backend must configure exactly one storage, found: {}",
                    names.join(", ")
                ));
            }
        }

        let missing = |field: &str| Err(format!("backend.{} is empty", field));
        if let Some(ref local) = self.local {
            if local.mount_path.trim().is_empty() {
                return missing("local.mountPath");
            }
            if local.volume_source.source_count() != 1 {
                return Err(
                    "backend.local needs exactly one of hostPath, persistentVolumeClaim, nfs, emptyDir"
                        .to_string(),
                );
            }
        }
        if let Some(ref s3) = self.s3 {
            if s3.endpoint.trim().is_empty() {
                return missing("s3.endpoint");
            }
            if s3.bucket.trim().is_empty() {
                return missing("s3.bucket");
            }
        }
        if let Some(ref gcs) = self.gcs {
            if gcs.bucket.trim().is_empty() {
                return missing("gcs.bucket");
            }
        }
        if let Some(ref azure) = self.azure {
            if azure.container.trim().is_empty() {
                return missing("azure.container");
            }
        }
        if let Some(ref swift) = self.swift {
            if swift.container.trim().is_empty() {
                return missing("swift.container");
            }
        }
        if let Some(ref b2) = self.b2 {
            if b2.bucket.trim().is_empty() {
                return missing("b2.bucket");
            }
        }

        Ok(())
    }
}

impl ResticSpec {
    /// Check the spec is internally consistent before any repository access
    pub fn validate(&self) -> Result<(), String> {
        if self.file_groups.is_empty() {
            return Err("no file groups declared".to_string());
        }

        let mut policy_names = HashSet::new();
        for policy in &self.retention_policies {
            if policy.name.trim().is_empty() {
                return Err("retention policy with empty name".to_string());
            }
            if !policy_names.insert(policy.name.as_str()) {
                return Err(format!("duplicate retention policy: {}", policy.name));
            }
        }

        for fg in &self.file_groups {
            if fg.path.trim().is_empty() {
                return Err("file group with empty path".to_string());
            }
            if !fg.path.starts_with('/') {
                return Err(format!("file group path must be absolute: {}", fg.path));
            }
            if !policy_names.contains(fg.retention_policy_name.as_str()) {
                return Err(format!(
                    "file group {} refers to unknown retention policy: {}",
                    fg.path, fg.retention_policy_name
                ));
            }
        }

        self.backend.validate()
    }

    /// Look up the retention policy a file group refers to
    pub fn retention_policy(&self, fg: &FileGroup) -> Option<&RetentionPolicy> {
        self.retention_policies
            .iter()
            .find(|p| p.name == fg.retention_policy_name)
    }
}
