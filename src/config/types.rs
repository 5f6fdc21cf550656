use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Namespace of the Restic resource (and of every object the sidecar creates)
    #[serde(default)]
    pub namespace: String,

    /// Name of the Restic resource driving this sidecar
    #[serde(default)]
    pub restic_name: String,

    /// Workload the sidecar is injected into
    #[serde(default)]
    pub workload: WorkloadReference,

    /// Local scratch space for restic (cache, temp files, CA certificates)
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Pushgateway base URL; metrics are not pushed when empty
    #[serde(default)]
    pub pushgateway_url: String,

    /// Node the pod is scheduled on
    #[serde(default)]
    pub node_name: String,

    /// Pod running the sidecar
    #[serde(default)]
    pub pod_name: String,

    /// Hostname named in backup events; read from the OS when empty
    #[serde(default)]
    pub local_hostname: String,

    /// Host recorded in snapshots; derived from the workload when empty
    #[serde(default)]
    pub snapshot_hostname: String,

    /// Repository sub-path appended to the backend prefix
    #[serde(default)]
    pub smart_prefix: String,

    /// Attempts for status patches that hit a write conflict
    #[serde(default = "default_max_num_requeues")]
    pub max_num_requeues: u32,

    /// Registry of the check job image
    #[serde(default = "default_docker_registry")]
    pub docker_registry: String,

    /// Tag of the check job image
    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    /// Create a dedicated service account and role binding for the check job
    #[serde(default)]
    pub enable_rbac: bool,

    /// Worker threads for the Kubernetes client runtime
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Explicit restic binary; resolved from PATH when unset
    #[serde(default)]
    pub restic_binary: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            restic_name: String::new(),
            workload: WorkloadReference::default(),
            scratch_dir: default_scratch_dir(),
            pushgateway_url: String::new(),
            node_name: String::new(),
            pod_name: String::new(),
            local_hostname: String::new(),
            snapshot_hostname: String::new(),
            smart_prefix: String::new(),
            max_num_requeues: default_max_num_requeues(),
            docker_registry: default_docker_registry(),
            image_tag: default_image_tag(),
            enable_rbac: false,
            num_threads: default_num_threads(),
            restic_binary: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Hostname of the machine running the sidecar
    ///
    /// Falls back to the pod name, then to the snapshot host, when the OS
    /// does not report one.
    pub fn resolved_local_hostname(&self) -> String {
        if !self.local_hostname.is_empty() {
            return self.local_hostname.clone();
        }
        os_hostname()
            .or_else(|| (!self.pod_name.is_empty()).then(|| self.pod_name.clone()))
            .unwrap_or_else(|| self.resolved_snapshot_hostname())
    }

    /// Hostname under which snapshots are recorded
    ///
    /// Pods of a Deployment, ReplicaSet or ReplicationController are
    /// interchangeable and share the workload name. StatefulSet pods keep
    /// their own identity and DaemonSet pods are tied to their node.
    pub fn resolved_snapshot_hostname(&self) -> String {
        if !self.snapshot_hostname.is_empty() {
            return self.snapshot_hostname.clone();
        }
        let fallback = || {
            if self.pod_name.is_empty() {
                "host-0".to_string()
            } else {
                self.pod_name.clone()
            }
        };
        match self.workload.kind() {
            Some(WorkloadKind::StatefulSet) => fallback(),
            Some(WorkloadKind::DaemonSet) if !self.node_name.is_empty() => self.node_name.clone(),
            Some(_) if !self.workload.name.is_empty() => self.workload.name.clone(),
            _ => fallback(),
        }
    }
}

/// Hostname as the kernel reports it
pub(crate) fn os_hostname() -> Option<String> {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
}

/// Reference to the workload running the sidecar
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WorkloadReference {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

impl WorkloadReference {
    pub fn is_set(&self) -> bool {
        !self.kind.is_empty() && !self.name.is_empty()
    }

    /// Parsed workload kind, accepting the lowercase and plural spellings kubectl accepts
    pub fn kind(&self) -> Option<WorkloadKind> {
        WorkloadKind::parse(&self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    ReplicaSet,
    ReplicationController,
    DaemonSet,
    StatefulSet,
}

impl WorkloadKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Some(Self::Deployment),
            "replicaset" | "replicasets" | "rs" => Some(Self::ReplicaSet),
            "replicationcontroller" | "replicationcontrollers" | "rc" => {
                Some(Self::ReplicationController)
            }
            "daemonset" | "daemonsets" | "ds" => Some(Self::DaemonSet),
            "statefulset" | "statefulsets" => Some(Self::StatefulSet),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment => write!(f, "Deployment"),
            Self::ReplicaSet => write!(f, "ReplicaSet"),
            Self::ReplicationController => write!(f, "ReplicationController"),
            Self::DaemonSet => write!(f, "DaemonSet"),
            Self::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Directory for rotated log files; console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_max_files")]
    pub max_files: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            level: default_log_level(),
            format: LogFormat::default(),
            max_files: default_log_max_files(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// Default value functions

fn default_scratch_dir() -> PathBuf { PathBuf::from("/tmp") }
fn default_max_num_requeues() -> u32 { 5 }
fn default_docker_registry() -> String { "appscode".to_string() }
fn default_image_tag() -> String { "canary".to_string() }
fn default_num_threads() -> usize { 1 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
