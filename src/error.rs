//! Session error taxonomy
//!
//! Each variant of [`SessionError`] names the stage that failed, so the
//! message printed by the entry point reads "failed to setup backup: ..." or
//! "failed to run backup: ...".

use crate::utils::cluster_ops::ClusterError;

/// Failures before any data is archived; no cluster state has changed
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("environment error: {0}")]
    Environment(String),

    #[error("{0}")]
    NotFound(ClusterError),

    #[error("invalid Restic {name}: {reason}")]
    Validation { name: String, reason: String },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("cluster error: {0}")]
    Cluster(ClusterError),
}

impl From<ClusterError> for SetupError {
    fn from(err: ClusterError) -> Self {
        if err.is_not_found() {
            SetupError::NotFound(err)
        } else {
            SetupError::Cluster(err)
        }
    }
}

/// Failures creating the check job or its identity; the backup stands
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to create job {name}: {source}")]
    Job {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("job {0} was created without a uid")]
    MissingUid(String),

    #[error("error ensuring rbac for check job {name}: {source}")]
    Rbac {
        name: String,
        #[source]
        source: ClusterError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to setup backup: {0}")]
    Setup(#[from] SetupError),

    #[error("failed to run backup: backup of {path} failed: {source:#}")]
    Backup {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to run backup: retention for {path} failed: {source:#}")]
    Retention {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create check job: {0}")]
    Provision(#[from] ProvisionError),

    #[error("failed to check repository: {0:#}")]
    Check(anyhow::Error),

    #[error("failed to register session metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SessionError {
    /// True when the data was archived and only a later step failed
    pub fn backup_succeeded(&self) -> bool {
        matches!(self, SessionError::Provision(_))
    }
}
