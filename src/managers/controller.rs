//! Backup controller - runs one session for a Restic

use crate::api::Restic;
use crate::config::ControllerConfig;
use crate::error::{ProvisionError, SessionError, SetupError};
use crate::managers::events::{EventReason, EventRecorder};
use crate::managers::provisioner;
use crate::managers::session::{self, SessionContext};
use crate::managers::status;
use crate::utils::cluster_ops::ClusterOperations;
use crate::utils::locker::SessionSlot;
use crate::utils::metrics::{sanitize_label_value, MetricsPusher, PushTarget, SessionMetrics};
use crate::utils::restic::check_secret;
use crate::utils::restic_ops::{ResticEnv, ResticOperations};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use std::fs;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const SCRATCH_MARKER_FILE: &str = ".stash";

/// How a session ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The Restic is paused; nothing ran
    Paused,
    /// Every file group was backed up and the check job was created
    Completed { check_job: String },
}

/// Setup failure, with the Restic when it was fetched before failing
#[derive(Debug)]
pub struct SetupFailure {
    pub restic: Option<Restic>,
    pub error: SetupError,
}

impl SetupFailure {
    fn before_fetch(error: SetupError) -> Self {
        Self {
            restic: None,
            error,
        }
    }

    fn with(restic: &Restic, error: SetupError) -> Self {
        Self {
            restic: Some(restic.clone()),
            error,
        }
    }
}

/// Metrics of a running session, recorded when dropped
///
/// Counts as failed unless `succeeded` is set, so an early return or a
/// panic in the file group loop still pushes a failed session.
struct SessionRecord<'a> {
    controller: &'a BackupController,
    restic: &'a Restic,
    metrics: SessionMetrics,
    start: DateTime<Utc>,
    started: Instant,
    succeeded: bool,
}

impl<'a> SessionRecord<'a> {
    fn begin(controller: &'a BackupController, restic: &'a Restic) -> Result<Self, SessionError> {
        Ok(Self {
            controller,
            restic,
            metrics: SessionMetrics::new()?,
            start: Utc::now(),
            started: Instant::now(),
            succeeded: false,
        })
    }
}

impl Drop for SessionRecord<'_> {
    fn drop(&mut self) {
        self.controller.record(
            self.restic,
            &self.metrics,
            self.start,
            self.started.elapsed(),
            self.succeeded,
        );
    }
}

pub struct BackupController {
    config: ControllerConfig,
    cluster: Box<dyn ClusterOperations>,
    restic: Box<dyn ResticOperations>,
    events: Box<dyn EventRecorder>,
    pusher: Option<Box<dyn MetricsPusher>>,
    slot: SessionSlot,
}

impl BackupController {
    pub fn new(
        config: ControllerConfig,
        cluster: Box<dyn ClusterOperations>,
        restic: Box<dyn ResticOperations>,
        events: Box<dyn EventRecorder>,
    ) -> Self {
        Self {
            config,
            cluster,
            restic,
            events,
            pusher: None,
            slot: SessionSlot::new(),
        }
    }

    /// Push session metrics after every session
    pub fn with_pusher(mut self, pusher: Box<dyn MetricsPusher>) -> Self {
        self.pusher = Some(pusher);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn hostname(&self) -> String {
        self.config.resolved_snapshot_hostname()
    }

    /// Host named in backup events
    fn local_host(&self) -> String {
        self.config.resolved_local_hostname()
    }

    fn prepare_scratch_dir(&self) -> Result<(), SetupError> {
        let dir = &self.config.scratch_dir;
        fs::create_dir_all(dir).map_err(|e| {
            SetupError::Environment(format!("failed to create scratch dir {:?}: {}", dir, e))
        })?;
        fs::write(dir.join(SCRATCH_MARKER_FILE), "test").map_err(|e| {
            SetupError::Environment(format!("no write access in scratch dir {:?}: {}", dir, e))
        })?;
        Ok(())
    }

    /// Validate the Restic and its secret and connect to the repository
    ///
    /// Nothing in the cluster is modified.
    pub fn setup(&self) -> Result<(Restic, ResticEnv), SetupFailure> {
        self.prepare_scratch_dir()
            .map_err(SetupFailure::before_fetch)?;

        let restic = self
            .cluster
            .get_restic(&self.config.namespace, &self.config.restic_name)
            .map_err(|e| SetupFailure::before_fetch(e.into()))?;
        info!(restic = %restic.name_any(), "Found restic");

        restic.spec.validate().map_err(|reason| {
            SetupFailure::with(
                &restic,
                SetupError::Validation {
                    name: restic.name_any(),
                    reason,
                },
            )
        })?;

        let namespace = restic.namespace().unwrap_or_else(|| self.config.namespace.clone());
        let backend = &restic.spec.backend;
        let secret = self
            .cluster
            .get_secret(&namespace, &backend.storage_secret_name)
            .map_err(|e| {
                let error = SetupError::Credential(format!(
                    "failed to read secret {}/{}: {}",
                    namespace, backend.storage_secret_name, e
                ));
                SetupFailure::with(&restic, error)
            })?;
        info!(secret = %secret.name_any(), "Found repository secret");

        if let Some(kind) = backend.kind() {
            check_secret(kind, &secret)
                .map_err(|e| SetupFailure::with(&restic, SetupError::Credential(e)))?;
        }

        let env = self
            .restic
            .setup_env(backend, &secret, &self.config.smart_prefix)
            .map_err(|e| {
                SetupFailure::with(&restic, SetupError::Environment(format!("{:#}", e)))
            })?;

        self.restic.init_repository_if_absent(&env).map_err(|e| {
            SetupFailure::with(
                &restic,
                SetupError::Environment(format!("failed to initialize repository: {:#}", e)),
            )
        })?;

        Ok((restic, env))
    }

    /// Run setup, reporting a failure against the Restic when it was fetched
    fn setup_or_report(&self) -> Result<(Restic, ResticEnv), SessionError> {
        self.setup().map_err(|failure| {
            let err = SessionError::Setup(failure.error);
            if let Some(ref restic) = failure.restic {
                self.events
                    .report(&restic.object_ref(&()), EventReason::FailedSetup, &err.to_string());
            }
            err
        })
    }

    /// Run one backup session
    ///
    /// Sessions of one controller never overlap; a second caller waits for
    /// the first to finish.
    pub fn backup(&self) -> Result<SessionOutcome, SessionError> {
        let _slot = self.slot.acquire(&self.config.restic_name);

        let (restic, env) = self.setup_or_report()?;
        if restic.spec.paused {
            info!(restic = %restic.name_any(), "Skipped backup since restic is paused");
            return Ok(SessionOutcome::Paused);
        }

        let reference = restic.object_ref(&());
        let mut record = SessionRecord::begin(self, &restic)?;
        let host = self.local_host();

        let ctx = SessionContext {
            restic: self.restic.as_ref(),
            events: self.events.as_ref(),
            metrics: &record.metrics,
            reference: &reference,
            host: &host,
        };
        let result = session::run_file_groups(&ctx, &env, &restic.spec);

        record.succeeded = result.is_ok();
        drop(record);
        result?;

        let check_job = self.provision(&restic, &reference)?;
        Ok(SessionOutcome::Completed { check_job })
    }

    /// Push metrics and, for a successful session, update the status
    fn record(
        &self,
        restic: &Restic,
        metrics: &SessionMetrics,
        start: DateTime<Utc>,
        elapsed: Duration,
        succeeded: bool,
    ) {
        metrics.finish(succeeded, elapsed);

        if let Some(ref pusher) = self.pusher {
            let target = self.push_target(restic);
            match metrics.encode().and_then(|body| pusher.push(&target, &body)) {
                Ok(()) => debug!(job = %target.job, "Pushed session metrics"),
                Err(e) => warn!(job = %target.job, "Failed to push session metrics: {:#}", e),
            }
        }

        if !succeeded {
            return;
        }

        let update = |current| status::record_success(current, start, elapsed);
        match self.cluster.patch_restic_status(restic, &update) {
            Ok(updated) => info!(
                restic = %restic.name_any(),
                backup_count = updated.status.map(|s| s.backup_count).unwrap_or_default(),
                "Updated restic status"
            ),
            Err(e) => error!(restic = %restic.name_any(), "Failed to update restic status: {}", e),
        }
    }

    /// Pushgateway job and grouping labels for this sidecar
    pub fn push_target(&self, restic: &Restic) -> PushTarget {
        let namespace = restic.namespace().unwrap_or_else(|| self.config.namespace.clone());
        let name = restic.name_any();

        let mut grouping = vec![
            ("instance".to_string(), self.hostname()),
            ("namespace".to_string(), namespace.clone()),
            ("stash_config".to_string(), name.clone()),
        ];
        if self.config.workload.is_set() {
            grouping.push(("kind".to_string(), self.config.workload.kind.clone()));
            grouping.push(("name".to_string(), self.config.workload.name.clone()));
        }

        PushTarget {
            job: sanitize_label_value(&format!("{}-{}", namespace, name)),
            grouping,
        }
    }

    /// Create the check job, reporting failures against the Restic
    fn provision(&self, restic: &Restic, reference: &ObjectReference) -> Result<String, ProvisionError> {
        let hostname = self.hostname();
        match provisioner::provision_check_job(self.cluster.as_ref(), &self.config, restic, &hostname) {
            Ok(job) => {
                let name = job.name_any();
                self.events.report(
                    reference,
                    EventReason::CheckJobCreated,
                    &format!("Created check job: {}", name),
                );
                Ok(name)
            }
            Err(e) => {
                self.events.report(
                    reference,
                    EventReason::FailedCheckJobCreation,
                    &format!("Failed to create check job, reason: {}", e),
                );
                Err(e)
            }
        }
    }

    /// Verify the repository; the command run by the check job
    pub fn check(&self) -> Result<String, SessionError> {
        let _slot = self.slot.acquire(&self.config.restic_name);

        let (restic, env) = self.setup_or_report()?;
        info!(restic = %restic.name_any(), host = %self.hostname(), "Checking repository");
        self.restic.check(&env).map_err(SessionError::Check)
    }
}
