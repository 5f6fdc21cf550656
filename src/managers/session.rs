//! Backup and retention over a Restic's file groups
//!
//! File groups run in declaration order. The first failing backup or
//! retention stops the session; later groups are never touched and the
//! failing group's backup is not undone.

use crate::api::ResticSpec;
use crate::error::SessionError;
use crate::managers::events::{EventReason, EventRecorder};
use crate::utils::metrics::{SessionMetrics, SessionOp};
use crate::utils::restic_ops::{ResticEnv, ResticOperations};
use k8s_openapi::api::core::v1::ObjectReference;
use std::time::Instant;
use tracing::error;

/// Collaborators of one session run
pub struct SessionContext<'a> {
    pub restic: &'a dyn ResticOperations,
    pub events: &'a dyn EventRecorder,
    pub metrics: &'a SessionMetrics,
    pub reference: &'a ObjectReference,
    /// Local hostname named in success events
    pub host: &'a str,
}

/// Time `f` and record its duration whether or not it succeeded
fn measure<T>(metrics: &SessionMetrics, path: &str, op: SessionOp, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let result = f();
    metrics.observe(path, op, started.elapsed());
    result
}

/// Back up every file group, then apply its retention policy
pub fn run_file_groups(
    ctx: &SessionContext<'_>,
    env: &ResticEnv,
    spec: &ResticSpec,
) -> Result<(), SessionError> {
    for fg in &spec.file_groups {
        if let Err(source) = measure(ctx.metrics, &fg.path, SessionOp::Backup, || {
            ctx.restic.backup(env, fg)
        }) {
            error!(path = %fg.path, "Backup failed: {:#}", source);
            ctx.events.report(
                ctx.reference,
                EventReason::FailedToBackup,
                &format!("Backup failed, reason: {:#}", source),
            );
            return Err(SessionError::Backup {
                path: fg.path.clone(),
                source,
            });
        }

        ctx.events.report(
            ctx.reference,
            EventReason::SuccessfulBackup,
            &format!("Backed up pod: {}, path: {}", ctx.host, fg.path),
        );

        let forgotten = match spec.retention_policy(fg) {
            Some(policy) => measure(ctx.metrics, &fg.path, SessionOp::Forget, || {
                ctx.restic.forget(env, fg, policy)
            }),
            None => Err(anyhow::anyhow!(
                "unknown retention policy: {}",
                fg.retention_policy_name
            )),
        };

        if let Err(source) = forgotten {
            error!(path = %fg.path, "Retention failed: {:#}", source);
            ctx.events.report(
                ctx.reference,
                EventReason::FailedToRetention,
                &format!("Failed to forget old snapshots, reason: {:#}", source),
            );
            return Err(SessionError::Retention {
                path: fg.path.clone(),
                source,
            });
        }
    }
    Ok(())
}
