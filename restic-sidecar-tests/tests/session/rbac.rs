//! Check job identity with RBAC enabled

use test_utils::*;

fn rbac_ctx() -> TestContext {
    TestContext::new()
        .with_restic(ResticBuilder::s3(RESTIC_NAME).file_group("/data").build())
        .with_secret(s3_secret())
        .with_rbac()
}

#[test]
fn test_service_account_and_binding_owned_by_job() {
    let ctx = rbac_ctx();
    ctx.controller().backup().unwrap();

    let sa = ctx.cluster.service_account(NAMESPACE, CHECK_JOB_NAME).unwrap();
    let owners = sa.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Job");
    assert_eq!(owners[0].name, CHECK_JOB_NAME);

    let rb = ctx.cluster.role_binding(NAMESPACE, CHECK_JOB_NAME).unwrap();
    assert_eq!(rb.role_ref.kind, "ClusterRole");
    assert_eq!(rb.role_ref.name, "stash-sidecar");
    let subjects = rb.subjects.unwrap();
    assert_eq!(subjects[0].kind, "ServiceAccount");
    assert_eq!(subjects[0].name, CHECK_JOB_NAME);
    assert_eq!(subjects[0].namespace.as_deref(), Some(NAMESPACE));
}

#[test]
fn test_rbac_reconcile_is_idempotent() {
    let ctx = rbac_ctx();
    ctx.controller().backup().unwrap();

    // the job is gone but its identity survived, e.g. after a failed cleanup
    ctx.cluster.jobs.lock().unwrap().clear();
    ctx.controller().backup().unwrap();

    let sa = ctx.cluster.service_account(NAMESPACE, CHECK_JOB_NAME).unwrap();
    assert_eq!(sa.metadata.owner_references.unwrap().len(), 1);
    let rb = ctx.cluster.role_binding(NAMESPACE, CHECK_JOB_NAME).unwrap();
    assert_eq!(rb.metadata.owner_references.unwrap().len(), 1);
    assert_eq!(rb.subjects.unwrap().len(), 1);
}

#[test]
fn test_no_identity_without_rbac() {
    let ctx = TestContext::new()
        .with_restic(ResticBuilder::s3(RESTIC_NAME).file_group("/data").build())
        .with_secret(s3_secret());
    ctx.controller().backup().unwrap();

    assert!(ctx.cluster.service_account(NAMESPACE, CHECK_JOB_NAME).is_none());
    assert!(ctx.cluster.role_binding(NAMESPACE, CHECK_JOB_NAME).is_none());
}

#[test]
fn test_rbac_failure_reported() {
    let restic = ResticBuilder::s3(RESTIC_NAME).file_group("/data").build();
    let ctx = TestContext::new()
        .with_cluster(
            MockClusterOps::new()
                .with_restic(restic)
                .with_secret(s3_secret())
                .with_failing_rbac(),
        )
        .with_rbac();

    let err = ctx.controller().backup().unwrap_err();

    assert!(err.backup_succeeded());
    assert!(matches!(err, SessionError::Provision(ProvisionError::Rbac { .. })));
    assert_eq!(ctx.events.count(EventReason::FailedCheckJobCreation), 1);
    assert_eq!(ctx.cluster.job_names(), vec![CHECK_JOB_NAME]);
}
