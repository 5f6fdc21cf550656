//! Status bookkeeping across sessions

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use test_utils::*;

#[test]
fn test_first_session_sets_both_times() {
    let ctx = TestContext::new()
        .with_restic(ResticBuilder::s3(RESTIC_NAME).file_group("/data").build())
        .with_secret(s3_secret());

    ctx.controller().backup().unwrap();

    let status = ctx.cluster.restic_status(NAMESPACE, RESTIC_NAME).unwrap();
    assert_eq!(status.backup_count, 1);
    assert!(status.first_backup_time.is_some());
    assert_eq!(status.first_backup_time, status.last_backup_time);
    assert!(status.last_backup_duration.is_some());
}

#[test]
fn test_existing_first_backup_time_is_kept() {
    let first = Time(
        "2026-01-01T00:00:00Z"
            .parse()
            .expect("valid timestamp"),
    );
    let restic = ResticBuilder::s3(RESTIC_NAME)
        .file_group("/data")
        .status(ResticStatus {
            first_backup_time: Some(first.clone()),
            last_backup_time: Some(first.clone()),
            last_backup_duration: Some("3s".to_string()),
            backup_count: 41,
        })
        .build();
    let ctx = TestContext::new().with_restic(restic).with_secret(s3_secret());

    ctx.controller().backup().unwrap();

    let status = ctx.cluster.restic_status(NAMESPACE, RESTIC_NAME).unwrap();
    assert_eq!(status.backup_count, 42);
    assert_eq!(status.first_backup_time, Some(first.clone()));
    assert!(status.last_backup_time.unwrap().0 > first.0);
}

#[test]
fn test_failed_session_leaves_status_alone() {
    let ctx = TestContext::new()
        .with_restic(ResticBuilder::s3(RESTIC_NAME).file_group("/data").build())
        .with_secret(s3_secret())
        .with_restic_ops(MockResticOps::new().with_failing_backup("/data"));

    assert!(ctx.controller().backup().is_err());
    assert_eq!(ctx.cluster.status_patch_count(), 0);
}

#[test]
fn test_status_patch_failure_still_creates_job() {
    let restic = ResticBuilder::s3(RESTIC_NAME).file_group("/data").build();
    let ctx = TestContext::new().with_cluster(
        MockClusterOps::new()
            .with_restic(restic)
            .with_secret(s3_secret())
            .with_failing_status_patch(),
    );

    assert!(ctx.controller().backup().is_ok());
    assert_eq!(ctx.cluster.job_names(), vec![CHECK_JOB_NAME]);
}
