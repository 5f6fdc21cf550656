//! Backup session outcomes

use rstest::rstest;
use test_utils::*;

fn ready(restic: Restic) -> TestContext {
    TestContext::new().with_restic(restic).with_secret(s3_secret())
}

fn two_groups() -> Restic {
    ResticBuilder::s3(RESTIC_NAME)
        .file_group("/data")
        .file_group("/logs")
        .build()
}

#[test]
fn test_all_file_groups_backed_up() {
    let ctx = ready(two_groups());

    let outcome = ctx.controller().backup().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            check_job: CHECK_JOB_NAME.to_string()
        }
    );
    assert_eq!(ctx.restic.backed_up_paths(), vec!["/data", "/logs"]);
    assert_eq!(ctx.restic.forgotten_paths(), vec!["/data", "/logs"]);
    assert_eq!(ctx.events.count(EventReason::SuccessfulBackup), 2);
    assert_eq!(ctx.events.count(EventReason::CheckJobCreated), 1);
    assert!(ctx.events.warnings().is_empty());
    assert_eq!(ctx.cluster.job_names(), vec![CHECK_JOB_NAME]);
}

#[test]
fn test_first_backup_failure_stops_session() {
    let ctx = ready(two_groups()).with_restic_ops(MockResticOps::new().with_failing_backup("/data"));

    let err = ctx.controller().backup().unwrap_err();

    assert!(matches!(err, SessionError::Backup { ref path, .. } if path == "/data"));
    assert!(!err.backup_succeeded());
    assert_eq!(ctx.restic.backed_up_paths(), vec!["/data"]);
    assert!(ctx.restic.forgotten_paths().is_empty());
    assert_eq!(ctx.events.reasons(), vec![EventReason::FailedToBackup]);
    assert!(ctx.cluster.restic_status(NAMESPACE, RESTIC_NAME).is_none());
    assert!(ctx.cluster.job_names().is_empty());
}

#[test]
fn test_later_backup_failure_keeps_earlier_group() {
    let ctx = ready(two_groups()).with_restic_ops(MockResticOps::new().with_failing_backup("/logs"));

    assert!(ctx.controller().backup().is_err());
    assert_eq!(ctx.restic.backed_up_paths(), vec!["/data", "/logs"]);
    assert_eq!(ctx.restic.forgotten_paths(), vec!["/data"]);
    assert_eq!(
        ctx.events.reasons(),
        vec![EventReason::SuccessfulBackup, EventReason::FailedToBackup]
    );
}

#[test]
fn test_retention_failure_stops_session() {
    let ctx = ready(two_groups()).with_restic_ops(MockResticOps::new().with_failing_forget("/data"));

    let err = ctx.controller().backup().unwrap_err();

    assert!(matches!(err, SessionError::Retention { .. }));
    assert_eq!(ctx.restic.backed_up_paths(), vec!["/data"]);
    assert_eq!(
        ctx.events.reasons(),
        vec![EventReason::SuccessfulBackup, EventReason::FailedToRetention]
    );
    assert!(ctx.cluster.job_names().is_empty());
}

#[test]
fn test_paused_restic_runs_nothing() {
    let pusher = MockPusher::new();
    let ctx = ready(ResticBuilder::s3(RESTIC_NAME).file_group("/data").paused().build())
        .with_pushgateway(pusher.clone());

    assert_eq!(ctx.controller().backup().unwrap(), SessionOutcome::Paused);
    assert!(ctx.restic.backed_up_paths().is_empty());
    assert!(ctx.events.get_events().is_empty());
    assert_eq!(ctx.cluster.status_patch_count(), 0);
    assert!(ctx.cluster.job_names().is_empty());
    assert_eq!(pusher.push_count(), 0);
}

#[rstest]
#[case::missing_restic(TestContext::new().with_secret(s3_secret()), 0)]
#[case::missing_secret(TestContext::new().with_restic(two_groups()), 1)]
#[case::no_file_groups(
    TestContext::new()
        .with_restic(ResticBuilder::s3(RESTIC_NAME).build())
        .with_secret(s3_secret()),
    1
)]
#[case::unknown_policy(
    TestContext::new()
        .with_restic(ResticBuilder::s3(RESTIC_NAME).file_group_with_policy("/data", "nope").build())
        .with_secret(s3_secret()),
    1
)]
fn test_setup_failure_changes_nothing(#[case] ctx: TestContext, #[case] setup_events: usize) {
    let err = ctx.controller().backup().unwrap_err();

    assert!(matches!(err, SessionError::Setup(_)));
    assert!(err.to_string().starts_with("failed to setup backup"));
    assert_eq!(ctx.events.count(EventReason::FailedSetup), setup_events);
    assert!(ctx.restic.backed_up_paths().is_empty());
    assert_eq!(ctx.cluster.status_patch_count(), 0);
    assert!(ctx.cluster.job_names().is_empty());
}

/// Scratch path taken by a regular file, so it can be neither created nor written
fn scratch_is_a_file() -> TestContext {
    let ctx = ready(two_groups());
    let file = ctx.create_file("scratch-file", "not a directory");
    ctx.configure(|c| c.scratch_dir = file)
}

#[rstest]
#[case::scratch_dir_unusable(scratch_is_a_file(), 0)]
#[case::restic_env_setup(
    ready(two_groups()).with_restic_ops(MockResticOps::new().with_failing_setup()),
    1
)]
fn test_environment_failure_during_setup(#[case] ctx: TestContext, #[case] setup_events: usize) {
    let err = ctx.controller().backup().unwrap_err();

    assert!(matches!(err, SessionError::Setup(SetupError::Environment(_))));
    assert_eq!(ctx.events.get_events().len(), setup_events);
    assert_eq!(ctx.events.count(EventReason::FailedSetup), setup_events);
    assert!(ctx.restic.backed_up_paths().is_empty());
    assert!(!ctx.restic.init_called());
    assert_eq!(ctx.cluster.status_patch_count(), 0);
    assert!(ctx.cluster.job_names().is_empty());
}

#[test]
fn test_forbidden_secret_is_credential_error() {
    let ctx = TestContext::new()
        .with_cluster(MockClusterOps::new().with_forbidden_secrets())
        .with_restic(two_groups())
        .with_secret(s3_secret());

    let err = ctx.controller().backup().unwrap_err();
    assert!(matches!(err, SessionError::Setup(SetupError::Credential(_))));
    assert_eq!(ctx.events.reasons(), vec![EventReason::FailedSetup]);
}

#[test]
fn test_missing_secret_key_is_credential_error() {
    let restic = ResticBuilder::s3(RESTIC_NAME).file_group("/data").build();
    let ctx = TestContext::new()
        .with_restic(restic)
        .with_secret(secret(SECRET_NAME, &[("AWS_ACCESS_KEY_ID", "id")]));

    let err = ctx.controller().backup().unwrap_err();
    assert!(matches!(err, SessionError::Setup(SetupError::Credential(_))));
    assert!(err.to_string().contains("RESTIC_PASSWORD"));
}

#[test]
fn test_repository_init_failure_is_setup_error() {
    let ctx = ready(two_groups()).with_restic_ops(MockResticOps::new().with_failing_init());

    let err = ctx.controller().backup().unwrap_err();
    assert!(matches!(err, SessionError::Setup(SetupError::Environment(_))));
    assert_eq!(ctx.events.reasons(), vec![EventReason::FailedSetup]);
}

#[test]
fn test_check_job_creation_failure_after_backup() {
    let ctx = ready(two_groups()).with_cluster(
        MockClusterOps::new()
            .with_restic(two_groups())
            .with_secret(s3_secret())
            .with_failing_job_creation(),
    );

    let err = ctx.controller().backup().unwrap_err();

    assert!(err.backup_succeeded());
    assert_eq!(
        ctx.cluster
            .restic_status(NAMESPACE, RESTIC_NAME)
            .unwrap()
            .backup_count,
        1
    );
    assert_eq!(ctx.events.count(EventReason::FailedCheckJobCreation), 1);
    assert_eq!(ctx.events.count(EventReason::CheckJobCreated), 0);
}

#[test]
fn test_second_session_reports_existing_job() {
    let ctx = ready(two_groups());

    assert!(ctx.controller().backup().is_ok());
    let err = ctx.controller().backup().unwrap_err();

    assert!(err.backup_succeeded());
    assert!(err.to_string().contains(CHECK_JOB_NAME));
    assert_eq!(ctx.events.count(EventReason::CheckJobCreated), 1);
    assert_eq!(ctx.events.count(EventReason::FailedCheckJobCreation), 1);
    assert_eq!(ctx.cluster.job_names(), vec![CHECK_JOB_NAME]);
    assert_eq!(
        ctx.cluster
            .restic_status(NAMESPACE, RESTIC_NAME)
            .unwrap()
            .backup_count,
        2
    );
}

#[test]
fn test_check_command_verifies_repository() {
    let ctx = ready(two_groups());
    assert!(ctx.controller().check().is_ok());

    let ctx = ready(two_groups()).with_restic_ops(MockResticOps::new().with_failing_check());
    assert!(matches!(ctx.controller().check(), Err(SessionError::Check(_))));
}
