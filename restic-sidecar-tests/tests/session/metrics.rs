//! Pushgateway delivery of session metrics

use test_utils::*;

fn ctx_with_pusher(pusher: MockPusher, restic: MockResticOps) -> TestContext {
    TestContext::new()
        .with_restic(
            ResticBuilder::s3(RESTIC_NAME)
                .file_group("/source/data")
                .build(),
        )
        .with_secret(s3_secret())
        .with_restic_ops(restic)
        .with_pushgateway(pusher)
        .configure(|c| {
            c.workload.kind = "Deployment".to_string();
            c.workload.name = "stash-demo".to_string();
        })
}

#[test]
fn test_successful_session_pushes_metrics() {
    let pusher = MockPusher::new();
    let ctx = ctx_with_pusher(pusher.clone(), MockResticOps::new());

    ctx.controller().backup().unwrap();

    assert_eq!(pusher.push_count(), 1);
    let (target, body) = pusher.last_push().unwrap();
    assert_eq!(target.job, "default_stash_demo");
    assert!(target
        .grouping
        .contains(&("kind".to_string(), "Deployment".to_string())));
    assert!(target.path().starts_with("/metrics/job/default_stash_demo/instance/stash-demo"));

    assert!(body.contains("restic_session_success 1"));
    assert!(body.contains("restic_session_fail 0"));
    assert!(body.contains(r#"filegroup="_source_data""#));
    assert!(body.contains(r#"op="forget""#));
}

#[test]
fn test_failed_session_pushes_failure() {
    let pusher = MockPusher::new();
    let ctx = ctx_with_pusher(pusher.clone(), MockResticOps::new().with_failing_backup("/source/data"));

    assert!(ctx.controller().backup().is_err());

    let (_, body) = pusher.last_push().unwrap();
    assert!(body.contains("restic_session_success 0"));
    assert!(body.contains("restic_session_fail 1"));
    assert!(body.contains(r#"op="backup""#));
    assert!(!body.contains(r#"op="forget""#));
}

#[test]
fn test_push_failure_does_not_fail_session() {
    let pusher = MockPusher::new().with_failure();
    let ctx = ctx_with_pusher(pusher.clone(), MockResticOps::new());

    assert!(ctx.controller().backup().is_ok());
    assert_eq!(pusher.push_count(), 1);
}

#[test]
fn test_no_push_without_pushgateway() {
    let ctx = TestContext::new()
        .with_restic(ResticBuilder::s3(RESTIC_NAME).file_group("/data").build())
        .with_secret(s3_secret());

    assert!(ctx.controller().backup().is_ok());
    assert!(ctx.pusher.is_none());
    assert_eq!(ctx.events.count(EventReason::CheckJobCreated), 1);
}
