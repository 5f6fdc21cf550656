//! Tests for restic argument and repository construction

use restic_sidecar::api::RetentionPolicy;
use restic_sidecar::utils::restic::{backup_args, build_repository_url, forget_args};
use test_utils::{ResticBuilder, ResticEnv};

#[test]
fn test_repository_url_for_s3_with_smart_prefix() {
    let restic = ResticBuilder::s3("stash-demo").file_group("/data").build();
    let url = build_repository_url(&restic.spec.backend, "deployment/stash-demo").unwrap();
    assert_eq!(url, "s3:s3.amazonaws.com/stash-qa/demo/deployment/stash-demo");
}

#[test]
fn test_repository_url_for_local() {
    let restic = ResticBuilder::local("stash-demo").file_group("/data").build();
    let url = build_repository_url(&restic.spec.backend, "").unwrap();
    assert_eq!(url, "/safe/data");
}

#[test]
fn test_backup_args_include_host_and_path() {
    let restic = ResticBuilder::s3("stash-demo").file_group("/source/data").build();
    let env = ResticEnv::new("pw", "/repo");

    let args = backup_args(&env, &restic.spec.file_groups[0], "stash-demo-0");
    assert_eq!(args, vec!["backup", "/source/data", "--host", "stash-demo-0"]);
}

#[test]
fn test_forget_args_carry_policy() {
    let restic = ResticBuilder::s3("stash-demo")
        .retention_policy(RetentionPolicy {
            name: "daily".to_string(),
            keep_daily: Some(7),
            keep_tags: vec!["pinned".to_string()],
            ..Default::default()
        })
        .file_group_with_policy("/source/data", "daily")
        .build();
    let fg = &restic.spec.file_groups[0];
    let policy = restic.spec.retention_policy(fg).unwrap();

    let args = forget_args(&ResticEnv::new("pw", "/repo"), fg, policy, "host-0");
    let joined = args.join(" ");
    assert!(joined.starts_with("forget --host host-0 --path /source/data"));
    assert!(joined.contains("--keep-daily 7"));
    assert!(joined.contains("--keep-tag pinned"));
    assert!(!joined.contains("--prune"));
}
