//! Tests for check job construction

use restic_sidecar::managers::provisioner::{
    build_check_job, check_job_name, LABEL_OPERATION, LABEL_RESTIC,
};
use test_utils::{ResticBuilder, TestContext, CHECK_JOB_NAME, POD_NAME, RESTIC_NAME};

#[test]
fn test_check_job_name() {
    assert_eq!(check_job_name(RESTIC_NAME, POD_NAME), CHECK_JOB_NAME);
}

#[test]
fn test_long_names_stay_valid_and_distinct() {
    let host_a = "a".repeat(80);
    let host_b = format!("{}b", "a".repeat(79));
    let a = check_job_name(RESTIC_NAME, &host_a);
    let b = check_job_name(RESTIC_NAME, &host_b);

    assert!(a.len() <= 63);
    assert!(b.len() <= 63);
    assert_ne!(a, b);
}

#[test]
fn test_local_backend_volume_is_mounted() {
    let ctx = TestContext::new();
    let restic = ResticBuilder::local(RESTIC_NAME).file_group("/data").build();

    let job = build_check_job(&ctx.config, &restic, POD_NAME);
    let pod = job.spec.unwrap().template.spec.unwrap();

    let volume = pod
        .volumes
        .unwrap()
        .into_iter()
        .find(|v| v.name == "stash-local")
        .unwrap();
    assert_eq!(volume.host_path.unwrap().path, "/data/stash-test/restic-repo");

    let mounts = pod.containers[0].volume_mounts.clone().unwrap();
    assert!(mounts.iter().any(|m| m.mount_path == "/safe/data"));
    assert!(pod.service_account_name.is_none());
}

#[test]
fn test_check_job_labels_and_args() {
    let ctx = TestContext::new().with_rbac();
    let restic = ResticBuilder::s3(RESTIC_NAME).file_group("/data").build();

    let job = build_check_job(&ctx.config, &restic, POD_NAME);
    let labels = job.metadata.labels.clone().unwrap();
    assert_eq!(labels["app"], "stash");
    assert_eq!(labels[LABEL_RESTIC], RESTIC_NAME);
    assert_eq!(labels[LABEL_OPERATION], "check");

    let spec = job.spec.unwrap();
    assert_eq!(spec.backoff_limit, Some(0));
    let pod = spec.template.spec.unwrap();
    assert_eq!(pod.service_account_name.as_deref(), Some(CHECK_JOB_NAME));

    let args = pod.containers[0].args.clone().unwrap();
    assert_eq!(args[0], "check");
    assert!(args.contains(&format!("--host-name={}", POD_NAME)));
    assert_eq!(
        pod.containers[0].image.as_deref(),
        Some("appscode/stash:canary")
    );
}
