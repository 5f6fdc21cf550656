//! Tests for configuration loading and validation

use restic_sidecar::config::{load_config, validate_config, LogFormat, WorkloadKind};
use test_utils::{config_toml, TestContext, NAMESPACE, POD_NAME, RESTIC_NAME};

#[test]
fn test_load_minimal_config() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", &config_toml("/tmp/stash"));

    let config = load_config(&path).unwrap();
    assert_eq!(config.namespace, NAMESPACE);
    assert_eq!(config.restic_name, RESTIC_NAME);
    assert_eq!(config.pod_name, POD_NAME);
    assert_eq!(config.workload.kind(), Some(WorkloadKind::Deployment));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Text);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_defaults_applied() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", "namespace = \"default\"\nrestic_name = \"r\"\n");

    let config = load_config(&path).unwrap();
    assert_eq!(config.max_num_requeues, 5);
    assert_eq!(config.docker_registry, "appscode");
    assert!(!config.enable_rbac);
    assert!(config.pushgateway_url.is_empty());
}

#[test]
fn test_written_config_loads_back() {
    let ctx = TestContext::new().with_rbac().with_pushgateway(Default::default());
    let path = ctx.create_file("config.toml", &toml::to_string_pretty(&ctx.config).unwrap());

    let loaded = load_config(&path).unwrap();
    assert!(loaded.enable_rbac);
    assert_eq!(loaded.pushgateway_url, ctx.config.pushgateway_url);
    assert_eq!(loaded.scratch_dir, ctx.config.scratch_dir);
    assert!(validate_config(&loaded).is_ok());
}

#[test]
fn test_invalid_toml() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", "invalid { toml content");
    assert!(load_config(&path).is_err());
}

#[test]
fn test_missing_restic_name_fails_validation() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", "namespace = \"default\"\n");

    let config = load_config(&path).unwrap();
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("restic_name"));
}

#[test]
fn test_pushgateway_url_must_be_http() {
    let ctx = TestContext::new();
    let path = ctx.create_file(
        "config.toml",
        "namespace = \"default\"\nrestic_name = \"r\"\npushgateway_url = \"pushgateway:9091\"\n",
    );

    let config = load_config(&path).unwrap();
    assert!(validate_config(&config).is_err());
}

#[test]
fn test_snapshot_host_follows_workload() {
    let ctx = TestContext::new();
    let config = ctx
        .configure(|c| {
            c.workload.kind = "DaemonSet".to_string();
            c.workload.name = "fluentd".to_string();
            c.node_name = "node-1".to_string();
        })
        .config;
    assert_eq!(config.resolved_snapshot_hostname(), "node-1");
}
