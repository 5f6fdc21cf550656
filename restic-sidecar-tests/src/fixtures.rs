//! Test fixtures and sample data

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "default";
pub const RESTIC_NAME: &str = "stash-demo";
pub const POD_NAME: &str = "stash-demo-0";
pub const SECRET_NAME: &str = "stash-secret";
pub const PASSWORD: &str = "changeit";

/// Check job created for [`RESTIC_NAME`] backed up from [`POD_NAME`]
pub const CHECK_JOB_NAME: &str = "stash-check-stash-demo-stash-demo-0";

/// Build a secret in [`NAMESPACE`] from key/value pairs
pub fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some(NAMESPACE.to_string());
    secret.data = Some(
        data.iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect::<BTreeMap<_, _>>(),
    );
    secret
}

/// Secret holding only the repository password
pub fn password_secret() -> Secret {
    secret(SECRET_NAME, &[("RESTIC_PASSWORD", PASSWORD)])
}

/// Secret with the keys an S3 backend needs
pub fn s3_secret() -> Secret {
    secret(
        SECRET_NAME,
        &[
            ("RESTIC_PASSWORD", PASSWORD),
            ("AWS_ACCESS_KEY_ID", "not@id"),
            ("AWS_SECRET_ACCESS_KEY", "not@secret"),
        ],
    )
}

/// Minimal TOML config naming the sidecar's Restic
pub fn config_toml(scratch_dir: &str) -> String {
    format!(
        r#"
namespace = "{NAMESPACE}"
restic_name = "{RESTIC_NAME}"
scratch_dir = "{scratch_dir}"
pod_name = "{POD_NAME}"

[workload]
kind = "Deployment"
name = "stash-demo"

[logging]
level = "debug"
"#
    )
}
