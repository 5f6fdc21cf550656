//! Restic environment and argument construction
//!
//! Everything here is pure except [`write_secret_file`]; the subprocess side
//! lives in [`super::restic_ops`].

use crate::api::{Backend, BackendKind, FileGroup, RetentionPolicy};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const RESTIC_PASSWORD: &str = "RESTIC_PASSWORD";
pub const RESTIC_REPOSITORY: &str = "RESTIC_REPOSITORY";
pub const TMPDIR: &str = "TMPDIR";
pub const RESTIC_CACHE_DIR: &str = "RESTIC_CACHE_DIR";

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const CA_CERT_DATA: &str = "CA_CERT_DATA";

pub const GOOGLE_PROJECT_ID: &str = "GOOGLE_PROJECT_ID";
pub const GOOGLE_SERVICE_ACCOUNT_JSON_KEY: &str = "GOOGLE_SERVICE_ACCOUNT_JSON_KEY";
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

pub const AZURE_ACCOUNT_NAME: &str = "AZURE_ACCOUNT_NAME";
pub const AZURE_ACCOUNT_KEY: &str = "AZURE_ACCOUNT_KEY";

pub const B2_ACCOUNT_ID: &str = "B2_ACCOUNT_ID";
pub const B2_ACCOUNT_KEY: &str = "B2_ACCOUNT_KEY";

/// Environment variables and global flags for restic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResticEnv {
    vars: HashMap<String, String>,
    cacert: Option<PathBuf>,
}

impl ResticEnv {
    /// Create new ResticEnv with password and repository
    pub fn new(password: &str, repository_url: &str) -> Self {
        let mut vars = HashMap::new();
        vars.insert(RESTIC_PASSWORD.to_string(), password.to_string());
        vars.insert(RESTIC_REPOSITORY.to_string(), repository_url.to_string());
        Self { vars, cacert: None }
    }

    /// Add custom environment variable
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Get all environment variables
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn repository(&self) -> Option<&str> {
        self.vars.get(RESTIC_REPOSITORY).map(String::as_str)
    }

    pub fn set_cacert(&mut self, path: PathBuf) {
        self.cacert = Some(path);
    }

    /// Flags every restic invocation needs
    pub fn global_args(&self) -> Vec<String> {
        match self.cacert {
            Some(ref path) => vec!["--cacert".to_string(), path.display().to_string()],
            None => Vec::new(),
        }
    }
}

/// Read a key of a secret as UTF-8, trimming a trailing newline
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Some(String::from_utf8_lossy(&value.0).trim_end_matches('\n').to_string());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.trim_end_matches('\n').to_string())
}

fn secret_keys(secret: &Secret) -> Vec<String> {
    let mut keys: Vec<String> = secret
        .data
        .iter()
        .flat_map(|d| d.keys().cloned())
        .chain(secret.string_data.iter().flat_map(|d| d.keys().cloned()))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Keys a secret must carry for a backend kind
pub fn required_secret_keys(kind: BackendKind) -> &'static [&'static str] {
    match kind {
        BackendKind::Local | BackendKind::S3 | BackendKind::Swift => &[RESTIC_PASSWORD],
        BackendKind::Gcs => &[
            RESTIC_PASSWORD,
            GOOGLE_PROJECT_ID,
            GOOGLE_SERVICE_ACCOUNT_JSON_KEY,
        ],
        BackendKind::Azure => &[RESTIC_PASSWORD, AZURE_ACCOUNT_NAME, AZURE_ACCOUNT_KEY],
        BackendKind::B2 => &[RESTIC_PASSWORD, B2_ACCOUNT_ID, B2_ACCOUNT_KEY],
    }
}

/// Verify a secret carries every key its backend needs
pub fn check_secret(kind: BackendKind, secret: &Secret) -> std::result::Result<(), String> {
    let missing: Vec<&str> = required_secret_keys(kind)
        .iter()
        .copied()
        .filter(|key| secret_value(secret, key).map_or(true, |v| v.is_empty()))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "missing keys for {} backend: {}",
            kind,
            missing.join(", ")
        ))
    }
}

/// Join path segments with single slashes, dropping empty ones
pub fn join_prefix(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the restic repository URL for a backend
pub fn build_repository_url(backend: &Backend, smart_prefix: &str) -> Result<String> {
    if let Some(ref local) = backend.local {
        let path = Path::new(&local.mount_path).join(smart_prefix.trim_matches('/'));
        let url = path.display().to_string();
        return Ok(url.trim_end_matches('/').to_string());
    }
    if let Some(ref s3) = backend.s3 {
        let endpoint = s3.endpoint.trim_end_matches('/');
        return Ok(format!(
            "s3:{}/{}",
            endpoint,
            join_prefix(&[&s3.bucket, &s3.prefix, smart_prefix])
        ));
    }
    if let Some(ref gcs) = backend.gcs {
        return Ok(format!(
            "gs:{}:/{}",
            gcs.bucket,
            join_prefix(&[&gcs.prefix, smart_prefix])
        ));
    }
    if let Some(ref azure) = backend.azure {
        return Ok(format!(
            "azure:{}:/{}",
            azure.container,
            join_prefix(&[&azure.prefix, smart_prefix])
        ));
    }
    if let Some(ref swift) = backend.swift {
        return Ok(format!(
            "swift:{}:/{}",
            swift.container,
            join_prefix(&[&swift.prefix, smart_prefix])
        ));
    }
    if let Some(ref b2) = backend.b2 {
        return Ok(format!(
            "b2:{}:{}",
            b2.bucket,
            join_prefix(&[&b2.prefix, smart_prefix])
        ));
    }
    anyhow::bail!("backend has no storage configured")
}

/// Write secret material restic reads from disk into the scratch directory
pub fn write_secret_file(scratch_dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = scratch_dir.join(name);
    fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Build the full restic environment for a backend and its secret
pub fn build_env(
    backend: &Backend,
    secret: &Secret,
    smart_prefix: &str,
    scratch_dir: &Path,
) -> Result<ResticEnv> {
    let password = secret_value(secret, RESTIC_PASSWORD)
        .filter(|p| !p.is_empty())
        .context("secret has no RESTIC_PASSWORD")?;
    let repository = build_repository_url(backend, smart_prefix)?;

    let mut env = ResticEnv::new(&password, &repository);
    env.add(TMPDIR, scratch_dir.display().to_string());
    env.add(
        RESTIC_CACHE_DIR,
        scratch_dir.join("restic-cache").display().to_string(),
    );

    let copy = |env: &mut ResticEnv, key: &str| {
        if let Some(value) = secret_value(secret, key) {
            env.add(key, value);
        }
    };

    match backend.kind() {
        Some(BackendKind::S3) => {
            copy(&mut env, AWS_ACCESS_KEY_ID);
            copy(&mut env, AWS_SECRET_ACCESS_KEY);
            if let Some(ca) = secret_value(secret, CA_CERT_DATA) {
                let path = write_secret_file(scratch_dir, CA_CERT_DATA, &ca)?;
                env.set_cacert(path);
            }
        }
        Some(BackendKind::Gcs) => {
            copy(&mut env, GOOGLE_PROJECT_ID);
            if let Some(key) = secret_value(secret, GOOGLE_SERVICE_ACCOUNT_JSON_KEY) {
                let path = write_secret_file(scratch_dir, GOOGLE_SERVICE_ACCOUNT_JSON_KEY, &key)?;
                env.add(GOOGLE_APPLICATION_CREDENTIALS, path.display().to_string());
            }
        }
        Some(BackendKind::Azure) => {
            copy(&mut env, AZURE_ACCOUNT_NAME);
            copy(&mut env, AZURE_ACCOUNT_KEY);
        }
        Some(BackendKind::Swift) => {
            // Keystone v1/v2/v3 all read OS_* (and legacy ST_*) variables
            for key in secret_keys(secret) {
                if key.starts_with("OS_") || key.starts_with("ST_") {
                    copy(&mut env, &key);
                }
            }
        }
        Some(BackendKind::B2) => {
            copy(&mut env, B2_ACCOUNT_ID);
            copy(&mut env, B2_ACCOUNT_KEY);
        }
        Some(BackendKind::Local) | None => {}
    }

    Ok(env)
}

/// Arguments for `restic backup` of one file group
pub fn backup_args(env: &ResticEnv, fg: &FileGroup, hostname: &str) -> Vec<String> {
    let mut args = vec![
        "backup".to_string(),
        fg.path.clone(),
        "--host".to_string(),
        hostname.to_string(),
    ];
    for tag in &fg.tags {
        args.push("--tag".to_string());
        args.push(tag.clone());
    }
    args.extend(env.global_args());
    args
}

/// Arguments for `restic forget`, scoped to one host and path
pub fn forget_args(
    env: &ResticEnv,
    fg: &FileGroup,
    policy: &RetentionPolicy,
    hostname: &str,
) -> Vec<String> {
    let mut args = vec![
        "forget".to_string(),
        "--host".to_string(),
        hostname.to_string(),
        "--path".to_string(),
        fg.path.clone(),
    ];

    let keeps = [
        ("--keep-last", policy.keep_last),
        ("--keep-hourly", policy.keep_hourly),
        ("--keep-daily", policy.keep_daily),
        ("--keep-weekly", policy.keep_weekly),
        ("--keep-monthly", policy.keep_monthly),
        ("--keep-yearly", policy.keep_yearly),
    ];
    for (flag, value) in keeps {
        if let Some(n) = value {
            args.push(flag.to_string());
            args.push(n.to_string());
        }
    }
    for tag in &policy.keep_tags {
        args.push("--keep-tag".to_string());
        args.push(tag.clone());
    }
    if policy.prune {
        args.push("--prune".to_string());
    }
    if policy.dry_run {
        args.push("--dry-run".to_string());
    }
    args.extend(env.global_args());
    args
}

/// Resolve the restic binary, preferring an explicit path
pub fn resolve_restic_binary(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("restic binary not found at {}", path.display());
        }
        return Ok(path.to_path_buf());
    }
    which::which("restic").context("restic not found in PATH")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AzureSpec, B2Spec, GcsSpec, LocalSpec, S3Spec};
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn secret(pairs: &[(&str, &str)]) -> Secret {
        let data: BTreeMap<String, ByteString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect();
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    fn s3_backend(prefix: &str) -> Backend {
        Backend {
            storage_secret_name: "s3-secret".to_string(),
            s3: Some(S3Spec {
                endpoint: "s3.amazonaws.com".to_string(),
                bucket: "stash-qa".to_string(),
                prefix: prefix.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_join_prefix() {
        assert_eq!(join_prefix(&["/a/", "", "b/c/"]), "a/b/c");
        assert_eq!(join_prefix(&["", ""]), "");
    }

    #[test]
    fn test_s3_repository_url() {
        let url = build_repository_url(&s3_backend("demo"), "deployment/app").unwrap();
        assert_eq!(url, "s3:s3.amazonaws.com/stash-qa/demo/deployment/app");
    }

    #[test]
    fn test_local_repository_url() {
        let backend = Backend {
            storage_secret_name: "local-secret".to_string(),
            local: Some(LocalSpec {
                mount_path: "/safe/data".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            build_repository_url(&backend, "deployment/app").unwrap(),
            "/safe/data/deployment/app"
        );
        assert_eq!(build_repository_url(&backend, "").unwrap(), "/safe/data");
    }

    #[test]
    fn test_object_store_repository_urls() {
        let gcs = Backend {
            gcs: Some(GcsSpec {
                bucket: "bkt".to_string(),
                prefix: "p".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(build_repository_url(&gcs, "x").unwrap(), "gs:bkt:/p/x");

        let azure = Backend {
            azure: Some(AzureSpec {
                container: "ctr".to_string(),
                prefix: String::new(),
            }),
            ..Default::default()
        };
        assert_eq!(build_repository_url(&azure, "x").unwrap(), "azure:ctr:/x");

        let b2 = Backend {
            b2: Some(B2Spec {
                bucket: "bkt".to_string(),
                prefix: "p".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(build_repository_url(&b2, "").unwrap(), "b2:bkt:p");
    }

    #[test]
    fn test_check_secret_reports_missing_keys() {
        let s = secret(&[(RESTIC_PASSWORD, "pw"), (AZURE_ACCOUNT_NAME, "acct")]);
        let err = check_secret(BackendKind::Azure, &s).unwrap_err();
        assert!(err.contains(AZURE_ACCOUNT_KEY));
        assert!(!err.contains(AZURE_ACCOUNT_NAME));

        assert!(check_secret(BackendKind::S3, &s).is_ok());
        assert!(check_secret(BackendKind::S3, &secret(&[])).is_err());
    }

    #[test]
    fn test_secret_value_trims_newline() {
        let s = secret(&[(RESTIC_PASSWORD, "changeit\n")]);
        assert_eq!(secret_value(&s, RESTIC_PASSWORD).unwrap(), "changeit");
    }

    #[test]
    fn test_build_env_for_s3_with_ca() {
        let scratch = TempDir::new().unwrap();
        let s = secret(&[
            (RESTIC_PASSWORD, "pw"),
            (AWS_ACCESS_KEY_ID, "id"),
            (AWS_SECRET_ACCESS_KEY, "key"),
            (CA_CERT_DATA, "-----BEGIN CERTIFICATE-----"),
        ]);

        let env = build_env(&s3_backend(""), &s, "app", scratch.path()).unwrap();
        let vars = env.vars();
        assert_eq!(vars.get(RESTIC_PASSWORD).unwrap(), "pw");
        assert_eq!(vars.get(AWS_ACCESS_KEY_ID).unwrap(), "id");
        assert_eq!(env.repository().unwrap(), "s3:s3.amazonaws.com/stash-qa/app");
        assert_eq!(
            vars.get(TMPDIR).unwrap(),
            &scratch.path().display().to_string()
        );

        let args = env.global_args();
        assert_eq!(args[0], "--cacert");
        assert!(Path::new(&args[1]).exists());
    }

    #[test]
    fn test_build_env_requires_password() {
        let scratch = TempDir::new().unwrap();
        let result = build_env(&s3_backend(""), &secret(&[]), "", scratch.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_backup_args() {
        let env = ResticEnv::new("pw", "/repo");
        let fg = FileGroup {
            path: "/source/data".to_string(),
            retention_policy_name: "keep-last-5".to_string(),
            tags: vec!["daily".to_string()],
        };
        assert_eq!(
            backup_args(&env, &fg, "host-0"),
            vec!["backup", "/source/data", "--host", "host-0", "--tag", "daily"]
        );
    }

    #[test]
    fn test_forget_args() {
        let mut env = ResticEnv::new("pw", "/repo");
        env.set_cacert(PathBuf::from("/tmp/CA_CERT_DATA"));
        let fg = FileGroup {
            path: "/source/data".to_string(),
            retention_policy_name: "p".to_string(),
            tags: vec![],
        };
        let policy = RetentionPolicy {
            name: "p".to_string(),
            keep_last: Some(5),
            keep_weekly: Some(2),
            keep_tags: vec!["keep".to_string()],
            prune: true,
            ..Default::default()
        };
        assert_eq!(
            forget_args(&env, &fg, &policy, "host-0"),
            vec![
                "forget", "--host", "host-0", "--path", "/source/data",
                "--keep-last", "5", "--keep-weekly", "2", "--keep-tag", "keep",
                "--prune", "--cacert", "/tmp/CA_CERT_DATA",
            ]
        );
    }

    #[test]
    fn test_resolve_explicit_binary_must_exist() {
        assert!(resolve_restic_binary(Some(Path::new("/nonexistent/restic"))).is_err());
    }
}
