//! Check job provisioning
//!
//! After a successful session a one-shot job verifies the repository with
//! `restic check`. With RBAC enabled the job runs under its own service
//! account, bound to the sidecar cluster role and owned by the job, so
//! both disappear when the job is garbage collected.

use crate::api::{LocalVolumeSource, Restic, APP_LABEL_STASH};
use crate::config::ControllerConfig;
use crate::error::ProvisionError;
use crate::utils::cluster_ops::ClusterOperations;
use crate::utils::docker::Docker;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const SIDECAR_CLUSTER_ROLE: &str = "stash-sidecar";
pub const CHECK_JOB_PREFIX: &str = "stash-check";
pub const OPERATION_CHECK: &str = "check";
pub const LABEL_RESTIC: &str = "restic.appscode.com/config";
pub const LABEL_OPERATION: &str = "restic.appscode.com/operation";

const SCRATCH_VOLUME: &str = "scratchdir";
const SCRATCH_MOUNT: &str = "/tmp";
const LOCAL_VOLUME: &str = "stash-local";
const CHECK_JOB_TTL_SECONDS: i32 = 3600;
const MAX_NAME_LEN: usize = 63;

/// Normalize a name to a DNS-1123 label
///
/// Over-long names are cut and suffixed with a hash of the full name so
/// distinct inputs stay distinct.
pub fn dns1123_label(raw: &str) -> String {
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    name = name.trim_matches('-').to_string();

    if name.len() > MAX_NAME_LEN {
        let suffix = format!("{:08x}", fnv1a(raw.as_bytes()));
        let keep = MAX_NAME_LEN - suffix.len() - 1;
        name.truncate(keep);
        name = format!("{}-{}", name.trim_end_matches('-'), suffix);
    }
    name
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}

/// Job name for a Restic and snapshot host
pub fn check_job_name(restic_name: &str, hostname: &str) -> String {
    dns1123_label(&format!("{}-{}-{}", CHECK_JOB_PREFIX, restic_name, hostname))
}

fn check_job_labels(restic_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_LABEL_STASH.to_string()),
        (LABEL_RESTIC.to_string(), restic_name.to_string()),
        (LABEL_OPERATION.to_string(), OPERATION_CHECK.to_string()),
    ])
}

/// Env var filled from the pod's own metadata
fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                api_version: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Volume carrying the local backend's source under a fixed name
fn local_volume(source: &LocalVolumeSource) -> Volume {
    Volume {
        name: LOCAL_VOLUME.to_string(),
        host_path: source.host_path.clone(),
        persistent_volume_claim: source.persistent_volume_claim.clone(),
        nfs: source.nfs.clone(),
        empty_dir: source.empty_dir.clone(),
        ..Default::default()
    }
}

/// Build the check job; the caller creates it
pub fn build_check_job(
    config: &ControllerConfig,
    restic: &Restic,
    hostname: &str,
) -> Job {
    let restic_name = restic.name_any();
    let name = check_job_name(&restic_name, hostname);
    let image = Docker::stash(&config.docker_registry, &config.image_tag);

    let mut volumes = vec![Volume {
        name: SCRATCH_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: SCRATCH_VOLUME.to_string(),
        mount_path: SCRATCH_MOUNT.to_string(),
        ..Default::default()
    }];

    if let Some(ref local) = restic.spec.backend.local {
        volumes.push(local_volume(&local.volume_source));
        mounts.push(VolumeMount {
            name: LOCAL_VOLUME.to_string(),
            mount_path: local.mount_path.clone(),
            sub_path: local.sub_path.clone(),
            ..Default::default()
        });
    }

    let args = vec![
        "check".to_string(),
        format!("--restic-name={}", restic_name),
        format!("--host-name={}", hostname),
        format!("--smart-prefix={}", config.smart_prefix),
        format!("--workload-kind={}", config.workload.kind),
        format!("--workload-name={}", config.workload.name),
    ];

    let container = Container {
        name: CHECK_JOB_PREFIX.to_string(),
        image: Some(image.to_container_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(args),
        env: Some(vec![
            field_env("NAMESPACE", "metadata.namespace"),
            field_env("POD_NAME", "metadata.name"),
        ]),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    let service_account_name = config.enable_rbac.then(|| name.clone());

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: restic.namespace(),
            labels: Some(check_job_labels(&restic_name)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(CHECK_JOB_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(check_job_labels(&restic_name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    restart_policy: Some("Never".to_string()),
                    service_account_name,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Owner reference pointing at a created job
pub fn job_owner_reference(job: &Job) -> Result<OwnerReference, ProvisionError> {
    job.controller_owner_ref(&())
        .map(|mut owner| {
            // the job does not block deletion of what it owns
            owner.block_owner_deletion = None;
            owner.controller = None;
            owner
        })
        .ok_or_else(|| ProvisionError::MissingUid(job.name_any()))
}

/// Add `owner` to `meta`, replacing any reference with the same uid
pub fn ensure_owner_reference(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner.clone(),
        None => refs.push(owner.clone()),
    }
}

fn ensure_app_label(meta: &mut ObjectMeta) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert("app".to_string(), APP_LABEL_STASH.to_string());
}

/// Mutator for the check job's service account
pub fn mutate_service_account(owner: &OwnerReference) -> impl Fn(ServiceAccount) -> ServiceAccount + '_ {
    move |mut sa| {
        ensure_owner_reference(&mut sa.metadata, owner);
        ensure_app_label(&mut sa.metadata);
        sa
    }
}

/// Mutator for the binding of the check job's service account to the sidecar role
pub fn mutate_role_binding<'a>(
    owner: &'a OwnerReference,
    namespace: &'a str,
    name: &'a str,
) -> impl Fn(RoleBinding) -> RoleBinding + 'a {
    move |mut rb| {
        ensure_owner_reference(&mut rb.metadata, owner);
        ensure_app_label(&mut rb.metadata);
        rb.role_ref = RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: SIDECAR_CLUSTER_ROLE.to_string(),
        };
        rb.subjects = Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]);
        rb
    }
}

/// Create-or-patch the service account and role binding for a created job
pub fn ensure_check_rbac(cluster: &dyn ClusterOperations, job: &Job) -> Result<(), ProvisionError> {
    let name = job.name_any();
    let namespace = job.namespace().unwrap_or_default();
    let owner = job_owner_reference(job)?;
    let rbac_error = |source| ProvisionError::Rbac {
        name: name.clone(),
        source,
    };

    cluster
        .create_or_patch_service_account(&namespace, &name, &mutate_service_account(&owner))
        .map_err(rbac_error)?;
    debug!(service_account = %name, "Ensured check job service account");

    cluster
        .create_or_patch_role_binding(
            &namespace,
            &name,
            &mutate_role_binding(&owner, &namespace, &name),
        )
        .map_err(rbac_error)?;
    debug!(role_binding = %name, "Ensured check job role binding");

    Ok(())
}

/// Create the check job and, with RBAC enabled, its identity
pub fn provision_check_job(
    cluster: &dyn ClusterOperations,
    config: &ControllerConfig,
    restic: &Restic,
    hostname: &str,
) -> Result<Job, ProvisionError> {
    let job = build_check_job(config, restic, hostname);
    let name = job.name_any();

    let created = cluster.create_job(&job).map_err(|source| ProvisionError::Job {
        name: name.clone(),
        source,
    })?;
    info!(job = %name, "Created check job");

    if config.enable_rbac {
        ensure_check_rbac(cluster, &created)?;
    }
    Ok(created)
}
