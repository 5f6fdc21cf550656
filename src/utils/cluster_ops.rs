//! Kubernetes access abstraction for testability
//!
//! The session runs on a plain thread, so the kube client is driven through a
//! runtime owned by [`KubeClusterOps`]. Every call blocks until the API server
//! answers.

use crate::api::{Restic, ResticStatus};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("write conflict on {kind} {name} persisted after {attempts} attempts")]
    Conflict {
        kind: String,
        name: String,
        attempts: u32,
    },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("Failed to start client runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Failed to serialize object: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Mutation applied to an object before it is created or written back
pub type Mutator<'a, T> = &'a dyn Fn(T) -> T;

/// Abstraction for the cluster calls a session makes, enabling mocking in tests
pub trait ClusterOperations: Send + Sync {
    fn get_restic(&self, namespace: &str, name: &str) -> Result<Restic>;

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Create a job; fails with [`ClusterError::AlreadyExists`] when the name is taken
    fn create_job(&self, job: &Job) -> Result<Job>;

    /// Create the service account or apply `mutate` to the existing one
    fn create_or_patch_service_account(
        &self,
        namespace: &str,
        name: &str,
        mutate: Mutator<'_, ServiceAccount>,
    ) -> Result<ServiceAccount>;

    /// Create the role binding or apply `mutate` to the existing one
    fn create_or_patch_role_binding(
        &self,
        namespace: &str,
        name: &str,
        mutate: Mutator<'_, RoleBinding>,
    ) -> Result<RoleBinding>;

    /// Read-modify-write of the status subresource, retried on conflict
    fn patch_restic_status(
        &self,
        restic: &Restic,
        mutate: Mutator<'_, ResticStatus>,
    ) -> Result<Restic>;
}

/// Real cluster access through kube-rs
pub struct KubeClusterOps {
    runtime: Runtime,
    client: Client,
    max_attempts: u32,
}

impl KubeClusterOps {
    /// Connect with the in-cluster or kubeconfig credentials
    pub fn connect(num_threads: usize, max_attempts: u32) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads.max(1))
            .enable_all()
            .build()?;
        let client = runtime.block_on(Client::try_default())?;
        Ok(Self {
            runtime,
            client,
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Handle for other adapters that share this client's runtime
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

async fn get_named<K>(api: &Api<K>, namespace: &str, name: &str) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match api.get_opt(name).await? {
        Some(obj) => Ok(obj),
        None => Err(ClusterError::NotFound {
            kind: kind_of::<K>(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
    }
}

async fn create_or_patch<K>(
    api: &Api<K>,
    namespace: &str,
    name: &str,
    mutate: Mutator<'_, K>,
    max_attempts: u32,
) -> Result<K>
where
    K: Resource<DynamicType = ()> + Clone + Default + Serialize + DeserializeOwned + Debug,
{
    for attempt in 1..=max_attempts {
        let result = match api.get_opt(name).await? {
            None => {
                let mut obj = K::default();
                obj.meta_mut().name = Some(name.to_string());
                obj.meta_mut().namespace = Some(namespace.to_string());
                debug!(kind = %kind_of::<K>(), name, "Creating object");
                api.create(&PostParams::default(), &mutate(obj)).await
            }
            Some(current) => {
                // resourceVersion stays in the body so a concurrent writer yields 409
                let updated = mutate(current);
                debug!(kind = %kind_of::<K>(), name, "Patching object");
                api.patch(name, &PatchParams::default(), &Patch::Merge(&updated))
                    .await
            }
        };

        match result {
            Ok(obj) => return Ok(obj),
            Err(e) if api_code(&e) == Some(409) => {
                warn!(kind = %kind_of::<K>(), name, attempt, "Write conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ClusterError::Conflict {
        kind: kind_of::<K>(),
        name: name.to_string(),
        attempts: max_attempts,
    })
}

impl ClusterOperations for KubeClusterOps {
    fn get_restic(&self, namespace: &str, name: &str) -> Result<Restic> {
        let api = self.api::<Restic>(namespace);
        self.runtime.block_on(get_named(&api, namespace, name))
    }

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api = self.api::<Secret>(namespace);
        self.runtime.block_on(get_named(&api, namespace, name))
    }

    fn create_job(&self, job: &Job) -> Result<Job> {
        let namespace = job.namespace().unwrap_or_default();
        let api = self.api::<Job>(&namespace);
        self.runtime
            .block_on(api.create(&PostParams::default(), job))
            .map_err(|e| match api_code(&e) {
                Some(409) => ClusterError::AlreadyExists {
                    kind: kind_of::<Job>(),
                    namespace: namespace.clone(),
                    name: job.name_any(),
                },
                _ => e.into(),
            })
    }

    fn create_or_patch_service_account(
        &self,
        namespace: &str,
        name: &str,
        mutate: Mutator<'_, ServiceAccount>,
    ) -> Result<ServiceAccount> {
        let api = self.api::<ServiceAccount>(namespace);
        self.runtime
            .block_on(create_or_patch(&api, namespace, name, mutate, self.max_attempts))
    }

    fn create_or_patch_role_binding(
        &self,
        namespace: &str,
        name: &str,
        mutate: Mutator<'_, RoleBinding>,
    ) -> Result<RoleBinding> {
        let api = self.api::<RoleBinding>(namespace);
        self.runtime
            .block_on(create_or_patch(&api, namespace, name, mutate, self.max_attempts))
    }

    fn patch_restic_status(
        &self,
        restic: &Restic,
        mutate: Mutator<'_, ResticStatus>,
    ) -> Result<Restic> {
        let namespace = restic.namespace().unwrap_or_default();
        let name = restic.name_any();
        let api = self.api::<Restic>(&namespace);

        self.runtime.block_on(async {
            for attempt in 1..=self.max_attempts {
                let current = get_named(&api, &namespace, &name).await?;
                let status = mutate(current.status.clone().unwrap_or_default());
                let patch = serde_json::json!({
                    "metadata": { "resourceVersion": current.resource_version() },
                    "status": status,
                });

                match api
                    .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                {
                    Ok(updated) => return Ok(updated),
                    Err(e) if api_code(&e) == Some(409) => {
                        warn!(restic = %name, attempt, "Status conflict, retrying");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(ClusterError::Conflict {
                kind: kind_of::<Restic>(),
                name: name.clone(),
                attempts: self.max_attempts,
            })
        })
    }
}

/// In-memory cluster for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Key = (String, String);

    fn key(namespace: &str, name: &str) -> Key {
        (namespace.to_string(), name.to_string())
    }

    /// Mock cluster keyed by (namespace, name)
    #[derive(Clone, Default)]
    pub struct MockClusterOps {
        pub restics: Arc<Mutex<HashMap<Key, Restic>>>,
        pub secrets: Arc<Mutex<HashMap<Key, Secret>>>,
        pub jobs: Arc<Mutex<HashMap<Key, Job>>>,
        pub service_accounts: Arc<Mutex<HashMap<Key, ServiceAccount>>>,
        pub role_bindings: Arc<Mutex<HashMap<Key, RoleBinding>>>,
        status_patches: Arc<Mutex<usize>>,
        should_fail_status: Arc<Mutex<bool>>,
        should_fail_job: Arc<Mutex<bool>>,
        should_fail_rbac: Arc<Mutex<bool>>,
        should_forbid_secrets: Arc<Mutex<bool>>,
    }

    impl MockClusterOps {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_restic(self, restic: Restic) -> Self {
            let k = key(
                &restic.namespace().unwrap_or_default(),
                &restic.name_any(),
            );
            self.restics.lock().unwrap().insert(k, restic);
            self
        }

        pub fn with_secret(self, secret: Secret) -> Self {
            let k = key(
                &secret.namespace().unwrap_or_default(),
                &secret.name_any(),
            );
            self.secrets.lock().unwrap().insert(k, secret);
            self
        }

        pub fn with_failing_status_patch(self) -> Self {
            *self.should_fail_status.lock().unwrap() = true;
            self
        }

        pub fn with_failing_job_creation(self) -> Self {
            *self.should_fail_job.lock().unwrap() = true;
            self
        }

        pub fn with_failing_rbac(self) -> Self {
            *self.should_fail_rbac.lock().unwrap() = true;
            self
        }

        /// Secret reads are rejected as the API server does without RBAC
        pub fn with_forbidden_secrets(self) -> Self {
            *self.should_forbid_secrets.lock().unwrap() = true;
            self
        }

        /// Current status of a stored Restic
        pub fn restic_status(&self, namespace: &str, name: &str) -> Option<ResticStatus> {
            self.restics
                .lock()
                .unwrap()
                .get(&key(namespace, name))
                .and_then(|r| r.status.clone())
        }

        pub fn job_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .map(|j| j.name_any())
                .collect();
            names.sort();
            names
        }

        pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
            self.service_accounts
                .lock()
                .unwrap()
                .get(&key(namespace, name))
                .cloned()
        }

        pub fn role_binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
            self.role_bindings
                .lock()
                .unwrap()
                .get(&key(namespace, name))
                .cloned()
        }

        pub fn status_patch_count(&self) -> usize {
            *self.status_patches.lock().unwrap()
        }

        fn upsert<K>(
            store: &Mutex<HashMap<Key, K>>,
            namespace: &str,
            name: &str,
            mutate: Mutator<'_, K>,
        ) -> K
        where
            K: Resource<DynamicType = ()> + Clone + Default,
        {
            let mut store = store.lock().unwrap();
            let current = store.get(&key(namespace, name)).cloned().unwrap_or_else(|| {
                let mut obj = K::default();
                obj.meta_mut().name = Some(name.to_string());
                obj.meta_mut().namespace = Some(namespace.to_string());
                obj
            });
            let updated = mutate(current);
            store.insert(key(namespace, name), updated.clone());
            updated
        }

        fn not_found(kind: &str, namespace: &str, name: &str) -> ClusterError {
            ClusterError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        }

        fn injected(what: &str) -> ClusterError {
            ClusterError::Api(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("mock {} failure", what),
                reason: "InternalError".to_string(),
                code: 500,
            }))
        }
    }

    impl ClusterOperations for MockClusterOps {
        fn get_restic(&self, namespace: &str, name: &str) -> Result<Restic> {
            self.restics
                .lock()
                .unwrap()
                .get(&key(namespace, name))
                .cloned()
                .ok_or_else(|| Self::not_found("Restic", namespace, name))
        }

        fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
            if *self.should_forbid_secrets.lock().unwrap() {
                return Err(ClusterError::Api(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!(
                        "secrets \"{}\" is forbidden: cannot get resource in namespace \"{}\"",
                        name, namespace
                    ),
                    reason: "Forbidden".to_string(),
                    code: 403,
                })));
            }
            self.secrets
                .lock()
                .unwrap()
                .get(&key(namespace, name))
                .cloned()
                .ok_or_else(|| Self::not_found("Secret", namespace, name))
        }

        fn create_job(&self, job: &Job) -> Result<Job> {
            if *self.should_fail_job.lock().unwrap() {
                return Err(Self::injected("job creation"));
            }
            let namespace = job.namespace().unwrap_or_default();
            let name = job.name_any();
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&key(&namespace, &name)) {
                return Err(ClusterError::AlreadyExists {
                    kind: "Job".to_string(),
                    namespace,
                    name,
                });
            }
            let mut created = job.clone();
            created.metadata.uid = Some(format!("uid-{}", name));
            jobs.insert(key(&namespace, &name), created.clone());
            Ok(created)
        }

        fn create_or_patch_service_account(
            &self,
            namespace: &str,
            name: &str,
            mutate: Mutator<'_, ServiceAccount>,
        ) -> Result<ServiceAccount> {
            if *self.should_fail_rbac.lock().unwrap() {
                return Err(Self::injected("service account"));
            }
            Ok(Self::upsert(&self.service_accounts, namespace, name, mutate))
        }

        fn create_or_patch_role_binding(
            &self,
            namespace: &str,
            name: &str,
            mutate: Mutator<'_, RoleBinding>,
        ) -> Result<RoleBinding> {
            if *self.should_fail_rbac.lock().unwrap() {
                return Err(Self::injected("role binding"));
            }
            Ok(Self::upsert(&self.role_bindings, namespace, name, mutate))
        }

        fn patch_restic_status(
            &self,
            restic: &Restic,
            mutate: Mutator<'_, ResticStatus>,
        ) -> Result<Restic> {
            if *self.should_fail_status.lock().unwrap() {
                return Err(Self::injected("status patch"));
            }
            let namespace = restic.namespace().unwrap_or_default();
            let name = restic.name_any();
            let mut restics = self.restics.lock().unwrap();
            let stored = restics
                .get_mut(&key(&namespace, &name))
                .ok_or_else(|| Self::not_found("Restic", &namespace, &name))?;
            stored.status = Some(mutate(stored.status.clone().unwrap_or_default()));
            *self.status_patches.lock().unwrap() += 1;
            Ok(stored.clone())
        }
    }
}
