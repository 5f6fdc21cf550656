//! The restic calls a session makes
//!
//! Backups and forgets run with `--host` set to the snapshot host, so every
//! sidecar of a workload prunes only its own snapshots.

use crate::api::{Backend, FileGroup, RetentionPolicy};
use anyhow::Result;
use k8s_openapi::api::core::v1::Secret;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::executor::{CommandExecutor, RealExecutor};
pub use super::restic::ResticEnv;
use super::restic::{backup_args, build_env, forget_args};

/// Abstraction for restic operations, enabling mocking in tests
pub trait ResticOperations: Send + Sync {
    /// Build the restic environment for a backend and its secret
    fn setup_env(&self, backend: &Backend, secret: &Secret, smart_prefix: &str)
        -> Result<ResticEnv>;

    /// Initialize the repository unless it already exists
    fn init_repository_if_absent(&self, env: &ResticEnv) -> Result<()>;

    /// Back up one file group
    fn backup(&self, env: &ResticEnv, fg: &FileGroup) -> Result<()>;

    /// Apply a retention policy to one file group's snapshots
    fn forget(&self, env: &ResticEnv, fg: &FileGroup, policy: &RetentionPolicy) -> Result<()>;

    /// Check repository integrity
    fn check(&self, env: &ResticEnv) -> Result<String>;
}

/// Restic CLI driven through a [`CommandExecutor`]
pub struct ResticWrapper<E: CommandExecutor = RealExecutor> {
    executor: E,
    binary: PathBuf,
    scratch_dir: PathBuf,
    hostname: String,
}

impl ResticWrapper<RealExecutor> {
    pub fn new(binary: PathBuf, scratch_dir: PathBuf, hostname: impl Into<String>) -> Self {
        Self::with_executor(RealExecutor::new(), binary, scratch_dir, hostname)
    }
}

impl<E: CommandExecutor> ResticWrapper<E> {
    pub fn with_executor(
        executor: E,
        binary: PathBuf,
        scratch_dir: PathBuf,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            binary,
            scratch_dir,
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn run(&self, env: &ResticEnv, args: Vec<String>) -> Result<String> {
        self.executor
            .run_command_stdout(&self.binary, &args, env.vars())
    }

    fn with_global(env: &ResticEnv, mut args: Vec<String>) -> Vec<String> {
        args.extend(env.global_args());
        args
    }
}

impl<E: CommandExecutor> ResticOperations for ResticWrapper<E> {
    fn setup_env(
        &self,
        backend: &Backend,
        secret: &Secret,
        smart_prefix: &str,
    ) -> Result<ResticEnv> {
        let env = build_env(backend, secret, smart_prefix, &self.scratch_dir)?;
        if let Some(ref local) = backend.local {
            // restic will not create parent directories of a local repository
            let repo = Path::new(&local.mount_path).join(smart_prefix.trim_matches('/'));
            fs::create_dir_all(&repo)?;
        }
        Ok(env)
    }

    fn init_repository_if_absent(&self, env: &ResticEnv) -> Result<()> {
        let snapshots = Self::with_global(env, vec!["snapshots".to_string(), "--json".to_string()]);
        if self.run(env, snapshots).is_ok() {
            debug!(repository = ?env.repository(), "Repository already initialized");
            return Ok(());
        }

        info!(repository = ?env.repository(), "Initializing repository");
        match self.run(env, Self::with_global(env, vec!["init".to_string()])) {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("already initialized") || msg.contains("already exists") {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn backup(&self, env: &ResticEnv, fg: &FileGroup) -> Result<()> {
        info!(path = %fg.path, host = %self.hostname, "Backing up file group");
        self.run(env, backup_args(env, fg, &self.hostname))?;
        Ok(())
    }

    fn forget(&self, env: &ResticEnv, fg: &FileGroup, policy: &RetentionPolicy) -> Result<()> {
        info!(path = %fg.path, policy = %policy.name, "Applying retention policy");
        self.run(env, forget_args(env, fg, policy, &self.hostname))?;
        Ok(())
    }

    fn check(&self, env: &ResticEnv) -> Result<String> {
        info!(repository = ?env.repository(), "Checking repository");
        self.run(env, Self::with_global(env, vec!["check".to_string()]))
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Recorded operation call
    #[derive(Clone, Debug, PartialEq)]
    pub enum ResticCall {
        SetupEnv { smart_prefix: String },
        Init,
        Backup { path: String },
        Forget { path: String, policy: String },
        Check,
    }

    /// Mock restic operations for testing
    #[derive(Clone, Default)]
    pub struct MockResticOps {
        /// Recorded operation calls
        pub calls: Arc<Mutex<Vec<ResticCall>>>,
        failing_backups: Arc<Mutex<HashSet<String>>>,
        failing_forgets: Arc<Mutex<HashSet<String>>>,
        should_fail_setup: Arc<Mutex<bool>>,
        should_fail_init: Arc<Mutex<bool>>,
        should_fail_check: Arc<Mutex<bool>>,
    }

    impl MockResticOps {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make backups of `path` fail
        pub fn with_failing_backup(self, path: &str) -> Self {
            self.failing_backups.lock().unwrap().insert(path.to_string());
            self
        }

        /// Make retention of `path` fail
        pub fn with_failing_forget(self, path: &str) -> Self {
            self.failing_forgets.lock().unwrap().insert(path.to_string());
            self
        }

        pub fn with_failing_setup(self) -> Self {
            *self.should_fail_setup.lock().unwrap() = true;
            self
        }

        pub fn with_failing_init(self) -> Self {
            *self.should_fail_init.lock().unwrap() = true;
            self
        }

        pub fn with_failing_check(self) -> Self {
            *self.should_fail_check.lock().unwrap() = true;
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<ResticCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Paths backed up, in order
        pub fn backed_up_paths(&self) -> Vec<String> {
            self.get_calls()
                .into_iter()
                .filter_map(|c| match c {
                    ResticCall::Backup { path } => Some(path),
                    _ => None,
                })
                .collect()
        }

        /// Paths whose retention ran, in order
        pub fn forgotten_paths(&self) -> Vec<String> {
            self.get_calls()
                .into_iter()
                .filter_map(|c| match c {
                    ResticCall::Forget { path, .. } => Some(path),
                    _ => None,
                })
                .collect()
        }

        pub fn init_called(&self) -> bool {
            self.get_calls().contains(&ResticCall::Init)
        }

        fn record_call(&self, call: ResticCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ResticOperations for MockResticOps {
        fn setup_env(
            &self,
            backend: &Backend,
            secret: &Secret,
            smart_prefix: &str,
        ) -> Result<ResticEnv> {
            self.record_call(ResticCall::SetupEnv {
                smart_prefix: smart_prefix.to_string(),
            });
            if *self.should_fail_setup.lock().unwrap() {
                anyhow::bail!("Mock setup failure");
            }
            let password = crate::utils::restic::secret_value(secret, "RESTIC_PASSWORD")
                .unwrap_or_default();
            let repository = crate::utils::restic::build_repository_url(backend, smart_prefix)?;
            Ok(ResticEnv::new(&password, &repository))
        }

        fn init_repository_if_absent(&self, _env: &ResticEnv) -> Result<()> {
            self.record_call(ResticCall::Init);
            if *self.should_fail_init.lock().unwrap() {
                anyhow::bail!("Mock init failure");
            }
            Ok(())
        }

        fn backup(&self, _env: &ResticEnv, fg: &FileGroup) -> Result<()> {
            self.record_call(ResticCall::Backup {
                path: fg.path.clone(),
            });
            if self.failing_backups.lock().unwrap().contains(&fg.path) {
                anyhow::bail!("Mock backup failure for {}", fg.path);
            }
            Ok(())
        }

        fn forget(
            &self,
            _env: &ResticEnv,
            fg: &FileGroup,
            policy: &RetentionPolicy,
        ) -> Result<()> {
            self.record_call(ResticCall::Forget {
                path: fg.path.clone(),
                policy: policy.name.clone(),
            });
            if self.failing_forgets.lock().unwrap().contains(&fg.path) {
                anyhow::bail!("Mock forget failure for {}", fg.path);
            }
            Ok(())
        }

        fn check(&self, _env: &ResticEnv) -> Result<String> {
            self.record_call(ResticCall::Check);
            if *self.should_fail_check.lock().unwrap() {
                anyhow::bail!("Mock check failure");
            }
            Ok("no errors were found".to_string())
        }
    }
}
