use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kube::CustomResourceExt;
use restic_sidecar::config::{self, expand_tilde, ControllerConfig, LogFormat};
use restic_sidecar::managers::events::KubeEventRecorder;
use restic_sidecar::managers::logging::{init_console_logging, init_logging, LoggingConfig};
use restic_sidecar::utils::restic::resolve_restic_binary;
use restic_sidecar::utils::{KubeClusterOps, PushgatewayClient, ResticWrapper};
use restic_sidecar::{BackupController, Restic, SessionOutcome};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "restic-sidecar")]
#[command(about = "Backup sidecar running restic sessions for a Restic resource", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file; flags and environment override it
    #[arg(short, long, env = "STASH_SIDECAR_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup session
    Backup,

    /// Check repository integrity (run by the check job)
    Check,

    /// Validate configuration
    Validate,

    /// Print the Restic CustomResourceDefinition as YAML
    Crd,
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Namespace of the Restic resource
    #[arg(long, env = "NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Name of the Restic resource
    #[arg(long, env = "RESTIC_NAME", global = true)]
    restic_name: Option<String>,

    /// Kind of the workload running the sidecar
    #[arg(long, global = true)]
    workload_kind: Option<String>,

    /// Name of the workload running the sidecar
    #[arg(long, global = true)]
    workload_name: Option<String>,

    /// Directory used for restic cache and temporary files
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Pushgateway URL for session metrics
    #[arg(long, env = "PUSHGATEWAY_URL", global = true)]
    pushgateway_url: Option<String>,

    #[arg(long, env = "NODE_NAME", global = true)]
    node_name: Option<String>,

    #[arg(long, env = "POD_NAME", global = true)]
    pod_name: Option<String>,

    /// Host recorded in snapshots
    #[arg(long = "host-name", alias = "snapshot-hostname", global = true)]
    snapshot_hostname: Option<String>,

    /// Repository sub-path below the backend prefix
    #[arg(long, global = true)]
    smart_prefix: Option<String>,

    /// Attempts for conflicting status updates
    #[arg(long, global = true)]
    max_num_requeues: Option<u32>,

    /// Registry of the check job image
    #[arg(long, global = true)]
    docker_registry: Option<String>,

    /// Tag of the check job image
    #[arg(long, global = true)]
    image_tag: Option<String>,

    /// Give the check job its own service account and role binding
    #[arg(long, global = true)]
    enable_rbac: bool,

    /// Worker threads for the Kubernetes client
    #[arg(long, global = true)]
    num_threads: Option<usize>,

    /// Restic binary to use instead of the one on PATH
    #[arg(long, env = "RESTIC_BINARY", global = true)]
    restic_binary: Option<PathBuf>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

impl Overrides {
    fn apply(self, config: &mut ControllerConfig) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut config.namespace, self.namespace);
        set(&mut config.restic_name, self.restic_name);
        set(&mut config.workload.kind, self.workload_kind);
        set(&mut config.workload.name, self.workload_name);
        set(&mut config.scratch_dir, self.scratch_dir.map(|p| expand_tilde(&p)));
        set(&mut config.pushgateway_url, self.pushgateway_url);
        set(&mut config.node_name, self.node_name);
        set(&mut config.pod_name, self.pod_name);
        set(&mut config.snapshot_hostname, self.snapshot_hostname);
        set(&mut config.smart_prefix, self.smart_prefix);
        set(&mut config.max_num_requeues, self.max_num_requeues);
        set(&mut config.docker_registry, self.docker_registry);
        set(&mut config.image_tag, self.image_tag);
        set(&mut config.num_threads, self.num_threads);
        set(&mut config.logging.level, self.log_level);
        if self.restic_binary.is_some() {
            config.restic_binary = self.restic_binary;
        }
        if self.enable_rbac {
            config.enable_rbac = true;
        }
        if self.log_json {
            config.logging.format = LogFormat::Json;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require a config - use simple console logging
    if let Commands::Crd = cli.command {
        let crd = serde_yaml::to_string(&Restic::crd()).context("Failed to render CRD")?;
        print!("{}", crd);
        return Ok(());
    }

    let mut config = match cli.config {
        Some(ref path) => config::load_config(expand_tilde(path))
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ControllerConfig::default(),
    };
    cli.overrides.apply(&mut config);
    config::validate_config(&config)?;

    if let Commands::Validate = cli.command {
        init_console_logging();
        handle_validate(&config);
        return Ok(());
    }

    // Must keep guard alive
    let _log_guard = init_logging(&LoggingConfig::from_settings(&config.logging))?;
    let controller = build_controller(config)?;

    match cli.command {
        Commands::Backup => match controller.backup()? {
            SessionOutcome::Paused => info!("Restic is paused, nothing to do"),
            SessionOutcome::Completed { check_job } => {
                info!(check_job = %check_job, "Backup session completed")
            }
        },
        Commands::Check => {
            let output = controller.check()?;
            println!("{}", output.trim_end());
        }
        Commands::Validate | Commands::Crd => {}
    }

    Ok(())
}

fn build_controller(config: ControllerConfig) -> Result<BackupController> {
    let binary = resolve_restic_binary(config.restic_binary.as_deref())?;
    info!(restic = %binary.display(), "Using restic binary");

    let cluster = KubeClusterOps::connect(config.num_threads, config.max_num_requeues)
        .context("Failed to connect to Kubernetes")?;
    let instance = (!config.pod_name.is_empty()).then(|| config.pod_name.clone());
    let events = KubeEventRecorder::new(cluster.client(), cluster.handle(), instance);
    let restic = ResticWrapper::new(
        binary,
        config.scratch_dir.clone(),
        config.resolved_snapshot_hostname(),
    );

    let pushgateway_url = config.pushgateway_url.clone();
    let mut controller = BackupController::new(
        config,
        Box::new(cluster),
        Box::new(restic),
        Box::new(events),
    );
    if !pushgateway_url.is_empty() {
        controller = controller.with_pusher(Box::new(PushgatewayClient::new(pushgateway_url)));
    }
    Ok(controller)
}

fn handle_validate(config: &ControllerConfig) {
    println!("✓ Configuration is valid\n");
    println!("Restic: {}/{}", config.namespace, config.restic_name);
    if config.workload.is_set() {
        println!("Workload: {} {}", config.workload.kind, config.workload.name);
    }
    println!("Snapshot host: {}", config.resolved_snapshot_hostname());
    println!("Scratch dir: {}", config.scratch_dir.display());
    if config.pushgateway_url.is_empty() {
        println!("Pushgateway: disabled");
    } else {
        println!("Pushgateway: {}", config.pushgateway_url);
    }
    println!(
        "Check job image: {}",
        restic_sidecar::utils::docker::Docker::stash(&config.docker_registry, &config.image_tag)
    );
    println!("RBAC: {}", if config.enable_rbac { "enabled" } else { "disabled" });
}
