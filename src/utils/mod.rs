pub mod cluster_ops;
pub mod command;
pub mod docker;
pub mod locker;
pub mod metrics;
pub mod restic;

// Trait-based abstractions for testability
pub mod executor;
pub mod restic_ops;

// Re-export commonly used types and traits (used by test crate)
pub use cluster_ops::{ClusterError, ClusterOperations, KubeClusterOps};
pub use executor::{CommandExecutor, RealExecutor};
pub use metrics::{MetricsPusher, PushgatewayClient};
pub use restic_ops::{ResticOperations, ResticWrapper};
