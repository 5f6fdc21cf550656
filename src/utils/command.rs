//! Subprocess execution with captured output
//!
//! Commands run to completion on the calling thread; restic enforces its own
//! timeouts against the repository backend. The environment passed in
//! carries credentials, so it is never logged.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::{debug, error};

/// Run `program` with extra environment variables, failing on a non-zero exit
pub fn run_command(program: &Path, args: &[String], envs: &HashMap<String, String>) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = %program.display(), "Running: {}", args.join(" "));

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute {}", program.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            program = %program.display(),
            code = ?output.status.code(),
            "Command failed: {}",
            args.join(" ")
        );
        anyhow::bail!(
            "Command failed with exit code {:?}: {}",
            output.status.code(),
            stderr.trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("{}", stdout.trim_end());
    }

    Ok(output)
}
