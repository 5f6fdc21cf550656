//! Seam between restic invocations and the process table
//!
//! [`ResticWrapper`](super::restic_ops::ResticWrapper) only ever talks to a
//! [`CommandExecutor`], so tests can script restic's answers per subcommand.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::process::Output;

/// Abstraction for command execution, enabling mocking in tests
pub trait CommandExecutor: Send + Sync {
    /// Run a command with extra environment variables
    fn run_command(
        &self,
        program: &Path,
        args: &[String],
        envs: &HashMap<String, String>,
    ) -> Result<Output>;

    /// Run a command and return stdout as string
    fn run_command_stdout(
        &self,
        program: &Path,
        args: &[String],
        envs: &HashMap<String, String>,
    ) -> Result<String> {
        let output = self.run_command(program, args, envs)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealExecutor {
    fn run_command(
        &self,
        program: &Path,
        args: &[String],
        envs: &HashMap<String, String>,
    ) -> Result<Output> {
        super::command::run_command(program, args, envs)
    }
}

/// A mock executor for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
        pub envs: HashMap<String, String>,
    }

    impl CommandCall {
        /// First argument, i.e. the restic subcommand
        pub fn subcommand(&self) -> Option<&str> {
            self.args.first().map(String::as_str)
        }
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success { stdout: String, stderr: String },
        Failure { stderr: String, exit_code: i32 },
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::Success {
                stdout: String::new(),
                stderr: String::new(),
            }
        }
    }

    /// Mock executor for testing
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        /// Recorded command invocations
        pub calls: Arc<Mutex<Vec<CommandCall>>>,
        /// Pre-configured responses keyed by subcommand (first argument)
        responses: Arc<Mutex<HashMap<String, MockResponse>>>,
        /// Default response when no specific response is configured
        default_response: Arc<Mutex<MockResponse>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a response for a specific subcommand
        pub fn expect(self, subcommand: &str, response: MockResponse) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(subcommand.to_string(), response);
            self
        }

        /// Set the default response for unconfigured subcommands
        pub fn with_default_response(self, response: MockResponse) -> Self {
            *self.default_response.lock().unwrap() = response;
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Subcommands in invocation order
        pub fn subcommands(&self) -> Vec<String> {
            self.get_calls()
                .iter()
                .filter_map(|c| c.subcommand().map(String::from))
                .collect()
        }

        fn get_response(&self, subcommand: &str) -> MockResponse {
            self.responses
                .lock()
                .unwrap()
                .get(subcommand)
                .cloned()
                .unwrap_or_else(|| self.default_response.lock().unwrap().clone())
        }
    }

    impl CommandExecutor for MockExecutor {
        fn run_command(
            &self,
            program: &Path,
            args: &[String],
            envs: &HashMap<String, String>,
        ) -> Result<Output> {
            let call = CommandCall {
                program: program.display().to_string(),
                args: args.to_vec(),
                envs: envs.clone(),
            };
            let response = self.get_response(call.subcommand().unwrap_or_default());
            self.calls.lock().unwrap().push(call);

            match response {
                MockResponse::Success { stdout, stderr } => Ok(Output {
                    status: std::process::ExitStatus::default(),
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                }),
                MockResponse::Failure { stderr, exit_code } => {
                    anyhow::bail!("Command failed with exit code {:?}: {}", exit_code, stderr)
                }
            }
        }
    }
}
