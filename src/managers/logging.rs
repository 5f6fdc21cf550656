//! Logging setup
//!
//! Console output goes to stderr, as text or one JSON object per line so the
//! pod's log collector can parse it. When a log directory is configured, a
//! daily-rotated file copy is written as well.

use crate::config::{expand_tilde, LogFormat, LoggingSettings};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "restic-sidecar";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging configuration resolved from settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_directory: Option<PathBuf>,
    pub log_level: Level,
    pub format: LogFormat,
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_directory: None,
            log_level: Level::INFO,
            format: LogFormat::Text,
            max_files: 10,
        }
    }
}

impl LoggingConfig {
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_directory: settings.directory.as_deref().map(expand_tilde),
            log_level: parse_level(&settings.level),
            format: settings.format,
            max_files: settings.max_files,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `RUST_LOG` wins over the configured level
fn level_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

fn console_layer(format: LogFormat, level: Level) -> BoxedLayer {
    match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(level_filter(level))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .with_filter(level_filter(level))
            .boxed(),
    }
}

/// Initialize logging
///
/// Returns a guard that must be kept alive for the duration of the program.
/// When the guard is dropped, buffered file output is flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format, config.log_level)];
    let mut file_guard = None;

    if let Some(ref log_dir) = config.log_directory {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            log_dir,
            format!("{}.log", LOG_FILE_PREFIX),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        layers.push(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_filter(level_filter(config.log_level))
                .boxed(),
        );

        cleanup_old_logs(log_dir, config.max_files)?;
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Console-only logging for commands that run without a config
pub fn init_console_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level_filter(Level::INFO))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Cleanup old log files, keeping only the most recent N files
fn cleanup_old_logs(log_dir: &Path, max_files: u32) -> Result<()> {
    let mut log_files: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(LOG_FILE_PREFIX)
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| {
        let a_time = a.metadata().and_then(|m| m.modified()).ok();
        let b_time = b.metadata().and_then(|m| m.modified()).ok();
        b_time.cmp(&a_time)
    });

    for file in log_files.into_iter().skip(max_files as usize) {
        if let Err(e) = fs::remove_file(file.path()) {
            tracing::warn!("Failed to remove old log file {:?}: {}", file.path(), e);
        } else {
            tracing::debug!("Removed old log file: {:?}", file.path());
        }
    }

    Ok(())
}

/// Guard that keeps the file writer alive
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}
