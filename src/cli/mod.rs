pub mod configure;
pub mod daemon;
pub mod hook;
pub mod status;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use skills::config::LoggingConfig;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr so stdout stays clean for command output.
pub fn init_stderr_logging(config: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.level))
        .with_writer(std::io::stderr)
        .init();
}

/// Log to the configured file. Used by processes that have no terminal: the hook (the host
/// owns its stderr) and the detached overseer. The guard must live until exit.
pub fn init_file_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let path = config.resolved_file();
    let dir = path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .context("logging.file must name a file")?
        .to_os_string();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log dir: {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.level))
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

/// The project a command operates on: `--project`, or the current directory.
pub fn resolve_project(project: Option<PathBuf>) -> Result<PathBuf> {
    match project {
        Some(path) => Ok(path),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}
