use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::shared::paths::{ensure_dir, get_log_dir};

/// Environment variables that switch on debug output.
pub const DEBUG_ENV_VARS: [&str; 2] = ["DEBUG", "GNOME_V4L2_DEBUG"];

const LOG_FILE: &str = "bridge.log";

/// Keeps the file writer flushing until dropped.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// True when either debug variable is present in the environment.
pub fn debug_requested_by_env() -> bool {
    DEBUG_ENV_VARS
        .iter()
        .any(|name| std::env::var_os(name).is_some())
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn file_writer(
    log_dir: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), String> {
    ensure_dir(log_dir).map_err(|e| format!("cannot create {}: {}", log_dir.display(), e))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE)
        .build(log_dir)
        .map_err(|e| e.to_string())?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber: stderr always, plus a daily log file
/// under the data directory when it can be created.
///
/// `RUST_LOG` overrides the level chosen from `debug`.
pub fn init_logging(debug: bool) -> LoggingGuards {
    let log_dir = get_log_dir();
    let mut guards = Vec::new();

    let (file_layer, file_error) = match file_writer(&log_dir) {
        Ok((writer, guard)) => {
            guards.push(guard);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false);
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = installed {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    match file_error {
        None => tracing::info!(target: "system", "Logging initialized at {:?}", log_dir),
        Some(e) => tracing::warn!(target: "system", "File logging disabled: {}", e),
    }
    if debug {
        tracing::debug!(target: "system", "Debug logging enabled");
    }

    LoggingGuards { _guards: guards }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_follows_debug_flag() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn test_file_writer_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");

        let (_writer, _guard) = file_writer(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
