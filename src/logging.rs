//! Tracing configuration and log routing.
//!
//! The gateway logs to stdout using a compact formatter, and optionally to a file. When
//! `PXTOOLS_LOG_FILE` is set, logs are appended to that path; otherwise a file logger is
//! created under `logs/pxtools.log`. Request handlers block on slow provider calls, so the
//! file layer goes through a non‑blocking writer.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Configure tracing subscribers for stdout and optional file logging.
///
/// Respects `RUST_LOG` for filtering (defaults to `info`, with `tower_http` access logs
/// enabled at `info` as well). The file writer guard lives in a global for the process
/// lifetime.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Resolve the log file location, honouring `PXTOOLS_LOG_FILE` when set.
fn log_file_path() -> PathBuf {
    std::env::var("PXTOOLS_LOG_FILE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("logs").join("pxtools.log"))
}

/// Open the log file in append mode and wrap it in a non‑blocking writer.
///
/// Returns `None` when the parent directory cannot be created or the file cannot be opened;
/// stdout logging keeps working in that case.
fn configure_file_writer() -> Option<NonBlocking> {
    let path = log_file_path();
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty())
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}
