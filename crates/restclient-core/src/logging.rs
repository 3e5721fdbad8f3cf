//! Tracing setup: an append-only file in the XDG state dir, optionally
//! mirrored to stderr, with a stderr-only fallback for when the file cannot
//! be opened.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogConfig, DEFAULT_LOG_FILTER};

/// `RUST_LOG` when set and valid, else the configured directives, else the
/// built-in default.
pub fn filter_for(cfg: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// `~/.local/state/restclient/<file_name>`; the directory is created.
pub fn log_path(cfg: &LogConfig) -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("restclient")?;
    Ok(xdg_dirs.place_state_file(&cfg.file_name)?)
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Install the file subscriber. Returns the log file path. On error nothing
/// is installed, so the caller can fall back to [`init_logging_stderr`].
pub fn init_logging(cfg: &LogConfig) -> Result<PathBuf> {
    let path = log_path(cfg)?;
    let file = open_log(&path)?;

    let file_layer = fmt::layer().with_writer(Mutex::new(file)).with_ansi(false);
    let stderr_layer = cfg
        .stderr
        .then(|| fmt::layer().with_writer(std::io::stderr).with_ansi(false));
    tracing_subscriber::registry()
        .with(filter_for(cfg))
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("logging already initialized")?;

    tracing::info!(path = %path.display(), "restclient logging initialized");
    Ok(path)
}

/// Stderr-only logging. Errors (a subscriber already set) are ignored.
pub fn init_logging_stderr(cfg: &LogConfig) {
    let _ = tracing_subscriber::registry()
        .with(filter_for(cfg))
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .try_init();
}
