use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::host::HostKey;
use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per job (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.25,
            max_delay_secs: 10,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        let base = if cfg.base_delay_secs.is_finite() && cfg.base_delay_secs > 0.0 {
            Duration::from_secs_f64(cfg.base_delay_secs)
        } else {
            Duration::ZERO
        };
        RetryPolicy {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: base,
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }
}

/// Filter used when neither `RUST_LOG` nor `[log] filter` is usable.
pub const DEFAULT_LOG_FILTER: &str = "info,restclient_core=debug";

/// Logging section of config.toml.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directives. `RUST_LOG` takes precedence when set.
    pub filter: String,
    /// Log file name under `~/.local/state/restclient/`.
    pub file_name: String,
    /// Mirror events to stderr as well as the file.
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file_name: "restclient.log".to_string(),
            stderr: false,
        }
    }
}

/// Per-host override, keyed by hostname or by `scheme:host:port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOverride {
    /// Maximum concurrent connections (and therefore running jobs) for this host.
    pub max_connections: usize,
}

/// Global configuration loaded from `~/.config/restclient/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestClientConfig {
    /// Maximum concurrent connections per host unless overridden in `hosts`.
    pub max_connections_per_host: usize,
    /// Seconds allowed for DNS resolution plus TCP connect.
    pub connect_timeout_secs: u64,
    /// Seconds allowed for any single read, write or TLS handshake.
    pub io_timeout_secs: u64,
    /// Value of the default `User-Agent` header.
    pub user_agent: String,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub log: LogConfig,
    /// Per-host concurrency overrides.
    #[serde(default)]
    pub hosts: BTreeMap<String, HostOverride>,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 4,
            connect_timeout_secs: 15,
            io_timeout_secs: 30,
            user_agent: concat!("restclient/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: None,
            log: LogConfig::default(),
            hosts: BTreeMap::new(),
        }
    }
}

impl RestClientConfig {
    /// Concurrency limit for one host. An exact `scheme:host:port` entry wins
    /// over a bare hostname entry; zero is returned as-is so the scheduler can
    /// report the stall instead of hanging.
    pub fn limit_for(&self, key: &HostKey) -> usize {
        self.hosts
            .get(&key.to_string_key())
            .or_else(|| self.hosts.get(&key.host))
            .map(|o| o.max_connections)
            .unwrap_or(self.max_connections_per_host)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_else(|| RetryPolicy::from(&RetryConfig::default()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("restclient")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RestClientConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RestClientConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from_path(&path)
}

/// Load configuration from an explicit path.
pub fn load_from_path(path: &Path) -> Result<RestClientConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg: RestClientConfig =
        toml::from_str(&data).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
