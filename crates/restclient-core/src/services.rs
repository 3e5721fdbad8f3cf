//! Process-wide services shared by every connection: TLS client setup,
//! timeouts and name resolution.
//!
//! The runtime itself is tokio's current-thread scheduler; this handle is what
//! connections hold on to. Build one explicitly with [`Services::new`] or use
//! the lazily created [`Services::shared`] instance.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

use crate::config::RestClientConfig;
use crate::host::HostInfo;
use crate::http::HttpError;

pub struct Services {
    tls: TlsConnector,
    connect_timeout: Duration,
    io_timeout: Duration,
    user_agent: String,
}

static SHARED: OnceLock<Arc<Services>> = OnceLock::new();

impl Services {
    /// Services trusting the bundled web PKI roots.
    pub fn new(cfg: &RestClientConfig) -> Result<Self, HttpError> {
        let tls = default_tls_config()?;
        Ok(Self::with_tls_config(cfg, tls))
    }

    /// Services using a caller-built rustls client config (private roots,
    /// client certificates).
    pub fn with_tls_config(cfg: &RestClientConfig, tls: Arc<rustls::ClientConfig>) -> Self {
        Self {
            tls: TlsConnector::from(tls),
            connect_timeout: cfg.connect_timeout(),
            io_timeout: cfg.io_timeout(),
            user_agent: cfg.user_agent.clone(),
        }
    }

    /// Process-wide instance built from default configuration on first use.
    pub fn shared() -> Result<Arc<Services>, HttpError> {
        if let Some(s) = SHARED.get() {
            return Ok(Arc::clone(s));
        }
        let built = Arc::new(Services::new(&RestClientConfig::default())?);
        Ok(Arc::clone(SHARED.get_or_init(|| built)))
    }

    pub fn tls_connector(&self) -> &TlsConnector {
        &self.tls
    }

    /// Budget for resolution plus TCP connect.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Budget for a single read, write or TLS handshake.
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Resolve the host to socket addresses.
    pub async fn resolve(&self, host: &HostInfo) -> Result<Vec<SocketAddr>, HttpError> {
        let target = (host.hostname(), host.port());
        let addrs = match tokio::time::timeout(self.connect_timeout, tokio::net::lookup_host(target))
            .await
        {
            Ok(Ok(addrs)) => addrs.collect::<Vec<_>>(),
            Ok(Err(e)) => {
                return Err(HttpError::Resolve(format!("{}: {e}", host.hostname())));
            }
            Err(_) => return Err(HttpError::Timeout("resolve")),
        };
        if addrs.is_empty() {
            return Err(HttpError::Resolve(host.hostname().to_string()));
        }
        tracing::debug!(host = %host, count = addrs.len(), "resolved");
        Ok(addrs)
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// rustls client config with the ring provider and web PKI trust anchors.
pub fn default_tls_config() -> Result<Arc<rustls::ClientConfig>, HttpError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| HttpError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}
