//! Destination description consumed by connections and the scheduler.

use super::{HostError, HostKey};

/// Transport selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Scheme, hostname and port of one destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostInfo {
    scheme: Scheme,
    hostname: String,
    port: u16,
}

impl HostInfo {
    /// Parse `http://host[:port][/...]`, `https://...`, or a bare hostname
    /// (which defaults to TLS). Any path or query is ignored.
    pub fn parse(input: &str) -> Result<Self, HostError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(HostError::Invalid(input.to_string()));
        }
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{input}")
        };
        let parsed =
            url::Url::parse(&with_scheme).map_err(|_| HostError::Invalid(input.to_string()))?;

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(HostError::UnsupportedScheme(other.to_string())),
        };
        let hostname = match parsed.host() {
            Some(url::Host::Domain(d)) => d.to_string(),
            Some(url::Host::Ipv4(addr)) => addr.to_string(),
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(HostError::MissingHost(input.to_string())),
        };
        let port = parsed.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self {
            scheme,
            hostname,
            port,
        })
    }

    /// Split a full URL into its destination and request target
    /// (path plus query, `/` when empty).
    pub fn split_url(input: &str) -> Result<(Self, String), HostError> {
        let host = Self::parse(input)?;
        let input = input.trim();
        let rest = match input.find("://") {
            Some(i) => &input[i + 3..],
            None => input,
        };
        let target = match rest.find(['/', '?']) {
            Some(i) => &rest[i..],
            None => "",
        };
        let target = target.split('#').next().unwrap_or_default();
        let target = if target.is_empty() {
            "/".to_string()
        } else if target.starts_with('?') {
            format!("/{target}")
        } else {
            target.to_string()
        };
        Ok((host, target))
    }

    pub fn new(scheme: Scheme, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            hostname: hostname.into(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Hostname without IPv6 brackets, suitable for DNS and TLS server names.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Value for the `Host` request header; the port is omitted when it is
    /// the scheme default.
    pub fn host_header(&self) -> String {
        let host = if self.hostname.contains(':') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// `scheme://host[:port]` with no trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.host_header())
    }

    pub fn key(&self) -> HostKey {
        HostKey {
            scheme: self.scheme.as_str().to_string(),
            host: self.hostname.clone(),
            port: self.port,
        }
    }
}

impl std::fmt::Display for HostInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.base_url())
    }
}

impl std::str::FromStr for HostInfo {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostInfo::parse(s)
    }
}
