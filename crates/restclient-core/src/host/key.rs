use std::fmt;

/// Key used to group jobs, connections and statistics per destination.
///
/// URLs are normalised down to `(scheme, host, port)` so that different paths
/// on the same origin share one queue and one connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl HostKey {
    /// String form used as a config override key and in logs: "scheme:host:port".
    pub fn to_string_key(&self) -> String {
        format!("{}:{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_key())
    }
}
