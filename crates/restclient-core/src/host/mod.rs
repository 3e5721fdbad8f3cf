//! Destination hosts: parsing, grouping keys and per-host statistics.
//!
//! Jobs and connections are grouped by `(scheme, host, port)`. The statistics
//! table is process-local and owned by the scheduler so that jobs within one
//! runner share observations about each host.

mod info;
mod key;
mod stats;

pub use info::{HostInfo, Scheme};
pub use key::HostKey;
pub use stats::{HostStats, HostStatsTable};

/// Errors produced while turning user input into a `HostInfo`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("invalid host or URL: {0:?}")]
    Invalid(String),
    #[error("unsupported scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),
    #[error("URL has no host: {0:?}")]
    MissingHost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_info_parses_scheme_host_port() {
        let host = HostInfo::parse("https://example.com:8443/path?q=1").unwrap();
        assert_eq!(host.scheme(), Scheme::Https);
        assert_eq!(host.hostname(), "example.com");
        assert_eq!(host.port(), 8443);
        assert!(host.is_tls());
        assert_eq!(host.host_header(), "example.com:8443");
    }

    #[test]
    fn host_info_uses_default_port_when_missing() {
        let host = HostInfo::parse("http://httpbin.org").unwrap();
        assert_eq!(host.port(), 80);
        assert!(!host.is_tls());
        assert_eq!(host.host_header(), "httpbin.org");
        assert_eq!(host.base_url(), "http://httpbin.org");
    }

    #[test]
    fn bare_hostname_defaults_to_tls() {
        let host = HostInfo::parse("identity.example.net").unwrap();
        assert_eq!(host.scheme(), Scheme::Https);
        assert_eq!(host.port(), 443);
    }

    #[test]
    fn ipv6_hosts_are_bracketed_only_in_headers() {
        let host = HostInfo::parse("http://[::1]:8080/").unwrap();
        assert_eq!(host.hostname(), "::1");
        assert_eq!(host.host_header(), "[::1]:8080");
    }

    #[test]
    fn rejects_unsupported_scheme_and_empty_input() {
        assert_eq!(
            HostInfo::parse("ftp://example.com"),
            Err(HostError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(HostInfo::parse("   ").is_err());
    }

    #[test]
    fn split_url_keeps_path_and_query() {
        let (host, target) = HostInfo::split_url("https://httpbin.org/range/10?chunk_size=3#x").unwrap();
        assert_eq!(host.hostname(), "httpbin.org");
        assert_eq!(target, "/range/10?chunk_size=3");

        let (_, target) = HostInfo::split_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(target, "/");
        let (_, target) = HostInfo::split_url("example.com?q=1").unwrap();
        assert_eq!(target, "/?q=1");
    }

    #[test]
    fn host_key_string_form() {
        let key = HostInfo::parse("http://127.0.0.1:8080").unwrap().key();
        assert_eq!(key.to_string_key(), "http:127.0.0.1:8080");
        assert_eq!(key.to_string(), "http:127.0.0.1:8080");

        let v6 = HostInfo::parse("https://[::1]").unwrap().key();
        assert_eq!(v6.to_string_key(), "https:::1:443");
    }

    #[test]
    fn same_origin_shares_key() {
        let a = HostInfo::parse("https://httpbin.org/get").unwrap();
        let b = HostInfo::parse("https://httpbin.org:443/delete").unwrap();
        let c = HostInfo::parse("http://httpbin.org/get").unwrap();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn stats_table_counts_events() {
        let key = HostInfo::parse("https://api.example.com").unwrap().key();
        let mut table = HostStatsTable::new();
        assert!(table.get(&key).is_none());

        table.record_success(&key);
        table.record_error(&key);
        table.record_error(&key);
        table.record_throttled(&key);
        table.record_connection_opened(&key, 2);

        let entry = table.get(&key).unwrap();
        assert_eq!(entry.success_events, 1);
        assert_eq!(entry.error_events, 2);
        assert_eq!(entry.throttled_events, 1);
        assert_eq!(entry.connections_opened, 2);
        assert!(entry.last_error_at.is_some());
    }
}
