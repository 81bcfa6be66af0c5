//! Database host derivation and optional IPv4 pinning.
//!
//! The database host is derived from the endpoint URL of the hosted backend by
//! prefixing its host with `db.`. Some runtime networks advertise IPv6 routes to
//! that host which are not actually reachable; forcing IPv4 resolution sidesteps
//! the resulting connect timeouts. Resolution failure is never fatal: the
//! normalized hostname is returned and the driver resolves it itself.

use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_PORT, ResolvedHost};
use crate::notice::{Notice, SharedNotices};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::{Host, Url};

const DB_PREFIX: &str = "db.";

/// Name lookup restricted to IPv4.
#[async_trait]
pub trait HostLookup: Send + Sync + std::fmt::Debug {
    async fn lookup_ipv4(&self, host: &str, port: u16) -> std::io::Result<Vec<Ipv4Addr>>;
}

/// Lookup through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup_ipv4(&self, host: &str, port: u16) -> std::io::Result<Vec<Ipv4Addr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .collect())
    }
}

/// Extract the host component of the endpoint URL.
pub fn extract_host(endpoint_url: &str) -> DbResult<Host<String>> {
    let url = Url::parse(endpoint_url.trim()).map_err(|e| {
        DbError::malformed_config(format!("endpoint URL '{}' is invalid: {}", endpoint_url, e))
    })?;
    match url.host() {
        Some(Host::Domain("")) | None => Err(DbError::malformed_config(format!(
            "endpoint URL '{}' has no host",
            endpoint_url
        ))),
        Some(host) => Ok(host.to_owned()),
    }
}

/// Prefix a host name with `db.` unless it already carries the prefix.
pub fn normalize_host(host: &str) -> String {
    let prefixed = host
        .get(..DB_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(DB_PREFIX));
    if prefixed {
        host.to_string()
    } else {
        format!("{}{}", DB_PREFIX, host)
    }
}

/// Turns an endpoint URL into the host the pool connects to.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    lookup: Arc<dyn HostLookup>,
    timeout: Duration,
    notices: Option<SharedNotices>,
}

impl AddressResolver {
    pub fn new(timeout: Duration) -> Self {
        Self::with_lookup(Arc::new(SystemLookup), timeout)
    }

    pub fn with_lookup(lookup: Arc<dyn HostLookup>, timeout: Duration) -> Self {
        Self {
            lookup,
            timeout,
            notices: None,
        }
    }

    /// Also report resolution warnings to the notice channel.
    pub fn with_notices(mut self, notices: SharedNotices) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Derive the database host, optionally pinned to an IPv4 literal.
    ///
    /// Fails only when the URL has no extractable host; that check happens
    /// before any network activity.
    pub async fn resolve_host(&self, endpoint_url: &str, force_ipv4: bool) -> DbResult<ResolvedHost> {
        let normalized = match extract_host(endpoint_url)? {
            Host::Ipv4(addr) => return Ok(ResolvedHost::ip(addr.into())),
            Host::Ipv6(addr) => return Ok(ResolvedHost::ip(addr.into())),
            Host::Domain(domain) => normalize_host(&domain),
        };

        if !force_ipv4 {
            return Ok(ResolvedHost::name(normalized));
        }

        match self.first_ipv4(&normalized).await {
            Ok(addr) => {
                debug!(host = %normalized, address = %addr, "Pinned database host to IPv4");
                Ok(ResolvedHost::ip(addr.into()))
            }
            Err(reason) => {
                warn!(host = %normalized, reason = %reason, "IPv4 resolution failed, using hostname");
                if let Some(notices) = &self.notices {
                    notices.notify(Notice::warning(format!(
                        "Could not resolve {} to IPv4 ({}); connecting by hostname",
                        normalized, reason
                    )));
                }
                Ok(ResolvedHost::name(normalized))
            }
        }
    }

    async fn first_ipv4(&self, host: &str) -> Result<Ipv4Addr, String> {
        match timeout(self.timeout, self.lookup.lookup_ipv4(host, DEFAULT_PORT)).await {
            Ok(Ok(addrs)) => addrs
                .into_iter()
                .next()
                .ok_or_else(|| "no IPv4 address records".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::{NoticeLevel, NoticeLog};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FixedLookup {
        answer: Result<Vec<Ipv4Addr>, std::io::ErrorKind>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FixedLookup {
        fn ok(addrs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(addrs.iter().map(|a| a.parse().unwrap()).collect()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(kind: std::io::ErrorKind) -> Arc<Self> {
            Arc::new(Self {
                answer: Err(kind),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HostLookup for FixedLookup {
        async fn lookup_ipv4(&self, _host: &str, port: u16) -> std::io::Result<Vec<Ipv4Addr>> {
            assert_eq!(port, DEFAULT_PORT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answer
                .clone()
                .map_err(|kind| std::io::Error::new(kind, "lookup failed"))
        }
    }

    fn resolver(lookup: Arc<FixedLookup>) -> AddressResolver {
        AddressResolver::with_lookup(lookup, Duration::from_secs(1))
    }

    #[test]
    fn test_normalize_host_prefixes() {
        assert_eq!(normalize_host("proj123.example.co"), "db.proj123.example.co");
        assert_eq!(normalize_host("db.proj123.example.co"), "db.proj123.example.co");
        assert_eq!(normalize_host("DB.proj123.example.co"), "DB.proj123.example.co");
        assert_eq!(normalize_host("dbhost.example.co"), "db.dbhost.example.co");
    }

    #[test]
    fn test_normalize_host_non_ascii() {
        assert_eq!(normalize_host("abé.example.co"), "db.abé.example.co");
        assert_eq!(normalize_host("é"), "db.é");
        assert_eq!(normalize_host("db.é.example.co"), "db.é.example.co");
    }

    #[test]
    fn test_normalize_host_idempotent() {
        for host in ["proj.example.co", "db.proj.example.co", "a", "db.", "localhost"] {
            let once = normalize_host(host);
            assert_eq!(normalize_host(&once), once, "not idempotent for {}", host);
        }
    }

    #[test]
    fn test_extract_host() {
        let host = extract_host("https://proj123.example.co").unwrap();
        assert_eq!(host, Host::Domain("proj123.example.co".to_string()));

        let host = extract_host("https://proj123.example.co:8443/rest/v1?x=1").unwrap();
        assert_eq!(host.to_string(), "proj123.example.co");
    }

    #[test]
    fn test_extract_host_malformed() {
        for url in ["", "proj123.example.co", "https://", "mailto:ops@example.co", "not a url"] {
            let err = extract_host(url).unwrap_err();
            assert!(
                matches!(err, DbError::MalformedConfig { .. }),
                "expected malformed config for '{}', got {:?}",
                url,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_without_forcing_ipv4() {
        let lookup = FixedLookup::ok(&["203.0.113.5"]);
        let host = resolver(lookup.clone())
            .resolve_host("https://proj123.example.co", false)
            .await
            .unwrap();
        assert_eq!(host, ResolvedHost::name("db.proj123.example.co"));
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_forced_ipv4() {
        let lookup = FixedLookup::ok(&["203.0.113.5", "203.0.113.6"]);
        let host = resolver(lookup.clone())
            .resolve_host("https://proj123.example.co", true)
            .await
            .unwrap();
        assert_eq!(host.hostname, "203.0.113.5");
        assert!(host.is_ip_literal);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_resolution_failure_falls_back_with_warning() {
        let notices = NoticeLog::new();
        let host = resolver(FixedLookup::failing(std::io::ErrorKind::NotFound))
            .with_notices(notices.clone())
            .resolve_host("https://proj123.example.co", true)
            .await
            .unwrap();
        assert_eq!(host, ResolvedHost::name("db.proj123.example.co"));
        assert_eq!(notices.count(NoticeLevel::Warning), 1);
    }

    #[tokio::test]
    async fn test_no_ipv4_records_falls_back() {
        let host = resolver(FixedLookup::ok(&[]))
            .resolve_host("https://proj123.example.co", true)
            .await
            .unwrap();
        assert_eq!(host.hostname, "db.proj123.example.co");
        assert!(!host.is_ip_literal);
    }

    #[tokio::test]
    async fn test_resolution_timeout_falls_back() {
        let lookup = Arc::new(FixedLookup {
            answer: Ok(vec!["203.0.113.5".parse().unwrap()]),
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let host = AddressResolver::with_lookup(lookup, Duration::from_millis(20))
            .resolve_host("https://proj123.example.co", true)
            .await
            .unwrap();
        assert_eq!(host.hostname, "db.proj123.example.co");
    }

    #[tokio::test]
    async fn test_malformed_url_never_resolves() {
        let lookup = FixedLookup::ok(&["203.0.113.5"]);
        let err = resolver(lookup.clone())
            .resolve_host("proj123.example.co", true)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::MalformedConfig { .. }));
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_ip_literal_used_verbatim() {
        let lookup = FixedLookup::ok(&["203.0.113.5"]);
        let host = resolver(lookup.clone())
            .resolve_host("http://198.51.100.7:8000", true)
            .await
            .unwrap();
        assert_eq!(host.hostname, "198.51.100.7");
        assert!(host.is_ip_literal);
        assert_eq!(lookup.calls(), 0);
    }
}
