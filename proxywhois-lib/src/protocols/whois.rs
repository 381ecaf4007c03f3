//! WHOIS protocol client that talks port 43 through a proxy.
//!
//! The registry's server for a TLD is taken from a small built-in table, a
//! per-client cache, or discovered by asking `whois.iana.org` through the
//! same proxy. After the registry answers, one registrar referral can be
//! followed the way thick and thin registries are usually queried.

use crate::error::{LookupError, TransportError};
use crate::protocols::socks::ProxyConnector;
use crate::proxy::ProxyEndpoint;
use crate::utils::{extract_tld, validate_domain};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Standard WHOIS port.
pub const WHOIS_PORT: u16 = 43;

/// IANA root WHOIS server used for TLD referral discovery.
pub const IANA_WHOIS_SERVER: &str = "whois.iana.org";

/// Upper bound on one WHOIS response.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Performs a WHOIS query for a domain through a given proxy.
#[async_trait]
pub trait WhoisLookup: Send + Sync {
    async fn lookup(&self, proxy: &ProxyEndpoint, domain: &str) -> Result<String, LookupError>;
}

/// Registry WHOIS servers for common TLDs, used before IANA discovery.
fn builtin_whois_server(tld: &str) -> Option<&'static str> {
    let server = match tld {
        "com" | "net" | "cc" | "tv" => "whois.verisign-grs.com",
        "org" => "whois.pir.org",
        "info" => "whois.nic.info",
        "biz" => "whois.nic.biz",
        "io" => "whois.nic.io",
        "co" => "whois.nic.co",
        "me" => "whois.nic.me",
        "us" => "whois.nic.us",
        "uk" => "whois.nic.uk",
        "de" => "whois.denic.de",
        "fr" => "whois.nic.fr",
        "nl" => "whois.domain-registry.nl",
        "eu" => "whois.eu",
        "ca" => "whois.cira.ca",
        "au" => "whois.auda.org.au",
        "jp" => "whois.jprs.jp",
        "edu" => "whois.educause.edu",
        _ => return None,
    };
    Some(server)
}

/// WHOIS client routed through a `ProxyConnector`.
#[derive(Clone)]
pub struct ProxiedWhoisClient {
    connector: Arc<dyn ProxyConnector>,
    /// Timeout for one server exchange
    timeout: Duration,
    follow_referrals: bool,
    /// TLD -> server, `None` when IANA knows no server
    servers: Arc<Mutex<HashMap<String, Option<String>>>>,
}

impl ProxiedWhoisClient {
    pub fn new(connector: Arc<dyn ProxyConnector>) -> Self {
        Self {
            connector,
            timeout: Duration::from_secs(10),
            follow_referrals: true,
            servers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_follow_referrals(mut self, enabled: bool) -> Self {
        self.follow_referrals = enabled;
        self
    }

    /// Pre-seed or override the server used for a TLD.
    pub fn cache_server(&self, tld: &str, server: Option<String>) {
        if let Ok(mut servers) = self.servers.lock() {
            servers.insert(tld.to_lowercase(), server);
        }
    }

    fn cached_server(&self, tld: &str) -> Option<Option<String>> {
        self.servers.lock().ok()?.get(tld).cloned()
    }

    /// Find the registry WHOIS server for `tld`.
    async fn resolve_server(
        &self,
        proxy: &ProxyEndpoint,
        tld: &str,
    ) -> Result<Option<String>, LookupError> {
        if let Some(cached) = self.cached_server(tld) {
            return Ok(cached);
        }
        if let Some(server) = builtin_whois_server(tld) {
            return Ok(Some(server.to_string()));
        }

        debug!(%tld, "discovering WHOIS server via IANA");
        let response = self.query(proxy, IANA_WHOIS_SERVER, tld).await?;
        let server = parse_iana_refer_response(&response);
        self.cache_server(tld, server.clone());
        Ok(server)
    }

    /// One port-43 exchange: send the query line, read until EOF.
    async fn query(
        &self,
        proxy: &ProxyEndpoint,
        server: &str,
        query: &str,
    ) -> Result<String, TransportError> {
        let exchange = async {
            let mut stream = self.connector.open(proxy, server, WHOIS_PORT).await?;
            stream
                .write_all(format!("{}\r\n", query).as_bytes())
                .await?;
            let mut response = Vec::new();
            (&mut stream)
                .take(MAX_RESPONSE_BYTES)
                .read_to_end(&mut response)
                .await?;
            Ok::<_, TransportError>(response)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => Ok(String::from_utf8_lossy(&response).into_owned()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::timeout(
                &format!("WHOIS query to {}", server),
                self.timeout,
            )),
        }
    }
}

#[async_trait]
impl WhoisLookup for ProxiedWhoisClient {
    async fn lookup(&self, proxy: &ProxyEndpoint, domain: &str) -> Result<String, LookupError> {
        let domain = domain.trim().to_lowercase();
        validate_domain(&domain)
            .map_err(|_| LookupError::domain_invalid(format!("Invalid domain: {}", domain)))?;
        let tld = extract_tld(&domain)
            .map_err(|_| LookupError::domain_invalid(format!("Invalid domain: {}", domain)))?;

        let server = self.resolve_server(proxy, &tld).await?.ok_or_else(|| {
            LookupError::domain_invalid(format!("No WHOIS server is known for TLD '{}'", tld))
        })?;

        let mut text = self.query(proxy, &server, &domain).await?;
        check_response(&domain, &text)?;

        if self.follow_referrals {
            if let Some(referral) = parse_registrar_referral(&text) {
                if !referral.eq_ignore_ascii_case(&server) {
                    match self.query(proxy, &referral, &domain).await {
                        Ok(extra) => {
                            text.push('\n');
                            text.push_str(&extra);
                        }
                        Err(e) => {
                            let err = LookupError::from(e);
                            if !err.kind.counts_against_retries() {
                                return Err(err);
                            }
                            debug!(%domain, %referral, error = %err, "registrar referral failed");
                        }
                    }
                }
            }
        }

        Ok(text)
    }
}

/// Reject registry answers that carry no usable record.
fn check_response(domain: &str, text: &str) -> Result<(), LookupError> {
    if text.trim().is_empty() {
        return Err(LookupError::other(format!(
            "Empty WHOIS response for '{}'",
            domain
        )));
    }

    let lower = text.to_lowercase();

    let invalid_patterns = [
        "no whois server is known",
        "invalid tld",
        "unknown tld",
        "no such tld",
        "invalid domain name",
        "invalid query",
        "malformed request",
    ];
    if invalid_patterns.iter().any(|p| lower.contains(p)) {
        return Err(LookupError::domain_invalid(format!(
            "Invalid domain: {}",
            domain
        )));
    }

    if is_rate_limited(&lower) {
        return Err(LookupError::other(format!(
            "Rate limited while querying '{}'",
            domain
        )));
    }

    Ok(())
}

/// Check if the WHOIS output indicates rate limiting.
fn is_rate_limited(output: &str) -> bool {
    let output_lower = output.to_lowercase();
    let rate_limit_patterns = [
        "rate limit exceeded",
        "too many requests",
        "try again later",
        "quota exceeded",
        "limit exceeded",
        "query rate",
        "rate-limited",
    ];

    rate_limit_patterns
        .iter()
        .any(|pattern| output_lower.contains(pattern))
}

/// Parse an IANA WHOIS response for the authoritative WHOIS server.
///
/// The response may use either `refer:` or `whois:`; `refer:` wins.
///
/// ```text
/// whois:        whois.verisign-grs.com
/// refer:        whois.verisign-grs.com
/// ```
pub fn parse_iana_refer_response(response: &str) -> Option<String> {
    let mut whois_server = None;

    for line in response.lines() {
        let line_trimmed = line.trim();
        if let Some(server) = line_trimmed.strip_prefix("refer:") {
            let server = server.trim();
            if !server.is_empty() {
                return Some(server.to_string());
            }
        } else if let Some(server) = line_trimmed.strip_prefix("whois:") {
            let server = server.trim();
            if !server.is_empty() {
                whois_server = Some(server.to_string());
            }
        }
    }

    whois_server
}

/// Find a registrar WHOIS server named in a registry response.
pub fn parse_registrar_referral(response: &str) -> Option<String> {
    for line in response.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if key == "registrar whois server" || key == "whois server" {
            let server = value
                .trim()
                .trim_start_matches("whois://")
                .trim_end_matches('/');
            if !server.is_empty() && !server.contains(' ') {
                return Some(server.to_lowercase());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupErrorKind;
    use crate::protocols::socks::ProxyStream;
    use crate::proxy::ProxyType;
    use std::collections::VecDeque;

    /// Serves scripted exchanges in order, checking host and query.
    struct ScriptedConnector {
        exchanges: Mutex<VecDeque<(String, Result<(String, String), TransportError>)>>,
    }

    impl ScriptedConnector {
        fn new() -> Self {
            Self {
                exchanges: Mutex::new(VecDeque::new()),
            }
        }

        fn answer(self, host: &str, query: &str, reply: &str) -> Self {
            self.exchanges.lock().unwrap().push_back((
                host.to_string(),
                Ok((format!("{}\r\n", query), reply.to_string())),
            ));
            self
        }

        fn fail(self, host: &str, err: TransportError) -> Self {
            self.exchanges
                .lock()
                .unwrap()
                .push_back((host.to_string(), Err(err)));
            self
        }
    }

    #[async_trait]
    impl ProxyConnector for ScriptedConnector {
        async fn open(
            &self,
            _endpoint: &ProxyEndpoint,
            host: &str,
            port: u16,
        ) -> Result<Box<dyn ProxyStream>, TransportError> {
            assert_eq!(port, WHOIS_PORT);
            let (expected_host, outcome) = self
                .exchanges
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected connection");
            assert_eq!(host, expected_host);
            let (query, reply) = outcome?;
            Ok(Box::new(
                tokio_test::io::Builder::new()
                    .write(query.as_bytes())
                    .read(reply.as_bytes())
                    .build(),
            ))
        }
    }

    fn proxy() -> ProxyEndpoint {
        ProxyEndpoint::new("10.0.0.1", 1080, ProxyType::Socks5)
    }

    const VERISIGN_REPLY: &str = "   Domain Name: EXAMPLE.COM\r\n   Registrar WHOIS Server: whois.registrar.example\r\n   Registrar: Example Registrar\r\n";

    #[tokio::test]
    async fn test_lookup_follows_registrar_referral() {
        let connector = ScriptedConnector::new()
            .answer("whois.verisign-grs.com", "example.com", VERISIGN_REPLY)
            .answer(
                "whois.registrar.example",
                "example.com",
                "Registrant Organization: Example Org\n",
            );
        let client = ProxiedWhoisClient::new(Arc::new(connector));

        let text = client.lookup(&proxy(), "EXAMPLE.COM").await.unwrap();
        assert!(text.contains("Domain Name: EXAMPLE.COM"));
        assert!(text.contains("Registrant Organization: Example Org"));
    }

    #[tokio::test]
    async fn test_lookup_without_referrals() {
        let connector = ScriptedConnector::new().answer(
            "whois.verisign-grs.com",
            "example.com",
            VERISIGN_REPLY,
        );
        let client = ProxiedWhoisClient::new(Arc::new(connector)).with_follow_referrals(false);

        let text = client.lookup(&proxy(), "example.com").await.unwrap();
        assert_eq!(text, VERISIGN_REPLY);
    }

    #[tokio::test]
    async fn test_failed_referral_keeps_registry_text() {
        let connector = ScriptedConnector::new()
            .answer("whois.verisign-grs.com", "example.com", VERISIGN_REPLY)
            .fail(
                "whois.registrar.example",
                TransportError::target_unreachable("host unreachable"),
            );
        let client = ProxiedWhoisClient::new(Arc::new(connector));

        let text = client.lookup(&proxy(), "example.com").await.unwrap();
        assert_eq!(text, VERISIGN_REPLY);
    }

    #[tokio::test]
    async fn test_iana_discovery_is_cached() {
        let connector = ScriptedConnector::new()
            .answer(IANA_WHOIS_SERVER, "zz", "refer:        whois.nic.zz\n")
            .answer("whois.nic.zz", "one.zz", "Domain: one.zz\n")
            .answer("whois.nic.zz", "two.zz", "Domain: two.zz\n");
        let client = ProxiedWhoisClient::new(Arc::new(connector));

        assert!(client.lookup(&proxy(), "one.zz").await.is_ok());
        assert!(client.lookup(&proxy(), "two.zz").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_tld_is_domain_invalid() {
        let connector = ScriptedConnector::new().answer(
            IANA_WHOIS_SERVER,
            "qq",
            "% This query returned 0 objects.\n",
        );
        let client = ProxiedWhoisClient::new(Arc::new(connector));

        let err = client.lookup(&proxy(), "nothing.qq").await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::DomainInvalid);

        // Negative result is cached; no further connection is made.
        let err = client.lookup(&proxy(), "other.qq").await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::DomainInvalid);
    }

    #[tokio::test]
    async fn test_malformed_domain_is_domain_invalid() {
        let client = ProxiedWhoisClient::new(Arc::new(ScriptedConnector::new()));
        let err = client.lookup(&proxy(), "not a domain").await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::DomainInvalid);
    }

    #[tokio::test]
    async fn test_dead_proxy_is_transport_fatal() {
        let connector = ScriptedConnector::new().fail(
            "whois.verisign-grs.com",
            TransportError::proxy_unreachable("connection refused"),
        );
        let client = ProxiedWhoisClient::new(Arc::new(connector));

        let err = client.lookup(&proxy(), "example.com").await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::TransportFatal);
    }

    #[tokio::test]
    async fn test_rate_limited_reply_is_other() {
        let connector = ScriptedConnector::new().answer(
            "whois.pir.org",
            "example.org",
            "WHOIS LIMIT EXCEEDED - SEE WWW.PIR.ORG/WHOIS FOR DETAILS\n",
        );
        let client = ProxiedWhoisClient::new(Arc::new(connector));

        let err = client.lookup(&proxy(), "example.org").await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::Other);
    }

    #[test]
    fn test_parse_iana_refer_response() {
        let response = "% IANA WHOIS server\n\nrefer:        whois.verisign-grs.com\n\ndomain:       COM\n";
        assert_eq!(
            parse_iana_refer_response(response),
            Some("whois.verisign-grs.com".to_string())
        );

        let no_refer = "% IANA WHOIS server\ndomain: TEST\nstatus: ACTIVE\n";
        assert_eq!(parse_iana_refer_response(no_refer), None);

        let whois_field = "whois:        whois.nic.example\n\ndomain:       EXAMPLE\n";
        assert_eq!(
            parse_iana_refer_response(whois_field),
            Some("whois.nic.example".to_string())
        );

        let both_fields = "whois:        whois.old-server.com\nrefer:        whois.correct-server.com\n";
        assert_eq!(
            parse_iana_refer_response(both_fields),
            Some("whois.correct-server.com".to_string())
        );

        assert_eq!(parse_iana_refer_response("refer:        \n"), None);
    }

    #[test]
    fn test_parse_registrar_referral() {
        assert_eq!(
            parse_registrar_referral(VERISIGN_REPLY),
            Some("whois.registrar.example".to_string())
        );
        assert_eq!(
            parse_registrar_referral("Whois Server: whois://WHOIS.Other.example/\n"),
            Some("whois.other.example".to_string())
        );
        assert_eq!(parse_registrar_referral("Registrar WHOIS Server:\n"), None);
        assert_eq!(parse_registrar_referral("Domain Name: X.COM\n"), None);
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limited("Rate limit exceeded. Try again later."));
        assert!(is_rate_limited("Too many requests from your IP."));
        assert!(!is_rate_limited("Normal whois response"));
    }
}
