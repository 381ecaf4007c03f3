//! Core data types for the lookup pipeline.
//!
//! This module defines the per-domain result accumulator (`WhoisRecord`),
//! the attempts attached to it, and the configuration knobs shared by the
//! pipeline and its workers.

use crate::error::{LookupErrorKind, ProxyWhoisError};
use crate::proxy::ProxyEndpoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

/// Number of counted failures after which a record is terminal.
pub const DEFAULT_RETRY_LIMIT: usize = 3;

/// One error recorded against an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptError {
    pub kind: LookupErrorKind,
    pub message: String,
}

/// One execution of a lookup for one domain through one proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisAttempt {
    /// When the attempt began
    pub timestamp: DateTime<Utc>,

    /// Set once the lookup returned data
    pub success: bool,

    /// The proxy the attempt went through, as it was at the time
    pub proxy: ProxyEndpoint,

    /// Errors in the order they were recorded
    pub errors: Vec<AttemptError>,
}

impl WhoisAttempt {
    pub fn new(proxy: ProxyEndpoint) -> Self {
        Self {
            timestamp: Utc::now(),
            success: false,
            proxy,
            errors: Vec::new(),
        }
    }

    pub fn add_error<M: Into<String>>(&mut self, kind: LookupErrorKind, message: M) {
        self.errors.push(AttemptError {
            kind,
            message: message.into(),
        });
    }

    /// Whether the proxy, rather than the lookup, caused this attempt to fail.
    pub fn is_transport_fatal(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.kind == LookupErrorKind::TransportFatal)
    }

    /// A failed attempt that uses up one of the record's retries.
    pub fn is_counted_failure(&self) -> bool {
        !self.success && !self.is_transport_fatal()
    }
}

/// Result accumulator for one domain as it moves through the queues.
///
/// The current attempt is always the last element of `attempts`, so the two
/// can never disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisRecord {
    domain: String,
    attempts: Vec<WhoisAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl WhoisRecord {
    /// Create a record with zero attempts. The domain is normalized.
    pub fn new(domain: &str) -> Self {
        Self {
            domain: crate::utils::normalize_domain(domain),
            attempts: Vec::new(),
            data: None,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn attempts(&self) -> &[WhoisAttempt] {
        &self.attempts
    }

    pub fn current_attempt(&self) -> Option<&WhoisAttempt> {
        self.attempts.last()
    }

    /// Append an attempt; it becomes the current one.
    pub fn add_attempt(&mut self, attempt: WhoisAttempt) -> &mut WhoisAttempt {
        self.attempts.push(attempt);
        let last = self.attempts.len() - 1;
        &mut self.attempts[last]
    }

    /// Record an error on the current attempt.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no attempt has been added yet.
    pub fn add_error<M: Into<String>>(
        &mut self,
        kind: LookupErrorKind,
        message: M,
    ) -> Result<(), ProxyWhoisError> {
        let message = message.into();
        match self.attempts.last_mut() {
            Some(attempt) => {
                attempt.add_error(kind, message);
                Ok(())
            }
            None => {
                error!(domain = %self.domain, %message, "Adding error to result without attempt");
                Err(ProxyWhoisError::invariant(format!(
                    "Adding error to result without attempt for '{}': {}",
                    self.domain, message
                )))
            }
        }
    }

    /// Mark the current attempt successful.
    pub fn mark_success(&mut self) -> Result<(), ProxyWhoisError> {
        match self.attempts.last_mut() {
            Some(attempt) => {
                attempt.success = true;
                Ok(())
            }
            None => {
                error!(domain = %self.domain, "Marking success on result without attempt");
                Err(ProxyWhoisError::invariant(format!(
                    "Marking success on result without attempt for '{}'",
                    self.domain
                )))
            }
        }
    }

    pub fn set_data(&mut self, data: String) {
        self.data = Some(data);
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn num_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Failed attempts that count toward the retry limit.
    pub fn counted_failures(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.is_counted_failure())
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.current_attempt().is_some_and(|a| a.success)
    }

    /// Whether another attempt is still allowed under `retry_limit`.
    pub fn can_retry(&self, retry_limit: usize) -> bool {
        self.counted_failures() < retry_limit
    }
}

/// Liveness probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// IP echo host reached through the proxy
    pub host: String,

    /// Port on the echo host
    pub port: u16,

    /// Raw request written after connecting
    pub request: String,

    /// Upper bound on connect + read
    #[serde(skip)]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "icanhazip.com".to_string(),
            port: 80,
            request: "GET /\r\n\r\n".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for a lookup batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Counted failures before a record goes to the failure queue
    /// Default: 3
    pub retry_limit: usize,

    /// Sleep between items when more work is queued
    /// Default: 20 seconds
    #[serde(skip)]
    pub worker_delay: Duration,

    /// Timeout for one WHOIS exchange
    /// Default: 10 seconds
    #[serde(skip)]
    pub lookup_timeout: Duration,

    /// Liveness probe target and timeout
    pub probe: ProbeConfig,

    /// Directory the file store writes into
    /// Default: "whois/"
    pub output_dir: PathBuf,

    /// Follow one registrar referral after the registry answer
    pub follow_referrals: bool,

    /// Also write a JSON audit file with every attempt
    pub audit: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            worker_delay: Duration::from_secs(20),
            lookup_timeout: Duration::from_secs(10),
            probe: ProbeConfig::default(),
            output_dir: PathBuf::from("whois/"),
            follow_referrals: true,
            audit: false,
        }
    }
}

impl PipelineConfig {
    /// Set the retry limit, clamped to 1-100.
    pub fn with_retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit.clamp(1, 100);
        self
    }

    pub fn with_worker_delay(mut self, delay: Duration) -> Self {
        self.worker_delay = delay;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe.timeout = timeout;
        self
    }

    pub fn with_probe_host<H: Into<String>>(mut self, host: H, port: u16) -> Self {
        self.probe.host = host.into();
        self.probe.port = port;
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_follow_referrals(mut self, enabled: bool) -> Self {
        self.follow_referrals = enabled;
        self
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyType;

    fn endpoint() -> ProxyEndpoint {
        ProxyEndpoint::new("127.0.0.1", 1080, ProxyType::Socks5)
    }

    #[test]
    fn test_new_record_is_normalized_and_empty() {
        let record = WhoisRecord::new("  example.com ");
        assert_eq!(record.domain(), "EXAMPLE.COM");
        assert_eq!(record.num_attempts(), 0);
        assert!(record.current_attempt().is_none());
        assert!(record.data().is_none());
        assert!(!record.is_success());
    }

    #[test]
    fn test_add_attempt_tracks_current() {
        let mut record = WhoisRecord::new("example.com");
        for expected in 1..=4 {
            record.add_attempt(WhoisAttempt::new(endpoint()));
            assert_eq!(record.num_attempts(), expected);
            assert_eq!(record.num_attempts(), record.attempts().len());
        }

        record.add_error(LookupErrorKind::Other, "boom").unwrap();
        let current = record.current_attempt().unwrap();
        assert_eq!(current.errors.len(), 1);
        assert!(record.attempts()[0].errors.is_empty());
    }

    #[test]
    fn test_add_error_without_attempt_is_invariant_violation() {
        let mut record = WhoisRecord::new("example.com");
        let err = record
            .add_error(LookupErrorKind::Other, "lost")
            .unwrap_err();
        assert!(matches!(err, ProxyWhoisError::InvariantViolation { .. }));
        assert_eq!(record.num_attempts(), 0);

        assert!(record.mark_success().is_err());
    }

    #[test]
    fn test_counted_failures_skip_transport_fatal() {
        let mut record = WhoisRecord::new("example.com");

        record.add_attempt(WhoisAttempt::new(endpoint()));
        record
            .add_error(LookupErrorKind::TransportFatal, "proxy died")
            .unwrap();
        record.add_attempt(WhoisAttempt::new(endpoint()));
        record
            .add_error(LookupErrorKind::DomainInvalid, "bad name")
            .unwrap();
        record.add_attempt(WhoisAttempt::new(endpoint()));
        record.add_error(LookupErrorKind::Other, "timeout").unwrap();

        assert_eq!(record.num_attempts(), 3);
        assert_eq!(record.counted_failures(), 2);
        assert!(record.can_retry(3));

        record.add_attempt(WhoisAttempt::new(endpoint()));
        record.add_error(LookupErrorKind::Other, "timeout").unwrap();
        assert!(!record.can_retry(3));
    }

    #[test]
    fn test_success_after_failures() {
        let mut record = WhoisRecord::new("example.com");
        for _ in 0..2 {
            record.add_attempt(WhoisAttempt::new(endpoint()));
            record.add_error(LookupErrorKind::Other, "nope").unwrap();
        }
        record.add_attempt(WhoisAttempt::new(endpoint()));
        record.set_data("Domain Name: EXAMPLE.COM".to_string());
        record.mark_success().unwrap();

        assert!(record.is_success());
        assert_eq!(record.counted_failures(), 2);
        assert_eq!(record.data(), Some("Domain Name: EXAMPLE.COM"));
    }

    #[test]
    fn test_pipeline_config_defaults_and_builders() {
        let config = PipelineConfig::default();
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.worker_delay, Duration::from_secs(20));
        assert_eq!(config.output_dir, PathBuf::from("whois/"));
        assert!(config.follow_referrals);

        let config = PipelineConfig::default()
            .with_retry_limit(0)
            .with_worker_delay(Duration::ZERO)
            .with_probe_host("ifconfig.me", 8080);
        assert_eq!(config.retry_limit, 1);
        assert_eq!(config.worker_delay, Duration::ZERO);
        assert_eq!(config.probe.host, "ifconfig.me");
        assert_eq!(config.probe.port, 8080);
    }
}
