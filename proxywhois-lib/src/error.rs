//! Error handling for proxied WHOIS lookups.
//!
//! Two layers of errors live here. `ProxyWhoisError` is the library's own
//! error type, covering setup problems and internal invariant violations.
//! `LookupError` and `TransportError` are tagged classifications produced at
//! the collaborator seams (WHOIS client, proxy transport) so that a worker
//! can switch on a kind instead of inspecting library-specific errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the lookup pipeline.
#[derive(Debug, Clone, Error)]
pub enum ProxyWhoisError {
    /// Liveness probe could not determine an external IP for the proxy
    #[error("Proxy '{proxy}' is unreachable: no external IP could be determined")]
    ProxyUnreachable { proxy: String },

    /// Another running worker already uses the same external IP
    #[error("Proxy '{proxy}' is already being used (external IP {ip})")]
    ProxyAlreadyClaimed { proxy: String, ip: String },

    /// A proxy that passed its liveness check stopped working mid-batch
    #[error("Unable to connect to once valid proxy '{proxy}': {message}")]
    TransportFatal { proxy: String, message: String },

    /// A caller broke an internal contract (e.g. error with no attempt)
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Invalid domain name format
    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    /// Unparseable proxy list entry
    #[error("Invalid proxy '{input}': {reason}")]
    InvalidProxy { input: String, reason: String },

    /// Configuration errors (invalid settings, etc.)
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File I/O errors when reading lists or configuration
    #[error("File error at '{path}': {message}")]
    FileError { path: String, message: String },

    /// Persistence collaborator failures
    #[error("Failed to persist record for '{domain}': {message}")]
    Store { domain: String, message: String },

    /// Generic internal errors that don't fit other categories
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ProxyWhoisError {
    pub fn proxy_unreachable<P: Into<String>>(proxy: P) -> Self {
        Self::ProxyUnreachable {
            proxy: proxy.into(),
        }
    }

    pub fn proxy_already_claimed<P: Into<String>, I: Into<String>>(proxy: P, ip: I) -> Self {
        Self::ProxyAlreadyClaimed {
            proxy: proxy.into(),
            ip: ip.into(),
        }
    }

    pub fn transport_fatal<P: Into<String>, M: Into<String>>(proxy: P, message: M) -> Self {
        Self::TransportFatal {
            proxy: proxy.into(),
            message: message.into(),
        }
    }

    pub fn invariant<M: Into<String>>(message: M) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn invalid_domain<D: Into<String>, R: Into<String>>(domain: D, reason: R) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_proxy<I: Into<String>, R: Into<String>>(input: I, reason: R) -> Self {
        Self::InvalidProxy {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn store<D: Into<String>, M: Into<String>>(domain: D, message: M) -> Self {
        Self::Store {
            domain: domain.into(),
            message: message.into(),
        }
    }

    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ProxyWhoisError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {}", err),
        }
    }
}

impl From<serde_json::Error> for ProxyWhoisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON serialization failed: {}", err),
        }
    }
}

/// Classification of a failed WHOIS lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupErrorKind {
    /// The proxy itself became unusable; the lookup is not to blame
    TransportFatal,
    /// The target name was rejected (malformed, unknown TLD, ...)
    DomainInvalid,
    /// Any other lookup failure
    Other,
}

impl LookupErrorKind {
    /// Whether a failure of this kind uses up one of the record's retries.
    pub fn counts_against_retries(self) -> bool {
        !matches!(self, Self::TransportFatal)
    }
}

impl fmt::Display for LookupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportFatal => write!(f, "transport-fatal"),
            Self::DomainInvalid => write!(f, "domain-invalid"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Tagged failure returned by a [`WhoisLookup`](crate::WhoisLookup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} lookup failure: {message}")]
pub struct LookupError {
    pub kind: LookupErrorKind,
    pub message: String,
}

impl LookupError {
    pub fn new<M: Into<String>>(kind: LookupErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport_fatal<M: Into<String>>(message: M) -> Self {
        Self::new(LookupErrorKind::TransportFatal, message)
    }

    pub fn domain_invalid<M: Into<String>>(message: M) -> Self {
        Self::new(LookupErrorKind::DomainInvalid, message)
    }

    pub fn other<M: Into<String>>(message: M) -> Self {
        Self::new(LookupErrorKind::Other, message)
    }
}

impl From<TransportError> for LookupError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::ProxyUnreachable => Self::transport_fatal(err.to_string()),
            _ => Self::other(err.to_string()),
        }
    }
}

/// Classification of a failed proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The proxy refused the connection, hung up, or failed the handshake
    ProxyUnreachable,
    /// The proxy is fine but could not reach the requested target
    TargetUnreachable,
    /// The operation did not finish in time
    Timeout,
    /// Anything else on the wire
    Protocol,
}

/// Failure returned by a [`ProxyConnector`](crate::ProxyConnector).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new<M: Into<String>>(kind: TransportErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn proxy_unreachable<M: Into<String>>(message: M) -> Self {
        Self::new(TransportErrorKind::ProxyUnreachable, message)
    }

    pub fn target_unreachable<M: Into<String>>(message: M) -> Self {
        Self::new(TransportErrorKind::TargetUnreachable, message)
    }

    pub fn timeout(operation: &str, duration: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("Timeout after {:?} during: {}", duration, operation),
        )
    }

    pub fn protocol<M: Into<String>>(message: M) -> Self {
        Self::new(TransportErrorKind::Protocol, message)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => {
                Self::proxy_unreachable(format!("Proxy I/O error: {}", err))
            }
            ErrorKind::TimedOut => Self::new(TransportErrorKind::Timeout, err.to_string()),
            _ => Self::protocol(format!("I/O error: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_unreachable_maps_to_transport_fatal() {
        let err: LookupError = TransportError::proxy_unreachable("refused").into();
        assert_eq!(err.kind, LookupErrorKind::TransportFatal);

        let err: LookupError = TransportError::target_unreachable("host down").into();
        assert_eq!(err.kind, LookupErrorKind::Other);

        let err: LookupError = TransportError::timeout("whois", Duration::from_secs(1)).into();
        assert_eq!(err.kind, LookupErrorKind::Other);
    }

    #[test]
    fn test_retry_accounting_per_kind() {
        assert!(!LookupErrorKind::TransportFatal.counts_against_retries());
        assert!(LookupErrorKind::DomainInvalid.counts_against_retries());
        assert!(LookupErrorKind::Other.counts_against_retries());
    }

    #[test]
    fn test_io_error_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(
            TransportError::from(refused).kind,
            TransportErrorKind::ProxyUnreachable
        );

        let other = std::io::Error::new(std::io::ErrorKind::InvalidData, "garbage");
        assert_eq!(TransportError::from(other).kind, TransportErrorKind::Protocol);
    }

    #[test]
    fn test_display_messages() {
        let err = ProxyWhoisError::proxy_already_claimed("10.0.0.1:1080", "203.0.113.7");
        assert_eq!(
            err.to_string(),
            "Proxy '10.0.0.1:1080' is already being used (external IP 203.0.113.7)"
        );

        let err = ProxyWhoisError::transport_fatal("10.0.0.1:1080", "connection reset");
        assert_eq!(
            err.to_string(),
            "Unable to connect to once valid proxy '10.0.0.1:1080': connection reset"
        );

        let err = LookupError::domain_invalid("Invalid domain: BAD");
        assert_eq!(err.to_string(), "domain-invalid lookup failure: Invalid domain: BAD");
    }
}
